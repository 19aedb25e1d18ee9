//! Console command line parsing.

use std::path::PathBuf;

use crate::session::Mode;

/// One console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Connect to the given URL, or the configured one.
    Connect(Option<String>),
    /// Tear down the connection.
    Disconnect,
    /// Add a destination to the subscription set.
    Subscribe(String),
    /// Remove a destination from the subscription set.
    Unsubscribe(String),
    /// List subscriptions.
    Subscriptions,
    /// Publish a payload.
    Send {
        /// Explicit destination; the configured default when absent.
        destination: Option<String>,
        /// Payload as typed, internal whitespace preserved.
        payload: String,
    },
    /// Switch communication mode.
    Mode(Mode),
    /// Load schema files as one batch.
    Load(Vec<PathBuf>),
    /// List registered message types.
    Types,
    /// Empty the schema registry.
    ResetSchema,
    /// Print status and error slot.
    Status,
    /// Write the current settings to the config file.
    SaveConfig,
    /// Print the timeline.
    History {
        /// Emit JSON instead of text.
        json: bool,
    },
    /// Print usage.
    Help,
    /// Leave the console.
    Quit,
}

/// Why a console line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// First word is not a command.
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    /// Required argument absent.
    #[error("usage: {0}")]
    Usage(&'static str),
    /// Argument present but unusable.
    #[error("{0}")]
    Invalid(String),
}

/// Usage text printed by `help`.
pub const HELP: &str = "\
commands:
  connect [url]              connect to the broker (default from config)
  disconnect                 tear down the connection
  sub <dest>                 subscribe to a destination
  unsub <dest>               unsubscribe from a destination
  subs                       list subscriptions
  send [dest] <payload>      publish (dest defaults to the configured destination)
  mode raw|structured        switch communication mode
  load <file>...             load .proto files as one batch
  types                      list registered message types
  reset-schema               drop all loaded schemas
  status                     show connection status and last error
  history [--json]           show the message timeline
  save-config                persist url, headers, mode and subscriptions
  help                       show this text
  quit                       exit";

/// Split off the first whitespace-delimited word.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = split_word(line);

    let command = match word.to_ascii_lowercase().as_str() {
        "connect" => ConsoleCommand::Connect(Some(rest).filter(|r| !r.is_empty()).map(String::from)),
        "disconnect" => ConsoleCommand::Disconnect,
        "sub" | "subscribe" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("sub <dest>"));
            }
            ConsoleCommand::Subscribe(rest.to_string())
        }
        "unsub" | "unsubscribe" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("unsub <dest>"));
            }
            ConsoleCommand::Unsubscribe(rest.to_string())
        }
        "subs" => ConsoleCommand::Subscriptions,
        "send" => parse_send(rest)?,
        "mode" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("mode raw|structured"));
            }
            ConsoleCommand::Mode(rest.parse().map_err(CommandError::Invalid)?)
        }
        "load" => {
            let files: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
            if files.is_empty() {
                return Err(CommandError::Usage("load <file>..."));
            }
            ConsoleCommand::Load(files)
        }
        "types" => ConsoleCommand::Types,
        "reset-schema" => ConsoleCommand::ResetSchema,
        "status" => ConsoleCommand::Status,
        "save-config" => ConsoleCommand::SaveConfig,
        "history" => match rest {
            "" => ConsoleCommand::History { json: false },
            "--json" => ConsoleCommand::History { json: true },
            other => return Err(CommandError::Invalid(format!("unexpected argument '{other}'"))),
        },
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

fn parse_send(rest: &str) -> Result<ConsoleCommand, CommandError> {
    let (first, after) = split_word(rest);
    let (destination, payload) = if first.starts_with('/') {
        (Some(first.to_string()), after)
    } else {
        (None, rest)
    };
    if payload.is_empty() {
        return Err(CommandError::Usage("send [dest] <payload>"));
    }
    Ok(ConsoleCommand::Send {
        destination,
        payload: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_connect_with_and_without_url() {
        assert_eq!(parse("connect"), Ok(Some(ConsoleCommand::Connect(None))));
        assert_eq!(
            parse("connect ws://h:1/ws"),
            Ok(Some(ConsoleCommand::Connect(Some("ws://h:1/ws".into()))))
        );
    }

    #[test]
    fn test_send_with_destination_keeps_payload_whitespace() {
        assert_eq!(
            parse(r#"send /app/chat {"ChatMessage": {"text": "a  b"}}"#),
            Ok(Some(ConsoleCommand::Send {
                destination: Some("/app/chat".into()),
                payload: r#"{"ChatMessage": {"text": "a  b"}}"#.into(),
            }))
        );
    }

    #[test]
    fn test_send_without_destination() {
        assert_eq!(
            parse("send hello world"),
            Ok(Some(ConsoleCommand::Send {
                destination: None,
                payload: "hello world".into(),
            }))
        );
    }

    #[test]
    fn test_send_requires_payload() {
        assert!(matches!(parse("send"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("send /app/x"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_mode_and_history() {
        assert_eq!(parse("mode structured"), Ok(Some(ConsoleCommand::Mode(Mode::Structured))));
        assert!(matches!(parse("mode binary"), Err(CommandError::Invalid(_))));
        assert_eq!(parse("history --json"), Ok(Some(ConsoleCommand::History { json: true })));
    }

    #[test]
    fn test_load_multiple_files() {
        assert_eq!(
            parse("load a.proto dir/b.proto"),
            Ok(Some(ConsoleCommand::Load(vec!["a.proto".into(), "dir/b.proto".into()])))
        );
        assert!(matches!(parse("load"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_save_config() {
        assert_eq!(parse("save-config"), Ok(Some(ConsoleCommand::SaveConfig)));
        assert!(HELP.contains("save-config"));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse("frobnicate"), Err(CommandError::Unknown("frobnicate".into())));
    }
}
