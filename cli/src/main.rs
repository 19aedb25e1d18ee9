//! stompwire console - probe a STOMP-over-WebSocket broker from the terminal.
//!
//! This is the main binary entry point. See the `stompwire` library for the
//! session manager, transport and schema registry.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use stompwire::commands::{self, render, ConsoleCommand};
use stompwire::session::{ConnectionStatus, Mode, SessionManager};
use stompwire::{Config, HttpImportFetcher, SchemaDocument, StompTransport, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser, Debug)]
#[command(name = "stompwire")]
#[command(version)]
#[command(about = "Interactive console for STOMP-over-WebSocket brokers")]
struct Cli {
    /// Broker WebSocket URL (overrides config)
    #[arg(long)]
    url: Option<String>,
    /// Extra CONNECT header, repeatable
    #[arg(long = "header", value_name = "K=V", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    /// Destination to subscribe to, repeatable
    #[arg(long = "subscribe", value_name = "DEST")]
    subscriptions: Vec<String>,
    /// Schema file to load at startup, repeatable (one batch)
    #[arg(long = "proto", value_name = "FILE")]
    protos: Vec<PathBuf>,
    /// Communication mode: raw or structured
    #[arg(long)]
    mode: Option<Mode>,
    /// Message type inbound binary frames are decoded as
    #[arg(long)]
    inbound_type: Option<String>,
    /// Connect immediately
    #[arg(long)]
    connect: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.broker_url.clone_from(url);
        }
        for (key, value) in &self.headers {
            config.connect_headers.insert(key.clone(), value.clone());
        }
        config.subscriptions.extend(self.subscriptions.iter().cloned());
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.inbound_type.is_some() {
            config.inbound_type.clone_from(&self.inbound_type);
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected K=V, got '{raw}'")),
    }
}

/// Tracks what has already been printed.
struct Console {
    config: Config,
    printed: usize,
    seen_status: ConnectionStatus,
    seen_error: Option<String>,
}

impl Console {
    fn new(config: Config) -> Self {
        Self {
            config,
            printed: 0,
            seen_status: ConnectionStatus::Disconnected,
            seen_error: None,
        }
    }

    /// Print new timeline entries and any status or error change.
    fn flush<T: Transport>(&mut self, session: &SessionManager<T>) {
        for message in &session.messages()[self.printed..] {
            println!("{}", render::message_line(message));
        }
        self.printed = session.messages().len();

        let error = session.last_error().map(String::from);
        if session.status() != self.seen_status || error != self.seen_error {
            for line in render::status_lines(&session.view()) {
                println!("{line}");
            }
            self.seen_status = session.status();
            self.seen_error = error;
        }
    }

    /// Run one input line. Returns `false` on quit.
    async fn handle_line<T: Transport>(
        &mut self,
        session: &mut SessionManager<T>,
        line: &str,
    ) -> bool {
        let command = match commands::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(e) => {
                println!("{e}");
                return true;
            }
        };

        let result = match command {
            ConsoleCommand::Quit => return false,
            ConsoleCommand::Help => {
                println!("{}", commands::HELP);
                Ok(())
            }
            ConsoleCommand::Connect(url) => {
                let address = url.unwrap_or_else(|| self.config.broker_url.clone());
                session.connect(&address, self.config.header_pairs()).await
            }
            ConsoleCommand::Disconnect => session.disconnect().await,
            ConsoleCommand::Subscribe(destination) => {
                session.add_subscription(&destination).map(|added| {
                    if !added {
                        println!("already subscribed to {destination}");
                    }
                })
            }
            ConsoleCommand::Unsubscribe(destination) => {
                if !session.remove_subscription(&destination) {
                    println!("not subscribed to {destination}");
                }
                Ok(())
            }
            ConsoleCommand::Subscriptions => {
                for line in render::subscription_lines(&session.view()) {
                    println!("{line}");
                }
                Ok(())
            }
            ConsoleCommand::Send {
                destination,
                payload,
            } => {
                let destination =
                    destination.unwrap_or_else(|| self.config.publish_destination.clone());
                let mode = session.mode();
                session.publish(&destination, &payload, mode)
            }
            ConsoleCommand::Mode(mode) => {
                session.set_mode(mode);
                println!("mode: {mode}");
                Ok(())
            }
            ConsoleCommand::Load(files) => {
                load_files(session, &files).await;
                Ok(())
            }
            ConsoleCommand::Types => {
                let names = session.type_names();
                if names.is_empty() {
                    println!("(no message types loaded)");
                }
                for name in names {
                    println!("{name}");
                }
                Ok(())
            }
            ConsoleCommand::ResetSchema => {
                session.reset_schema();
                println!("schema registry cleared");
                Ok(())
            }
            ConsoleCommand::Status => {
                for line in render::status_lines(&session.view()) {
                    println!("{line}");
                }
                Ok(())
            }
            ConsoleCommand::SaveConfig => {
                self.config.mode = session.mode();
                self.config.subscriptions = session.subscriptions().map(String::from).collect();
                match self.config.save() {
                    Ok(path) => println!("config saved to {}", path.display()),
                    Err(e) => println!("error: {e:#}"),
                }
                Ok(())
            }
            ConsoleCommand::History { json } => {
                if json {
                    match render::history_json(session.messages()) {
                        Ok(out) => println!("{out}"),
                        Err(e) => println!("error: {e}"),
                    }
                } else {
                    for message in session.messages() {
                        println!("{}", render::message_line(message));
                    }
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("error: {e}");
            // Already shown; flush() should not repeat it.
            self.seen_error = session.last_error().map(String::from);
        }
        true
    }
}

/// Read `files` and merge them into the registry as one batch.
async fn load_files<T: Transport>(session: &mut SessionManager<T>, files: &[PathBuf]) {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let source = match tokio::fs::read_to_string(path).await {
            Ok(source) => source,
            Err(e) => {
                println!("error: cannot read {}: {e}", path.display());
                return;
            }
        };
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        documents.push(SchemaDocument::new(name, source));
    }

    match session.load_schema(documents).await {
        Ok(report) => {
            println!(
                "loaded {} document(s), fetched {} import(s), skipped {}",
                report.merged.len(),
                report.fetched.len(),
                report.skipped.len()
            );
            println!("{} message type(s) available", session.type_names().len());
        }
        Err(e) => println!("error: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    cli.apply(&mut config);

    let fetcher = HttpImportFetcher::new(&config.import_base_url)
        .context("failed to set up import fetcher")?;
    let transport = StompTransport::new(config.heartbeat_ms);
    let (mut session, mut events) = SessionManager::new(transport, Box::new(fetcher));
    session.set_mode(config.mode);
    session.set_inbound_policy(config.inbound_policy());

    for destination in &config.subscriptions {
        if let Err(e) = session.add_subscription(destination) {
            println!("error: {e}");
        }
    }
    if !cli.protos.is_empty() {
        load_files(&mut session, &cli.protos).await;
    }

    let mut console = Console::new(config);
    if cli.connect {
        let address = console.config.broker_url.clone();
        if let Err(e) = session.connect(&address, console.config.header_pairs()).await {
            println!("error: {e}");
        }
    }
    console.flush(&session);
    println!("stompwire v{} - type 'help' for commands", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        if !console.handle_line(&mut session, &line).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            Some(event) = events.recv() => session.handle_event(event),
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
        console.flush(&session);
    }

    if let Err(e) = session.disconnect().await {
        log::warn!("{}", e);
    }
    Ok(())
}
