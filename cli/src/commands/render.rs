//! Text rendering of session state for the console.

use crate::session::{Message, SessionView};

/// One timeline entry, e.g. `[12:00:01] SENT /app/chat: hello`.
///
/// Multi-line content (pretty JSON) is indented under the header.
pub fn message_line(message: &Message) -> String {
    let header = format!(
        "[{}] {} {}",
        message.timestamp().format("%H:%M:%S"),
        message.direction(),
        message.destination()
    );
    let content = message.content();
    if content.contains('\n') {
        let indented: Vec<String> = content.lines().map(|l| format!("    {l}")).collect();
        format!("{header}:\n{}", indented.join("\n"))
    } else {
        format!("{header}: {content}")
    }
}

/// Status line plus the error slot when set.
pub fn status_lines(view: &SessionView<'_>) -> Vec<String> {
    let mut lines = vec![format!(
        "status: {} | mode: {} | address: {} | types: {}",
        view.status,
        view.mode,
        view.address.unwrap_or("-"),
        view.schema_types
    )];
    if let Some(error) = view.last_error {
        lines.push(format!("error: {error}"));
    }
    lines
}

/// Subscription listing, `*` marking live handles.
pub fn subscription_lines(view: &SessionView<'_>) -> Vec<String> {
    if view.subscriptions.is_empty() {
        return vec!["(no subscriptions)".to_string()];
    }
    view.subscriptions
        .iter()
        .map(|(destination, live)| format!("{} {}", if *live { "*" } else { " " }, destination))
        .collect()
}

/// Timeline as pretty JSON.
pub fn history_json(messages: &[Message]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(messages)
}
