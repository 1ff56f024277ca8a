//! Chat command parser and reply texts.

use crate::store::PendingSummary;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Cancel,
    Unknown,
}

/// Returns `None` for plain text; plain text goes to aggregation.
pub fn parse(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let name = trimmed.split_whitespace().next().unwrap_or(trimmed);
    Some(match name {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/status" => Command::Status,
        "/cancel" => Command::Cancel,
        _ => Command::Unknown,
    })
}

pub fn welcome_text(quiet_period: Duration) -> String {
    format!(
        "Hi! I turn your messages into generated text.\n\n\
         Send me any text and I will:\n\
         1. Assign it a request id\n\
         2. Wait {}s for follow-up messages and fold them in\n\
         3. Send the aggregated request for generation\n\
         4. Reply with the result, tagged with the request id\n\n\
         Commands:\n\
         /status - show pending requests\n\
         /cancel - cancel pending requests\n\
         /help - usage notes",
        quiet_period.as_secs()
    )
}

pub fn help_text(quiet_period: Duration) -> String {
    format!(
        "Just send text and processing starts on its own.\n\n\
         Every request gets a unique id. I wait {}s after your last message \
         before sending anything upstream, so follow-ups land in the same \
         request. Replies always name the request id they answer.\n\n\
         /status - show pending requests\n\
         /cancel - cancel all pending requests",
        quiet_period.as_secs()
    )
}

pub fn unknown_command_text() -> String {
    "Unknown command. Supported: /start /help /status /cancel".to_string()
}

pub fn empty_text_notice() -> String {
    "Please send text to process.".to_string()
}

pub fn format_status(pending: &[PendingSummary]) -> String {
    if pending.is_empty() {
        return "You have no pending requests.".to_string();
    }

    let mut out = String::from("Your pending requests:\n");
    for summary in pending {
        out.push_str(&format!(
            "\n- id: {}\n  text: {}\n  created: {}\n  status: awaiting processing\n",
            summary.id,
            summary.preview,
            summary.created_at.format("%H:%M:%S"),
        ));
    }
    out
}

pub fn format_cancelled(count: usize) -> String {
    if count == 0 {
        "No pending requests to cancel.".to_string()
    } else {
        format!("Cancelled {count} pending request(s).")
    }
}

pub fn receipt_text(request_id: &str, quiet_period: Duration) -> String {
    format!(
        "Request received.\n\n\
         id: {request_id}\n\
         Processing starts in {}s. Messages sent before then are folded into \
         this request.\n\n\
         /status shows pending requests, /cancel cancels them.",
        quiet_period.as_secs()
    )
}

pub fn merged_receipt_text(request_id: &str, quiet_period: Duration) -> String {
    format!(
        "Folded into your pending request.\n\n\
         new id: {request_id}\n\
         Processing starts in {}s.",
        quiet_period.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::{Command, format_cancelled, format_status, parse};
    use crate::store::PendingStore;
    use chrono::{TimeZone, Utc};
    use fold_channels::SenderId;

    #[test]
    fn parse_recognizes_commands_and_passes_plain_text_through() {
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("  /help "), Some(Command::Help));
        assert_eq!(parse("/status"), Some(Command::Status));
        assert_eq!(parse("/cancel"), Some(Command::Cancel));
        assert_eq!(parse("/model gpt"), Some(Command::Unknown));
        assert_eq!(parse("write me a slogan"), None);
    }

    #[test]
    fn status_formatting_names_id_preview_time_and_label() {
        let store = PendingStore::new();
        let owner = SenderId::from("u1");
        let now = Utc.timestamp_opt(3600, 0).unwrap();
        let outcome = store.upsert(&owner, "write a slogan for a coffee shop", now);

        let text = format_status(&store.peek_all(&owner));
        assert!(text.contains(outcome.id.as_str()));
        assert!(text.contains("write a slogan for a coffee shop"));
        assert!(text.contains("01:00:00"));
        assert!(text.contains("awaiting processing"));

        assert_eq!(
            format_status(&[]),
            "You have no pending requests.",
        );
    }

    #[test]
    fn cancel_formatting_distinguishes_zero_from_some() {
        assert_eq!(format_cancelled(0), "No pending requests to cancel.");
        assert_eq!(format_cancelled(1), "Cancelled 1 pending request(s).");
    }
}
