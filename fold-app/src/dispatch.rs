//! The notification tail of a dispatch.
//!
//! By the time `run` is called the engine has already taken the request out
//! of the store and consumed a credential, so nothing here mutates engine
//! state. Delivery failures are logged and swallowed; they must not abort
//! the upstream call or the terminal notice.

use crate::store::PendingRequest;
use fold_channels::{ChannelAdapter, OutboundMessage, SenderId};
use fold_gen::{GenError, TextGenerator};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<dyn ChannelAdapter>,
    generator: Arc<dyn TextGenerator>,
    upstream_timeout: Duration,
    prompt_prefix: Option<String>,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn ChannelAdapter>,
        generator: Arc<dyn TextGenerator>,
        upstream_timeout: Duration,
        prompt_prefix: Option<String>,
    ) -> Self {
        Self {
            channel,
            generator,
            upstream_timeout,
            prompt_prefix,
        }
    }

    /// One attempt, one terminal outcome per request. Failure is reported to
    /// the owner and the request is gone; no retry, no requeue.
    #[tracing::instrument(level = "info", skip_all, fields(request_id = %request.id))]
    pub async fn run(&self, request: PendingRequest, api_key: String) {
        self.notify(
            &request.owner,
            format!("Processing request {}...", request.id),
        )
        .await;

        let prompt = match &self.prompt_prefix {
            Some(prefix) => format!("{prefix}\n\n{}", request.text),
            None => request.text.clone(),
        };

        let outcome = tokio::time::timeout(
            self.upstream_timeout,
            self.generator.generate(&prompt, &api_key),
        )
        .await
        .unwrap_or(Err(GenError::Timeout));

        let reply = match outcome {
            Ok(text) => {
                tracing::info!("generation succeeded");
                format_reply(&request, &text)
            }
            Err(error) => {
                tracing::warn!(%error, "generation failed");
                format_failure(&request, &error)
            }
        };
        self.notify(&request.owner, reply).await;
    }

    async fn notify(&self, owner: &SenderId, content: String) {
        if let Err(error) = self
            .channel
            .send(owner.as_str(), OutboundMessage::plain(content))
            .await
        {
            tracing::warn!(%error, %owner, "notification delivery failed");
        }
    }
}

fn format_reply(request: &PendingRequest, text: &str) -> String {
    format!(
        "Reply to request {}:\n\n{}\n\n[end of reply]",
        request.id, text
    )
}

fn format_failure(request: &PendingRequest, error: &GenError) -> String {
    format!("Request {} failed: {}", request.id, error)
}

#[cfg(test)]
mod tests {
    use super::{format_failure, format_reply};
    use crate::store::{PendingRequest, RequestId};
    use chrono::Utc;
    use fold_channels::SenderId;
    use fold_gen::GenError;

    fn request() -> PendingRequest {
        PendingRequest {
            id: RequestId::from("u1_100000"),
            owner: SenderId::from("u1"),
            text: "write a slogan".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reply_framing_names_the_request_id_and_marks_the_end() {
        let text = format_reply(&request(), "Fresh beans, fast.");
        assert!(text.starts_with("Reply to request u1_100000:"));
        assert!(text.contains("Fresh beans, fast."));
        assert!(text.ends_with("[end of reply]"));
    }

    #[test]
    fn failure_notice_names_the_request_id_and_the_error_kind() {
        let text = format_failure(
            &request(),
            &GenError::Upstream {
                status: 429,
                body: "quota".to_string(),
            },
        );
        assert!(text.contains("u1_100000"));
        assert!(text.contains("429"));
    }
}
