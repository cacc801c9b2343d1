//! Pipeline submissions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A request to pull one remote video into the pipeline.
///
/// Produced by the command front-end; `reply_target` is opaque routing data
/// (e.g. a chat channel) carried back with the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_target: Option<serde_json::Value>,
}

impl Submission {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reply_target: None,
        }
    }

    pub fn with_reply_target(mut self, target: serde_json::Value) -> Self {
        self.reply_target = Some(target);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_wire_format() {
        let sub: Submission = serde_json::from_str(
            r#"{"url":"https://example.com/v/1","replyTarget":{"channel":"42"}}"#,
        )
        .unwrap();
        assert_eq!(sub.url, "https://example.com/v/1");
        assert_eq!(sub.reply_target.unwrap()["channel"], "42");

        let bare: Submission = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert!(bare.reply_target.is_none());
    }
}
