//! Metadata sent with every publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title, description, category and privacy of an upload.
///
/// Configured by the operator, never derived from video content. The title
/// may contain `{name}` (compilation name) and `{date}` (UTC date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub privacy_status: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for PublishMetadata {
    fn default() -> Self {
        Self {
            title: "Compilation {date}".to_string(),
            description: String::new(),
            category_id: "22".to_string(),
            privacy_status: "private".to_string(),
            tags: Vec::new(),
        }
    }
}

impl PublishMetadata {
    /// Expand placeholders for one compilation.
    pub fn render(&self, name: &str, at: DateTime<Utc>) -> Self {
        let date = at.format("%Y-%m-%d").to_string();
        let expand = |s: &str| s.replace("{name}", name).replace("{date}", &date);
        Self {
            title: expand(&self.title),
            description: expand(&self.description),
            ..self.clone()
        }
    }

    /// Request body for a YouTube `videos.insert`.
    pub(crate) fn to_video_resource(&self) -> serde_json::Value {
        serde_json::json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "categoryId": self.category_id,
                "tags": self.tags,
            },
            "status": {
                "privacyStatus": self.privacy_status,
            }
        })
    }
}

/// What the publish API returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Identifier assigned by the hosting service
    pub id: String,
    pub published_at: DateTime<Utc>,
}
