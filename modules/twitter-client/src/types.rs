use serde::{Deserialize, Serialize};

/// A status object as returned by the v1.1 timelines, favorites and the filter stream.
/// Only the fields the harvester reads are modelled; everything is optional because
/// the payload shape varies between endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tweet {
    pub id_str: Option<String>,
    pub created_at: Option<String>,
    pub text: Option<String>,
    pub full_text: Option<String>,
    pub entities: Option<Entities>,
    pub extended_entities: Option<Entities>,
    pub retweeted_status: Option<Box<Tweet>>,
    pub user: Option<User>,
}

impl Tweet {
    /// Text of the status, preferring the untruncated form when present.
    pub fn content(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entities {
    pub media: Option<Vec<Media>>,
}

/// A media entity attached to a status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Media {
    pub id_str: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub media_url_https: Option<String>,
    /// Full link to the photo page, e.g. `https://twitter.com/{handle}/status/{id}/photo/1`.
    pub expanded_url: Option<String>,
    /// Short link embedded in the status text, e.g. `https://t.co/abc123`.
    pub url: Option<String>,
    pub sizes: Option<Sizes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sizes {
    pub large: Option<Size>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

/// An account. Unmodelled fields are kept so the following list can be
/// snapshotted to disk as returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id_str: String,
    pub screen_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of `friends/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct FriendsPage {
    pub users: Vec<User>,
    pub next_cursor: i64,
}
