// File naming grammar shared by the media extractor, the dedup cache and the
// like-folder reconciler:
//
//   {unixSeconds}.{author}.{shortLink}.{index}.{width}x{height}.{mediaId}.{ext}
//
// `shortLink` is the post's short link without its scheme, `/` replaced by `_`
// (`https://t.co/abc123` -> `t.co_abc123`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static RE_LIKE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([^.]+)\.t\.co_([^.]+)\.").unwrap());

/// Components of an archived media file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFileName {
    pub timestamp: i64,
    pub author_handle: String,
    pub short_link: String,
    pub media_index: usize,
    pub width: u32,
    pub height: u32,
    pub media_id: String,
    pub extension: String,
}

impl fmt::Display for MediaFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}x{}.{}.{}",
            self.timestamp,
            self.author_handle,
            transform_short_link(&self.short_link),
            self.media_index,
            self.width,
            self.height,
            self.media_id,
            self.extension
        )
    }
}

/// Drop the scheme of a short link and flatten its path into a single name segment.
pub fn transform_short_link(link: &str) -> String {
    let without_scheme = match link.find("://") {
        Some(pos) => &link[pos + 3..],
        None => link,
    };
    without_scheme.replace('/', "_")
}

/// Outcome of matching a watch-folder file name against the like grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeFileName {
    Matched { author_handle: String, token: String },
    NoMatch,
}

impl LikeFileName {
    /// Look for `.{author}.t.co_{token}.` anywhere in the name.
    pub fn parse(file_name: &str) -> Self {
        match RE_LIKE_FILE.captures(file_name) {
            Some(caps) => LikeFileName::Matched {
                author_handle: caps[1].to_string(),
                token: caps[2].to_string(),
            },
            None => LikeFileName::NoMatch,
        }
    }

    /// The resolvable short link for a matched name.
    pub fn short_url(&self) -> Option<String> {
        match self {
            LikeFileName::Matched { token, .. } => Some(format!("https://t.co/{token}")),
            LikeFileName::NoMatch => None,
        }
    }
}
