// Media extractor: turns a platform post into zero or more MediaItems.
//
// Only photos are kept. A malformed media entry is skipped on its own; the
// other photos of the same post are still returned.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use photodump_common::{HarvestError, MediaFileName, MediaItem};
use twitter_client::{Media, Tweet};

static RE_MEDIA_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/media/(.*)\.(.*)").unwrap());

/// `created_at` format used by the v1.1 API, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub fn extract_media(tweet: &Tweet) -> Vec<MediaItem> {
    let medias = tweet
        .extended_entities
        .as_ref()
        .and_then(|e| e.media.as_ref())
        .or_else(|| tweet.entities.as_ref().and_then(|e| e.media.as_ref()));
    let Some(medias) = medias else {
        return Vec::new();
    };

    medias
        .iter()
        .filter(|m| m.media_type.as_deref() == Some("photo"))
        .enumerate()
        .filter_map(|(index, media)| match media_item(tweet, media, index) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(post = ?tweet.id_str, index, error = %e, "skipping malformed media");
                None
            }
        })
        .collect()
}

fn media_item(tweet: &Tweet, media: &Media, index: usize) -> Result<MediaItem, HarvestError> {
    let original = tweet.retweeted_status.as_deref();

    let created_raw = original
        .and_then(|t| t.created_at.as_deref())
        .or(tweet.created_at.as_deref())
        .ok_or_else(|| HarvestError::Malformed("post has no created_at".into()))?;
    let created_at = parse_created_at(created_raw)?;

    let caption_text = original
        .and_then(Tweet::content)
        .or_else(|| tweet.content())
        .unwrap_or_default()
        .replace('\n', " ");

    let media_url = media
        .media_url_https
        .as_deref()
        .ok_or_else(|| HarvestError::Malformed("media has no media_url_https".into()))?;
    let caps = RE_MEDIA_URL
        .captures(media_url)
        .ok_or_else(|| HarvestError::Malformed(format!("unexpected media url {media_url}")))?;
    let media_id = caps[1].to_string();
    let extension = caps[2].to_string();

    let expanded_url = media
        .expanded_url
        .as_deref()
        .ok_or_else(|| HarvestError::Malformed("media has no expanded_url".into()))?;
    let author_handle = expanded_url
        .split('/')
        .nth(3)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HarvestError::Malformed(format!("no author in {expanded_url}")))?
        .to_string();

    let short_link = media
        .url
        .as_deref()
        .ok_or_else(|| HarvestError::Malformed("media has no short url".into()))?;

    let large = media.sizes.as_ref().and_then(|s| s.large).unwrap_or_default();

    let file_name = MediaFileName {
        timestamp: created_at.timestamp(),
        author_handle: author_handle.clone(),
        short_link: short_link.to_string(),
        media_index: index,
        width: large.w,
        height: large.h,
        media_id,
        extension: extension.clone(),
    }
    .to_string();

    Ok(MediaItem {
        file_name,
        remote_url: format!("{media_url}:large"),
        created_at,
        author_handle,
        caption_text,
        extension,
        source_post_url: expanded_url.to_string(),
    })
}

fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, HarvestError> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HarvestError::Malformed(format!("bad created_at {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{photo, tweet_with_media};
    use twitter_client::{Entities, Size, Sizes};

    #[test]
    fn builds_deterministic_file_name() {
        let tweet = tweet_with_media(
            "Tue Nov 14 22:13:20 +0000 2023",
            vec![photo("alice", "abc123", "999", Some((800, 600)))],
        );

        let items = extract_media(&tweet);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(
            item.file_name,
            "1700000000.alice.t.co_abc123.0.800x600.999.jpg"
        );
        assert_eq!(item.remote_url, "https://pbs.twimg.com/media/999.jpg:large");
        assert_eq!(item.author_handle, "alice");
        assert_eq!(item.extension, "jpg");
        assert_eq!(item.created_at.timestamp(), 1_700_000_000);

        // Same post, same media -> same name.
        assert_eq!(extract_media(&tweet)[0].file_name, item.file_name);
    }

    #[test]
    fn retweet_uses_original_time_and_text() {
        let mut tweet = tweet_with_media(
            "Tue Nov 14 22:13:20 +0000 2023",
            vec![photo("bob", "t1", "5", None)],
        );
        tweet.text = Some("RT something".into());
        tweet.retweeted_status = Some(Box::new(Tweet {
            created_at: Some("Mon Jan 01 00:00:00 +0000 2018".into()),
            text: Some("line one\nline two".into()),
            ..Default::default()
        }));

        let item = &extract_media(&tweet)[0];
        assert_eq!(item.caption_text, "line one line two");
        assert!(item.file_name.starts_with("1514764800.bob.t.co_t1.0.0x0.5.jpg"));
    }

    #[test]
    fn non_photo_and_malformed_media_are_skipped_individually() {
        let mut video = photo("carol", "v", "1", None);
        video.media_type = Some("video".into());
        let mut broken = photo("carol", "b", "2", None);
        broken.media_url_https = Some("https://pbs.twimg.com/no-media-here".into());
        let good = photo("carol", "g", "3", Some((10, 20)));

        let tweet = tweet_with_media("Tue Nov 14 22:13:20 +0000 2023", vec![video, broken, good]);
        let items = extract_media(&tweet);

        assert_eq!(items.len(), 1);
        // Index counts photos only, so the good one is the second photo.
        assert_eq!(
            items[0].file_name,
            "1700000000.carol.t.co_g.1.10x20.3.jpg"
        );
    }

    #[test]
    fn extended_entities_take_precedence() {
        let mut tweet = tweet_with_media(
            "Tue Nov 14 22:13:20 +0000 2023",
            vec![photo("dan", "x", "1", None)],
        );
        tweet.extended_entities = Some(Entities {
            media: Some(vec![
                photo("dan", "x", "1", None),
                photo("dan", "x", "2", Some((1, 1))),
            ]),
        });

        assert_eq!(extract_media(&tweet).len(), 2);
    }

    #[test]
    fn post_without_media_yields_nothing() {
        assert!(extract_media(&Tweet::default()).is_empty());
    }

    #[test]
    fn unparseable_date_skips_the_media() {
        let tweet = tweet_with_media("yesterday", vec![photo("eve", "x", "1", None)]);
        assert!(extract_media(&tweet).is_empty());
    }

    #[test]
    fn reads_large_size() {
        let mut media = photo("fay", "x", "1", None);
        media.sizes = Some(Sizes { large: Some(Size { w: 3, h: 4 }) });
        let tweet = tweet_with_media("Tue Nov 14 22:13:20 +0000 2023", vec![media]);
        assert!(extract_media(&tweet)[0].file_name.contains(".3x4."));
    }
}
