// Filter stream: a long-lived POST whose body is `\r\n`-delimited JSON messages,
// interleaved with blank keep-alive lines.

use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

use crate::error::{Result, TwitterError};
use crate::types::Tweet;
use crate::TwitterClient;

const STREAM_BASE: &str = "https://stream.twitter.com/1.1";

/// A decoded stream message.
#[derive(Debug)]
pub enum StreamMessage {
    Tweet(Box<Tweet>),
    /// Control messages (`delete`, `limit`, `warning`, ...).
    Control(serde_json::Value),
}

/// Splits the chunked response body into complete messages.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamMessage>> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = trim_line(&line);
            if line.is_empty() {
                continue;
            }
            out.push(decode_message(line));
        }
        out
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ') {
        end -= 1;
    }
    &line[..end]
}

fn decode_message(line: &[u8]) -> Result<StreamMessage> {
    let value: serde_json::Value = serde_json::from_slice(line)?;
    let is_status = value.get("id_str").is_some()
        && (value.get("text").is_some() || value.get("full_text").is_some());
    if is_status {
        let tweet: Tweet = serde_json::from_value(value)?;
        Ok(StreamMessage::Tweet(Box::new(tweet)))
    } else {
        Ok(StreamMessage::Control(value))
    }
}

impl TwitterClient {
    /// Open `statuses/filter` following the given account ids. The returned stream
    /// yields statuses until the connection drops or the stream is dropped.
    pub async fn filter_stream(
        &self,
        follow: &[String],
    ) -> Result<BoxStream<'static, Result<Tweet>>> {
        let url = format!("{}/statuses/filter.json", self.stream_base);
        let params = [("follow", follow.join(","))];
        let resp = self.signed_post(&url, &params).await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut body = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = StreamDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(TwitterError::from(e));
                        break;
                    }
                };
                for message in decoder.push(&chunk) {
                    match message {
                        Ok(StreamMessage::Tweet(tweet)) => yield Ok(*tweet),
                        Ok(StreamMessage::Control(value)) => {
                            debug!(%value, "stream control message");
                        }
                        Err(e) => yield Err(e),
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

pub(crate) fn default_stream_base() -> String {
    STREAM_BASE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_messages_across_chunks() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"{\"id_str\":\"1\",\"te").is_empty());

        let out = decoder.push(b"xt\":\"hi\"}\r\n{\"limit\":{\"track\":3}}\r\n");
        assert_eq!(out.len(), 2);
        match &out[0] {
            Ok(StreamMessage::Tweet(t)) => assert_eq!(t.id_str.as_deref(), Some("1")),
            other => panic!("expected tweet, got {other:?}"),
        }
        assert!(matches!(out[1], Ok(StreamMessage::Control(_))));
    }

    #[test]
    fn skips_keep_alive_lines() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"\r\n\r\n").is_empty());
    }

    #[test]
    fn malformed_line_yields_error_without_poisoning_the_buffer() {
        let mut decoder = StreamDecoder::new();
        let out = decoder.push(b"{not json\r\n{\"id_str\":\"2\",\"text\":\"ok\"}\r\n");
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert!(matches!(out[1], Ok(StreamMessage::Tweet(_))));
    }
}
