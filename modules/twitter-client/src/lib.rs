pub mod error;
pub mod oauth;
pub mod stream;
pub mod types;

pub use error::{Result, TwitterError};
pub use oauth::Credentials;
pub use stream::{StreamDecoder, StreamMessage};
pub use types::{Entities, FriendsPage, Media, Size, Sizes, Tweet, User};

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;

const API_BASE: &str = "https://api.twitter.com/1.1";

/// Requests that are not the stream give up after this long.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest page the v1.1 list endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 200;

pub struct TwitterClient {
    client: reqwest::Client,
    /// Same as `client` but never follows redirects; used to resolve short links.
    no_redirect: reqwest::Client,
    credentials: Credentials,
    api_base: String,
    stream_base: String,
}

impl TwitterClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let no_redirect = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect,
            credentials,
            api_base: API_BASE.to_string(),
            stream_base: stream::default_stream_base(),
        })
    }

    /// Signed GET against `{api_base}/{endpoint}.json`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}.json", self.api_base, endpoint);
        let auth = self.credentials.authorization("GET", &url, params)?;

        let resp = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .query(params)
            .header(AUTHORIZATION, auth)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Signed form POST against `{api_base}/{endpoint}.json`.
    pub async fn post(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}.json", self.api_base, endpoint);
        let resp = self.signed_post(&url, params).await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    pub(crate) async fn signed_post(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let auth = self.credentials.authorization("POST", url, params)?;
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(oauth::form_body(params))
            .send()
            .await?;
        Ok(resp)
    }

    /// Every account `screen_name` follows, walking `friends/list` cursors until exhausted.
    pub async fn following(&self, screen_name: &str) -> Result<Vec<User>> {
        let mut users = Vec::new();
        let mut cursor: i64 = -1;
        while cursor != 0 {
            tracing::info!(screen_name, cursor, "Reading friends/list");
            let page: FriendsPage = self
                .get(
                    "friends/list",
                    &[
                        ("screen_name", screen_name.to_string()),
                        ("count", MAX_PAGE_SIZE.to_string()),
                        ("cursor", cursor.to_string()),
                    ],
                )
                .await?;
            cursor = page.next_cursor;
            users.extend(page.users);
        }
        tracing::info!(count = users.len(), "Fetched following list");
        Ok(users)
    }

    pub async fn favorites_list(&self, screen_name: &str, count: u32) -> Result<Vec<Tweet>> {
        self.get(
            "favorites/list",
            &[
                ("screen_name", screen_name.to_string()),
                ("count", count.to_string()),
            ],
        )
        .await
    }

    pub async fn user_timeline(&self, screen_name: &str, count: u32) -> Result<Vec<Tweet>> {
        self.get(
            "statuses/user_timeline",
            &[
                ("screen_name", screen_name.to_string()),
                ("count", count.to_string()),
            ],
        )
        .await
    }

    pub async fn home_timeline(&self, count: u32) -> Result<Vec<Tweet>> {
        self.get("statuses/home_timeline", &[("count", count.to_string())])
            .await
    }

    /// Like a status. Liking an already-liked status is reported as an API error.
    pub async fn create_favorite(&self, id: &str) -> Result<()> {
        self.post(
            "favorites/create",
            &[
                ("id", id.to_string()),
                ("include_entities", "false".to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Follow an account without enabling device notifications.
    pub async fn create_friendship(&self, screen_name: &str) -> Result<()> {
        self.post(
            "friendships/create",
            &[
                ("screen_name", screen_name.to_string()),
                ("follow", "false".to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Download a media file. Media URLs are public, so the request is unsigned.
    pub async fn fetch_media(&self, url: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.bytes().await?)
    }

    /// Issue a single request without following redirects and return its `Location` header.
    pub async fn resolve_redirect(&self, url: &str) -> Result<String> {
        let resp = self.no_redirect.get(url).send().await?;
        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TwitterError::MissingRedirect(url.to_string()))
    }
}
