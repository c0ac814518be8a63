//! HTTP client for the weibo.com album endpoints and the image mirrors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, ORIGIN, REFERER};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::engine::config_loader::Network;
use crate::weibo::{AlbumSource, BlobFetcher, ListingPage, Profile, RawItem, SourceError, SourceResult};

const API_ACCEPT: &str = "application/json, text/plain, */*";
const MEDIA_REFERER: &str = "https://weibo.com/";
const MEDIA_ORIGIN: &str = "https://weibo.com";

/// Client for the listing, status and profile endpoints plus media downloads.
#[derive(Clone)]
pub struct WeiboClient {
    client: Client,
    api_base: String,
    cookie: Option<String>,
}

impl WeiboClient {
    /// Create a new client from the network section of the config
    pub fn new(network: &Network) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(&network.user_agent)
            .timeout(network.request_timeout())
            .connect_timeout(network.connect_timeout())
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .tcp_nodelay(true)
            .build()?;

        info!(
            "Initialized HTTP client: {}s request timeout, {}s connect timeout",
            network.request_timeout_secs, network.connect_timeout_secs
        );

        let cookie = Some(network.cookie.trim().to_string()).filter(|c| !c.is_empty());
        if cookie.is_none() {
            debug!("No session cookie configured, making anonymous API requests");
        }

        Ok(Self {
            client,
            api_base: network.api_base.trim_end_matches('/').to_string(),
            cookie,
        })
    }

    fn api_request(&self, path: &str, query: &[(&str, &str)]) -> RequestBuilder {
        let mut request = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .query(query)
            .header(ACCEPT, API_ACCEPT)
            .header(REFERER, MEDIA_REFERER);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }
        request
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> SourceResult<Value> {
        let response = self.api_request(path, query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl AlbumSource for WeiboClient {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_page(&self, account_id: &str, cursor: &str) -> SourceResult<ListingPage> {
        let body = self
            .get_json("/ajax/profile/getImageWall", &[("uid", account_id), ("sinceid", cursor)])
            .await?;
        parse_listing(&body)
    }

    async fn fetch_creation_time(&self, post_id: &str) -> SourceResult<Option<String>> {
        let body = self
            .get_json("/ajax/statuses/show", &[("id", post_id), ("locale", "zh-CN")])
            .await?;
        Ok(body.get("created_at").and_then(value_to_string))
    }

    async fn fetch_profile(&self, account_id: &str) -> SourceResult<Profile> {
        let body = self.get_json("/ajax/profile/info", &[("uid", account_id)]).await?;
        parse_profile(&body)
    }
}

#[async_trait]
impl BlobFetcher for WeiboClient {
    async fn fetch_bytes(&self, url: &str) -> SourceResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(REFERER, MEDIA_REFERER)
            .header(ORIGIN, MEDIA_ORIGIN)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SourceError::EmptyBody(url.to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Renders a JSON scalar as a trimmed string; numbers are accepted because
/// the API mixes both for ids and dates.
fn value_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(text).filter(|t| !t.is_empty())
}

/// Converts one listing entry. Non-object entries yield `None`.
fn parse_item(value: &Value) -> Option<RawItem> {
    let object = value.as_object()?;
    let field = |name: &str| object.get(name).and_then(value_to_string);

    Some(RawItem {
        photo_id: field("pid"),
        post_id: field("mid"),
        timeline_year: field("timeline_year"),
        timeline_month: field("timeline_month"),
        is_motion_photo: object.get("type").and_then(Value::as_str) == Some("livephoto"),
        video: field("video"),
    })
}

fn parse_listing(body: &Value) -> SourceResult<ListingPage> {
    let data = body
        .get("data")
        .filter(|data| data.is_object())
        .ok_or_else(|| SourceError::InvalidResponse("listing response has no data object".to_string()))?;

    let items = data
        .get("list")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(parse_item).collect())
        .unwrap_or_default();

    Ok(ListingPage {
        items,
        next_cursor: data.get("since_id").and_then(value_to_string),
    })
}

fn parse_profile(body: &Value) -> SourceResult<Profile> {
    let ok = body.get("ok").and_then(value_to_string);
    if ok.as_deref() != Some("1") {
        return Err(SourceError::InvalidResponse("profile response is not ok".to_string()));
    }

    Ok(Profile {
        display_name: body.pointer("/data/user/screen_name").and_then(value_to_string),
    })
}
