use std::collections::HashMap;
use std::collections::HashSet;

use anyhow::Context;
use attohttpc::Session;
use serde::Deserialize;
use tracing::debug;
use tracing::info;

use crate::config::DEFAULT_API_BASE_URL;
use crate::error::Error;

/// Largest page the subscriptions endpoint will return.
pub const PAGE_SIZE: u32 = 50;

/// A followed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub title: String,
    pub channel_id: String,
}

impl Subscription {
    pub fn new<T: Into<String>, I: Into<String>>(title: T, channel_id: I) -> Self {
        Self {
            title: title.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Listing of the channel's uploads.
    pub fn videos_url(&self) -> String {
        format!("https://www.youtube.com/channel/{}/videos", self.channel_id)
    }
}

/// One page of the subscription listing.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPage {
    pub subscriptions: Vec<Subscription>,
    /// Cursor of the following page; `None` on the last page.
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionsResp {
    #[serde(default)]
    items: Vec<Item>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    channel_id: String,
}

impl From<SubscriptionsResp> for SubscriptionPage {
    fn from(resp: SubscriptionsResp) -> Self {
        Self {
            subscriptions: resp
                .items
                .into_iter()
                .map(|item| Subscription {
                    title: item.snippet.title,
                    channel_id: item.snippet.resource_id.channel_id,
                })
                .collect(),
            next_page_token: resp.next_page_token,
        }
    }
}

/// A paginated listing of the user's subscriptions.
pub trait SubscriptionSource {
    fn fetch_page(&self, page_token: Option<&str>) -> anyhow::Result<SubscriptionPage>;
}

/// Collects every subscription across all pages, keyed by channel title.
///
/// Channels whose title is in `exclude` are left out. A title seen twice keeps
/// the later entry.
pub fn fetch_subscriptions<S: SubscriptionSource + ?Sized>(
    source: &S,
    exclude: &HashSet<String>,
) -> anyhow::Result<HashMap<String, Subscription>> {
    let mut subscriptions = HashMap::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = source.fetch_page(page_token.as_deref())?;
        debug!(
            items = page.subscriptions.len(),
            next = page.next_page_token.as_deref(),
            "Fetched subscription page"
        );

        for subscription in page.subscriptions {
            if exclude.contains(&subscription.title) {
                debug!(channel = subscription.title, "Excluded");
                continue;
            }
            subscriptions.insert(subscription.title.clone(), subscription);
        }

        match page.next_page_token.filter(|token| !token.is_empty()) {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    info!(count = subscriptions.len(), "Collected subscriptions");
    Ok(subscriptions)
}

/// Client for the YouTube Data API subscription listing.
pub struct YouTubeApi {
    base_url: String,
    access_token: String,
    sess: Session,
}

impl YouTubeApi {
    pub fn builder() -> YouTubeApiBuilder {
        YouTubeApiBuilder::default()
    }
}

impl SubscriptionSource for YouTubeApi {
    fn fetch_page(&self, page_token: Option<&str>) -> anyhow::Result<SubscriptionPage> {
        let mut req = self
            .sess
            .get(format!("{}/subscriptions", self.base_url))
            .param("part", "snippet")
            .param("mine", "true")
            .param("maxResults", PAGE_SIZE)
            .bearer_auth(&self.access_token);
        if let Some(token) = page_token {
            req = req.param("pageToken", token);
        }

        let resp = req.send().context("requesting subscriptions")?;
        if !resp.is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(Error::Api { status, body }.into());
        }
        let page: SubscriptionsResp = resp.json_utf8()?;
        Ok(page.into())
    }
}

#[derive(Debug)]
pub struct YouTubeApiBuilder {
    base_url: String,
    access_token: String,
}

impl YouTubeApiBuilder {
    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn access_token<S: Into<String>>(mut self, access_token: S) -> Self {
        self.access_token = access_token.into();
        self
    }

    pub fn build(self) -> YouTubeApi {
        YouTubeApi {
            base_url: self.base_url,
            access_token: self.access_token,
            sess: Session::new(),
        }
    }
}

impl Default for YouTubeApiBuilder {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_API_BASE_URL),
            access_token: String::new(),
        }
    }
}
