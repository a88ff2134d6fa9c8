//! HTTP adapter for the race data feed.
//!
//! Endpoints (JSON bodies in the shared domain schema):
//! `GET {base}/events/{category}/{date}`, `GET {base}/contexts/{venue}/{date}`,
//! `GET {base}/outcomes/{category}/{date}`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::{FeedConfig, FetchConfig};
use common::{ActualOutcome, Candidate, Category, EnvironmentalContext, Error, Event, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{EventProvider, OutcomeSource};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Feed client with connection pooling and a shared request-rate limit.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    limiter: Arc<Limiter>,
}

impl HttpFeedClient {
    pub fn new(feed: &FeedConfig, fetch: &FetchConfig) -> Result<Self> {
        let base_url = Url::parse(&feed.base_url)
            .map_err(|e| Error::Config(format!("feed.base_url {}: {}", feed.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "feed.base_url {} cannot be a base URL",
                feed.base_url
            )));
        }
        let rps = NonZeroU32::new(fetch.requests_per_second)
            .ok_or_else(|| Error::Config("fetch.requests_per_second must be > 0".into()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("forecast-bot/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(fetch.max_concurrent_fetches.max(1))
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build feed HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: feed.api_key.clone(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        self.limiter.until_ready().await;
        debug!("GET {}", url);

        let mut request = self.client.get(url.clone());
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| Error::ExternalFetch(format!("HTTP error for {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(500).collect();
            return Err(Error::ExternalFetch(format!(
                "feed returned {} for {}: {}",
                status.as_u16(),
                url,
                snippet
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::ExternalFetch(format!("body read failed for {}: {}", url, e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::DataIntegrity(format!("malformed payload from {}: {}", url, e)))
    }
}

/// Decode an events payload one record at a time. A malformed event or
/// candidate is dropped with a warning instead of failing the whole batch.
pub fn decode_events(raw: Vec<Value>) -> Vec<Event> {
    let mut events = Vec::with_capacity(raw.len());
    for (idx, mut value) in raw.into_iter().enumerate() {
        let candidates = match value.as_object_mut().and_then(|o| o.remove("candidates")) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                warn!(
                    "Event #{}: candidates is not a list ({}), keeping none",
                    idx, other
                );
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut event: Event = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                let err = Error::DataIntegrity(format!("event #{} dropped: {}", idx, e));
                warn!("{}", err);
                continue;
            }
        };

        for (pos, item) in candidates.into_iter().enumerate() {
            match serde_json::from_value::<Candidate>(item) {
                Ok(candidate) => event.candidates.push(candidate),
                Err(e) => {
                    let err = Error::DataIntegrity(format!(
                        "{} candidate #{} dropped: {}",
                        event.key, pos, e
                    ));
                    warn!("{}", err);
                }
            }
        }
        events.push(event);
    }
    events
}

#[async_trait]
impl EventProvider for HttpFeedClient {
    async fn fetch_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>> {
        let day = date.to_string();
        let raw: Vec<Value> = self.get_json(&["events", category.as_str(), &day]).await?;
        Ok(decode_events(raw))
    }

    async fn fetch_context(&self, venue: &str, date: NaiveDate) -> Result<EnvironmentalContext> {
        let day = date.to_string();
        self.get_json(&["contexts", venue, &day]).await
    }
}

#[async_trait]
impl OutcomeSource for HttpFeedClient {
    async fn fetch_outcomes(
        &self,
        category: Category,
        date: NaiveDate,
    ) -> Result<Vec<ActualOutcome>> {
        let day = date.to_string();
        self.get_json(&["outcomes", category.as_str(), &day]).await
    }
}
