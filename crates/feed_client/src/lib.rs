//! Race data feed.
//!
//! The cycle only sees the [`EventProvider`] and [`OutcomeSource`] traits.
//! [`HttpFeedClient`] talks to the live feed, [`StaticFeed`] serves canned
//! data, and [`RetryingFeed`] wraps either with the retry policy.

pub mod fixtures;
pub mod http;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ActualOutcome, Category, EnvironmentalContext, Event, Result};

pub use fixtures::StaticFeed;
pub use http::HttpFeedClient;
pub use retry::RetryPolicy;

/// Supplies events with their fields and venue conditions.
#[async_trait]
pub trait EventProvider: Send + Sync {
    async fn fetch_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>>;

    async fn fetch_context(&self, venue: &str, date: NaiveDate) -> Result<EnvironmentalContext>;
}

/// Supplies recorded results.
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    async fn fetch_outcomes(&self, category: Category, date: NaiveDate) -> Result<Vec<ActualOutcome>>;
}

#[async_trait]
impl<T: EventProvider + ?Sized> EventProvider for Arc<T> {
    async fn fetch_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>> {
        (**self).fetch_events(category, date).await
    }

    async fn fetch_context(&self, venue: &str, date: NaiveDate) -> Result<EnvironmentalContext> {
        (**self).fetch_context(venue, date).await
    }
}

#[async_trait]
impl<T: OutcomeSource + ?Sized> OutcomeSource for Arc<T> {
    async fn fetch_outcomes(&self, category: Category, date: NaiveDate) -> Result<Vec<ActualOutcome>> {
        (**self).fetch_outcomes(category, date).await
    }
}

/// Applies a [`RetryPolicy`] to every call of the wrapped feed.
pub struct RetryingFeed<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F> RetryingFeed<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: EventProvider> EventProvider for RetryingFeed<F> {
    async fn fetch_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>> {
        let label = format!("fetch_events({category}, {date})");
        self.policy
            .run(&label, || self.inner.fetch_events(category, date))
            .await
    }

    async fn fetch_context(&self, venue: &str, date: NaiveDate) -> Result<EnvironmentalContext> {
        let label = format!("fetch_context({venue}, {date})");
        self.policy
            .run(&label, || self.inner.fetch_context(venue, date))
            .await
    }
}

#[async_trait]
impl<F: OutcomeSource> OutcomeSource for RetryingFeed<F> {
    async fn fetch_outcomes(&self, category: Category, date: NaiveDate) -> Result<Vec<ActualOutcome>> {
        let label = format!("fetch_outcomes({category}, {date})");
        self.policy
            .run(&label, || self.inner.fetch_outcomes(category, date))
            .await
    }
}
