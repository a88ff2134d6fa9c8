//! In-memory feed for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ActualOutcome, Category, EnvironmentalContext, Error, Event, Result};

use crate::{EventProvider, OutcomeSource};

/// Serves canned events, contexts and outcomes, with per-category
/// failure injection.
#[derive(Debug, Default)]
pub struct StaticFeed {
    events: RwLock<HashMap<(Category, NaiveDate), Vec<Event>>>,
    contexts: RwLock<HashMap<(String, NaiveDate), EnvironmentalContext>>,
    outcomes: RwLock<HashMap<(Category, NaiveDate), Vec<ActualOutcome>>>,
    failing_events: RwLock<HashSet<Category>>,
    failing_outcomes: RwLock<HashSet<Category>>,
    fail_contexts: RwLock<bool>,
    calls: AtomicUsize,
}

fn poisoned() -> Error {
    Error::Other("static feed lock poisoned".into())
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(self, category: Category, date: NaiveDate, events: Vec<Event>) -> Self {
        if let Ok(mut map) = self.events.write() {
            map.insert((category, date), events);
        }
        self
    }

    pub fn with_context(self, context: EnvironmentalContext) -> Self {
        if let Ok(mut map) = self.contexts.write() {
            map.insert((context.venue.clone(), context.date), context);
        }
        self
    }

    /// Replace the recorded outcomes for a category and date.
    pub fn set_outcomes(&self, category: Category, date: NaiveDate, outcomes: Vec<ActualOutcome>) {
        if let Ok(mut map) = self.outcomes.write() {
            map.insert((category, date), outcomes);
        }
    }

    pub fn with_outcomes(self, category: Category, date: NaiveDate, outcomes: Vec<ActualOutcome>) -> Self {
        self.set_outcomes(category, date, outcomes);
        self
    }

    pub fn fail_events_for(self, category: Category) -> Self {
        if let Ok(mut set) = self.failing_events.write() {
            set.insert(category);
        }
        self
    }

    pub fn fail_outcomes_for(self, category: Category) -> Self {
        if let Ok(mut set) = self.failing_outcomes.write() {
            set.insert(category);
        }
        self
    }

    pub fn fail_contexts(self) -> Self {
        if let Ok(mut flag) = self.fail_contexts.write() {
            *flag = true;
        }
        self
    }

    /// Total provider calls served, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProvider for StaticFeed {
    async fn fetch_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_events.read().map_err(|_| poisoned())?.contains(&category) {
            return Err(Error::ExternalFetch(format!("{category} events unavailable")));
        }
        Ok(self
            .events
            .read()
            .map_err(|_| poisoned())?
            .get(&(category, date))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_context(&self, venue: &str, date: NaiveDate) -> Result<EnvironmentalContext> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_contexts.read().map_err(|_| poisoned())? {
            return Err(Error::ExternalFetch(format!("context for {venue} unavailable")));
        }
        self.contexts
            .read()
            .map_err(|_| poisoned())?
            .get(&(venue.to_string(), date))
            .cloned()
            .ok_or_else(|| Error::ExternalFetch(format!("no context for {venue} on {date}")))
    }
}

#[async_trait]
impl OutcomeSource for StaticFeed {
    async fn fetch_outcomes(&self, category: Category, date: NaiveDate) -> Result<Vec<ActualOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_outcomes.read().map_err(|_| poisoned())?.contains(&category) {
            return Err(Error::ExternalFetch(format!("{category} outcomes unavailable")));
        }
        Ok(self
            .outcomes
            .read()
            .map_err(|_| poisoned())?
            .get(&(category, date))
            .cloned()
            .unwrap_or_default())
    }
}
