//! Input sanitising before scoring.
//!
//! Malformed candidates are dropped one by one; an event is dropped only
//! when its identity is unusable or nothing valid is left in its field.

use std::collections::HashSet;

use common::{Candidate, Category, Error, Event};
use serde::Serialize;
use tracing::warn;

/// What sanitising removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SanitizeReport {
    pub kept_events: usize,
    pub dropped_events: usize,
    pub dropped_candidates: usize,
    pub issues: Vec<String>,
}

impl SanitizeReport {
    fn record(&mut self, err: Error) {
        warn!("{}", err);
        self.issues.push(err.to_string());
    }
}

fn check_candidate(candidate: &Candidate) -> Result<(), String> {
    if candidate.entry_number == 0 {
        return Err("entry number 0".into());
    }
    if !candidate.odds.is_finite() || candidate.odds <= 0.0 {
        return Err(format!("invalid odds {}", candidate.odds));
    }
    Ok(())
}

fn check_event(category: Category, event: &Event) -> Result<(), String> {
    if event.key.category != category {
        return Err(format!("category {} expected {}", event.key.category, category));
    }
    if event.key.venue.trim().is_empty() {
        return Err("empty venue".into());
    }
    if event.key.sequence == 0 {
        return Err("sequence 0".into());
    }
    Ok(())
}

/// Drop malformed events and candidates for `category`.
pub fn sanitize_events(category: Category, events: Vec<Event>) -> (Vec<Event>, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let mut kept = Vec::with_capacity(events.len());

    for mut event in events {
        if let Err(reason) = check_event(category, &event) {
            report.record(Error::DataIntegrity(format!("event {}: {}", event.key, reason)));
            report.dropped_events += 1;
            report.dropped_candidates += event.candidates.len();
            continue;
        }

        let mut seen = HashSet::new();
        let mut field = Vec::with_capacity(event.candidates.len());
        for candidate in event.candidates.drain(..) {
            let verdict = check_candidate(&candidate).and_then(|_| {
                if seen.insert(candidate.entry_number) {
                    Ok(())
                } else {
                    Err("duplicate entry number".into())
                }
            });
            match verdict {
                Ok(()) => field.push(candidate),
                Err(reason) => {
                    report.record(Error::DataIntegrity(format!(
                        "{} #{}: {}",
                        event.key, candidate.entry_number, reason
                    )));
                    report.dropped_candidates += 1;
                }
            }
        }

        if field.is_empty() {
            report.record(Error::DataIntegrity(format!(
                "event {}: no valid candidates",
                event.key
            )));
            report.dropped_events += 1;
            continue;
        }

        event.candidates = field;
        kept.push(event);
    }

    report.kept_events = kept.len();
    (kept, report)
}
