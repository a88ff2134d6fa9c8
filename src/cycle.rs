//! Daily cycle: LEARNING → COLLECTING → SCORING → PERSISTING → RETENTION.
//!
//! For a run date `D` the cycle verifies `D-1` predictions and tunes on the
//! result, then collects, scores and persists events for `D+1`, and finally
//! prunes everything dated before `D - retention_days`. Categories are
//! isolated from each other: a failure marks that category's stage, never
//! the whole run. Only a fatal error (corrupted store, bad config) stops
//! the cycle.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{
    ActualOutcome, Category, EnvironmentalContext, Error, Event, EventKey, ForecastConfig,
    PredictionRecord, RationaleTag, Result, VerificationReport, WeightVector,
};
use dashmap::DashMap;
use feed_client::{EventProvider, OutcomeSource};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use learning::{Tuner, TuningOutcome, TuningStatus, Verifier};
use scoring::{sanitize_events, ContextMap, ScoringEngine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use store::{ArtifactKind, ArtifactStore, DataStatus, RetentionManager, RetentionResult, WeightStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::journal::{CycleJournal, SharedJournal};

// ── Report types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Learning,
    Collecting,
    Scoring,
    Persisting,
    Retention,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Learning => "learning",
            Stage::Collecting => "collecting",
            Stage::Scoring => "scoring",
            Stage::Persisting => "persisting",
            Stage::Retention => "retention",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Ok,
    /// Nothing to do for this category; not a degradation.
    NotApplicable(String),
    /// Verification ran short; prior weights stay in force.
    TuningSkipped(String),
    Failed(String),
}

impl StageOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::TuningSkipped(_) | StageOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    PartialSuccess,
    Aborted,
}

/// Rank-1 pick for one event, as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPick {
    pub event: EventKey,
    pub entry_number: u32,
    pub candidate_name: String,
    pub odds: f64,
    pub score: f64,
    pub confidence: f64,
    pub rationale: Vec<RationaleTag>,
    pub weights_version: u64,
}

impl From<&PredictionRecord> for TopPick {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            event: record.event.clone(),
            entry_number: record.entry_number,
            candidate_name: record.candidate_name.clone(),
            odds: record.odds,
            score: record.score,
            confidence: record.confidence,
            rationale: record.rationale.clone(),
            weights_version: record.weights_version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub run_date: NaiveDate,
    pub verify_date: NaiveDate,
    pub target_date: NaiveDate,
    pub status: CycleStatus,
    pub last_completed_stage: Option<Stage>,
    pub stages: BTreeMap<Category, BTreeMap<Stage, StageOutcome>>,
    pub tuning: BTreeMap<Category, TuningOutcome>,
    pub retention: Option<RetentionResult>,
    pub retention_status: Option<StageOutcome>,
    pub predictions_written: BTreeMap<Category, usize>,
    pub top_picks: BTreeMap<Category, Vec<TopPick>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleReport {
    fn new(run_date: NaiveDate, categories: &[Category]) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            run_date,
            verify_date: verify_date(run_date),
            target_date: target_date(run_date),
            status: CycleStatus::Success,
            last_completed_stage: None,
            stages: categories.iter().map(|c| (*c, BTreeMap::new())).collect(),
            tuning: BTreeMap::new(),
            retention: None,
            retention_status: None,
            predictions_written: BTreeMap::new(),
            top_picks: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn record(&mut self, category: Category, stage: Stage, outcome: StageOutcome) {
        self.stages.entry(category).or_default().insert(stage, outcome);
    }

    pub fn outcome(&self, category: Category, stage: Stage) -> Option<&StageOutcome> {
        self.stages.get(&category).and_then(|s| s.get(&stage))
    }

    pub fn is_degraded(&self) -> bool {
        self.stages
            .values()
            .flat_map(|s| s.values())
            .chain(self.retention_status.iter())
            .any(StageOutcome::is_degraded)
    }

    /// `0` success, `1` partial success or aborted.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            CycleStatus::Success => 0,
            CycleStatus::PartialSuccess | CycleStatus::Aborted => 1,
        }
    }
}

/// Shared cancellation flag, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn verify_date(run_date: NaiveDate) -> NaiveDate {
    run_date - Duration::days(1)
}

pub fn target_date(run_date: NaiveDate) -> NaiveDate {
    run_date + Duration::days(1)
}

/// Non-fatal errors become a failed stage; fatal ones propagate.
fn degrade(category: Category, stage: Stage, err: Error) -> Result<StageOutcome> {
    if err.is_fatal() {
        return Err(err);
    }
    warn!("{} {} failed: {}", category, stage, err);
    Ok(StageOutcome::Failed(err.to_string()))
}

struct Collected {
    events: Vec<Event>,
    contexts: ContextMap,
}

/// Score one category's batch off the async runtime. The batch is handed
/// back for persisting.
fn score_batch(
    category: Category,
    batch: Collected,
    weights: WeightVector,
) -> (Collected, Result<Vec<PredictionRecord>>) {
    let engine = ScoringEngine::new(category);
    let records = engine.score_with_context(&batch.events, &weights, &batch.contexts);
    if records.is_ok() {
        info!(
            "{}: scored {} event(s) with weights v{}",
            category,
            batch.events.len(),
            weights.version
        );
    }
    (batch, records)
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    config: ForecastConfig,
    artifacts: ArtifactStore,
    weights: WeightStore,
    provider: Arc<dyn EventProvider>,
    outcomes: Arc<dyn OutcomeSource>,
    journal: SharedJournal,
    abort: AbortHandle,
    verifier: Verifier,
    tuner: Tuner,
    contexts: Arc<DashMap<(String, NaiveDate), EnvironmentalContext>>,
}

impl Orchestrator {
    pub fn new(
        config: ForecastConfig,
        provider: Arc<dyn EventProvider>,
        outcomes: Arc<dyn OutcomeSource>,
    ) -> Result<Self> {
        let artifacts = ArtifactStore::open(config.data_dir.clone())?;
        let weights = WeightStore::open(&config.data_dir)?;
        let journal = CycleJournal::open(artifacts.kind_dir(ArtifactKind::AuditLog))?.shared();
        let verifier = Verifier::new(config.verification.clone());
        let tuner = Tuner::new(
            config.tuning.clone(),
            config.verification.min_segment_samples,
        );
        Ok(Self {
            config,
            artifacts,
            weights,
            provider,
            outcomes,
            journal,
            abort: AbortHandle::new(),
            verifier,
            tuner,
            contexts: Arc::new(DashMap::new()),
        })
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn weight_store(&self) -> &WeightStore {
        &self.weights
    }

    async fn note(&self, day: NaiveDate, kind: &str, fields: Value) {
        self.journal.lock().await.write_event(day, kind, fields);
    }

    /// Run one full cycle for `run_date`.
    pub async fn run_cycle(&self, run_date: NaiveDate) -> Result<CycleReport> {
        let categories = self.config.categories.clone();
        let mut report = CycleReport::new(run_date, &categories);
        self.contexts.clear();

        info!(
            "Cycle {} for {}: verify {}, forecast {}",
            report.cycle_id, run_date, report.verify_date, report.target_date
        );
        self.note(
            run_date,
            "cycle_start",
            json!({
                "cycle_id": report.cycle_id,
                "verify_date": report.verify_date,
                "target_date": report.target_date,
                "categories": categories,
            }),
        )
        .await;

        // ── LEARNING ─────────────────────────────────────────────────
        if self.abort.is_aborted() {
            return Ok(self.finish(report).await);
        }
        let learned = join_all(categories.iter().map(|&c| self.learn(c, run_date))).await;
        for (&category, result) in categories.iter().zip(learned) {
            let outcome = match result {
                Ok((outcome, tuning)) => {
                    if let Some(tuning) = tuning {
                        report.tuning.insert(category, tuning);
                    }
                    outcome
                }
                Err(e) => degrade(category, Stage::Learning, e)?,
            };
            report.record(category, Stage::Learning, outcome);
        }
        self.stage_complete(&mut report, Stage::Learning).await;

        // ── COLLECTING ───────────────────────────────────────────────
        if self.abort.is_aborted() {
            return Ok(self.finish(report).await);
        }
        let target = report.target_date;
        let fetched = join_all(categories.iter().map(|&c| self.collect(c, target))).await;
        let mut collected: BTreeMap<Category, Collected> = BTreeMap::new();
        for (&category, result) in categories.iter().zip(fetched) {
            let outcome = match result {
                Ok(batch) => {
                    info!(
                        "{}: {} event(s), {} context(s) for {}",
                        category,
                        batch.events.len(),
                        batch.contexts.len(),
                        target
                    );
                    collected.insert(category, batch);
                    StageOutcome::Ok
                }
                Err(e) => degrade(category, Stage::Collecting, e)?,
            };
            report.record(category, Stage::Collecting, outcome);
        }
        self.stage_complete(&mut report, Stage::Collecting).await;

        // ── SCORING ──────────────────────────────────────────────────
        if self.abort.is_aborted() {
            return Ok(self.finish(report).await);
        }
        let mut scored: BTreeMap<Category, Vec<PredictionRecord>> = BTreeMap::new();
        let mut jobs = Vec::new();
        for &category in &categories {
            let Some(batch) = collected.remove(&category) else {
                report.record(
                    category,
                    Stage::Scoring,
                    StageOutcome::NotApplicable("collection failed".into()),
                );
                continue;
            };
            match self.scoring_weights(category, target) {
                Ok(weights) => jobs.push((
                    category,
                    tokio::task::spawn_blocking(move || score_batch(category, batch, weights)),
                )),
                Err(e) => {
                    let outcome = degrade(category, Stage::Scoring, e)?;
                    report.record(category, Stage::Scoring, outcome);
                }
            }
        }
        let finished = join_all(
            jobs.into_iter()
                .map(|(category, job)| async move { (category, job.await) }),
        )
        .await;
        for (category, joined) in finished {
            let outcome = match joined {
                Ok((batch, Ok(records))) => {
                    collected.insert(category, batch);
                    scored.insert(category, records);
                    StageOutcome::Ok
                }
                Ok((_, Err(e))) => degrade(category, Stage::Scoring, e)?,
                Err(e) => {
                    warn!("{} scoring task failed: {}", category, e);
                    StageOutcome::Failed(format!("scoring task failed: {e}"))
                }
            };
            report.record(category, Stage::Scoring, outcome);
        }
        self.stage_complete(&mut report, Stage::Scoring).await;

        // ── PERSISTING ───────────────────────────────────────────────
        if self.abort.is_aborted() {
            return Ok(self.finish(report).await);
        }
        for &category in &categories {
            let (Some(batch), Some(records)) = (collected.get(&category), scored.get(&category))
            else {
                report.record(
                    category,
                    Stage::Persisting,
                    StageOutcome::NotApplicable("nothing scored".into()),
                );
                continue;
            };
            let outcome = match self.persist(category, target, batch, records) {
                Ok(()) => {
                    report.predictions_written.insert(category, records.len());
                    report.top_picks.insert(
                        category,
                        records
                            .iter()
                            .filter(|r| r.predicted_winner)
                            .map(TopPick::from)
                            .collect(),
                    );
                    StageOutcome::Ok
                }
                Err(e) => degrade(category, Stage::Persisting, e)?,
            };
            report.record(category, Stage::Persisting, outcome);
        }
        self.stage_complete(&mut report, Stage::Persisting).await;

        // ── RETENTION ────────────────────────────────────────────────
        if self.abort.is_aborted() {
            return Ok(self.finish(report).await);
        }
        let retention_status = match self.prune(run_date, self.config.retention.retention_days).await {
            Ok(result) => {
                report.retention = Some(result);
                StageOutcome::Ok
            }
            Err(e) if !e.is_fatal() => {
                warn!("Retention failed: {}", e);
                StageOutcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };
        report.retention_status = Some(retention_status);
        self.stage_complete(&mut report, Stage::Retention).await;

        Ok(self.finish(report).await)
    }

    async fn stage_complete(&self, report: &mut CycleReport, stage: Stage) {
        report.last_completed_stage = Some(stage);
        let outcomes: BTreeMap<Category, Option<&StageOutcome>> = report
            .stages
            .keys()
            .map(|c| (*c, report.outcome(*c, stage)))
            .collect();
        self.note(
            report.run_date,
            "stage_complete",
            json!({
                "cycle_id": report.cycle_id,
                "stage": stage,
                "outcomes": outcomes,
            }),
        )
        .await;
    }

    async fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.status = if self.abort.is_aborted() && report.last_completed_stage != Some(Stage::Retention) {
            CycleStatus::Aborted
        } else if report.is_degraded() {
            CycleStatus::PartialSuccess
        } else {
            CycleStatus::Success
        };
        report.finished_at = Some(Utc::now());

        match report.status {
            CycleStatus::Aborted => warn!(
                "Cycle {} aborted after {:?}",
                report.cycle_id, report.last_completed_stage
            ),
            status => info!("Cycle {} finished: {:?}", report.cycle_id, status),
        }
        self.note(
            report.run_date,
            "cycle_summary",
            json!({
                "cycle_id": report.cycle_id,
                "status": report.status,
                "last_completed_stage": report.last_completed_stage,
                "stages": report.stages,
                "predictions_written": report.predictions_written,
            }),
        )
        .await;
        report
    }

    // ── LEARNING ────────────────────────────────────────────────────

    async fn learn(
        &self,
        category: Category,
        run_date: NaiveDate,
    ) -> Result<(StageOutcome, Option<TuningOutcome>)> {
        let day = verify_date(run_date);
        self.backfill_gaps(category, run_date).await?;

        let predictions = self.artifacts.load_predictions(category, day)?;
        if predictions.is_empty() {
            return Ok((
                StageOutcome::NotApplicable(format!("no predictions for {day}")),
                None,
            ));
        }

        let outcomes = match self.outcomes.fetch_outcomes(category, day).await {
            Ok(outcomes) => outcomes,
            Err(e) if !e.is_fatal() => {
                let reason = format!("outcomes unavailable: {e}");
                return Ok((self.tuning_skipped(category, run_date, reason).await, None));
            }
            Err(e) => return Err(e),
        };

        let report = self.verifier.verify(category, day, &predictions, &outcomes);
        self.artifacts.save_verifications(category, day, &report.records)?;
        self.artifacts.save_report(&report)?;
        info!(
            "{} {}: {}/{} correct, {} gap(s)",
            category,
            day,
            report.correct,
            report.matched,
            report.gaps.len()
        );

        if !report.is_complete() {
            let reason = format!("{} event(s) awaiting outcomes", report.gaps.len());
            return Ok((self.tuning_skipped(category, run_date, reason).await, None));
        }

        let tuning = self.tune_category(category, run_date).await?;
        Ok((StageOutcome::Ok, Some(tuning)))
    }

    async fn tuning_skipped(&self, category: Category, run_date: NaiveDate, reason: String) -> StageOutcome {
        warn!("{} tuning skipped: {}", category, reason);
        self.note(
            run_date,
            "tuning_skipped",
            json!({ "category": category, "reason": reason }),
        )
        .await;
        StageOutcome::TuningSkipped(reason)
    }

    /// Re-verify every earlier day whose predictions still include events
    /// without a verification record, however old. Resolved events become
    /// prunable in this same cycle.
    async fn backfill_gaps(&self, category: Category, run_date: NaiveDate) -> Result<usize> {
        let before = verify_date(run_date);
        let days: BTreeSet<NaiveDate> = self
            .artifacts
            .list_batches(ArtifactKind::Predictions)?
            .into_iter()
            .filter(|f| f.category == category && f.date < before && f.record_count > 0)
            .map(|f| f.date)
            .collect();

        let mut refreshed = 0;
        for day in days {
            let predictions = self.artifacts.load_predictions(category, day)?;
            let existing = self.artifacts.load_verifications(category, day)?;
            let verified: HashSet<&EventKey> = existing.iter().map(|r| &r.event).collect();
            let pending: HashSet<&EventKey> = predictions
                .iter()
                .map(|p| &p.event)
                .filter(|k| !verified.contains(k))
                .collect();
            if pending.is_empty() {
                continue;
            }

            let mut outcomes = match self.outcomes.fetch_outcomes(category, day).await {
                Ok(outcomes) => outcomes,
                Err(e) if !e.is_fatal() => {
                    warn!("{} {} back-fill skipped: {}", category, day, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            // Outcomes already verified on an earlier run keep counting.
            let fetched: HashSet<EventKey> = outcomes.iter().map(|o| o.event.clone()).collect();
            outcomes.extend(
                existing
                    .iter()
                    .filter(|r| !fetched.contains(&r.event))
                    .map(|r| ActualOutcome {
                        event: r.event.clone(),
                        finish_order: r.finish_order.clone(),
                        winner_odds: r.winner_odds,
                        surface: None,
                    }),
            );
            let report = self.verifier.verify(category, day, &predictions, &outcomes);
            let resolved = report
                .records
                .iter()
                .filter(|r| pending.contains(&r.event))
                .count();
            if resolved == 0 {
                continue;
            }

            let fresh: HashSet<&EventKey> = report.records.iter().map(|r| &r.event).collect();
            let mut records: Vec<_> = existing
                .iter()
                .filter(|r| !fresh.contains(&r.event))
                .cloned()
                .collect();
            records.extend(report.records.iter().cloned());
            records.sort_by(|a, b| a.event.cmp(&b.event));
            self.artifacts.save_verifications(category, day, &records)?;
            self.artifacts.save_report(&report)?;
            info!(
                "{} {}: back-filled {} event(s), {} still pending",
                category,
                day,
                resolved,
                pending.len() - resolved
            );
            self.note(
                run_date,
                "backfill",
                json!({ "category": category, "date": day, "resolved": resolved }),
            )
            .await;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    async fn tune_category(&self, category: Category, run_date: NaiveDate) -> Result<TuningOutcome> {
        let from = run_date - Duration::days(self.config.tuning.window_days);
        let history = self
            .artifacts
            .load_reports_between(category, from, verify_date(run_date))?;
        let defaults = ScoringEngine::new(category).default_weights(run_date)?;
        let outcome =
            self.tuner
                .tune_and_commit(&self.weights, category, run_date, &history, &defaults)?;

        if outcome.status == TuningStatus::Committed {
            self.note(
                run_date,
                "weights_committed",
                json!({
                    "category": category,
                    "previous_version": outcome.previous_version,
                    "version": outcome.weights.version,
                    "weights": outcome.weights.weights,
                    "window_accuracy": outcome.window_accuracy,
                    "triggers": outcome.trace,
                }),
            )
            .await;
        }
        Ok(outcome)
    }

    // ── COLLECTING ──────────────────────────────────────────────────

    async fn collect(&self, category: Category, date: NaiveDate) -> Result<Collected> {
        let raw = self.provider.fetch_events(category, date).await?;
        let (events, sanitized) = sanitize_events(category, raw);
        if sanitized.dropped_events > 0 || sanitized.dropped_candidates > 0 {
            warn!(
                "{}: dropped {} event(s) and {} candidate(s) failing integrity checks",
                category, sanitized.dropped_events, sanitized.dropped_candidates
            );
        }
        let contexts = self.fetch_contexts(&events).await;
        Ok(Collected { events, contexts })
    }

    async fn fetch_contexts(&self, events: &[Event]) -> ContextMap {
        let venues: BTreeSet<(String, NaiveDate)> = events
            .iter()
            .map(|e| (e.key.venue.clone(), e.key.date))
            .collect();
        let limit = self.config.fetch.max_concurrent_fetches.max(1);

        stream::iter(venues)
            .map(|key| self.context_for(key))
            .buffer_unordered(limit)
            .filter_map(|found| async move { found })
            .collect()
            .await
    }

    async fn context_for(
        &self,
        key: (String, NaiveDate),
    ) -> Option<((String, NaiveDate), EnvironmentalContext)> {
        let cached = self.contexts.get(&key).map(|c| c.value().clone());
        if let Some(context) = cached {
            return Some((key, context));
        }
        match self.provider.fetch_context(&key.0, key.1).await {
            Ok(context) => {
                self.contexts.insert(key.clone(), context.clone());
                Some((key, context))
            }
            Err(e) => {
                warn!(
                    "No context for {} on {}, environment scored neutral: {}",
                    key.0, key.1, e
                );
                None
            }
        }
    }

    // ── SCORING / PERSISTING ────────────────────────────────────────

    /// Latest committed weights, or the category defaults dated `date`.
    fn scoring_weights(&self, category: Category, date: NaiveDate) -> Result<WeightVector> {
        match self.weights.current(category)? {
            Some(weights) => Ok(weights),
            None => ScoringEngine::new(category).default_weights(date),
        }
    }

    fn persist(
        &self,
        category: Category,
        date: NaiveDate,
        batch: &Collected,
        records: &[PredictionRecord],
    ) -> Result<()> {
        let mut contexts: Vec<EnvironmentalContext> = batch.contexts.values().cloned().collect();
        contexts.sort_by(|a, b| (&a.venue, a.date).cmp(&(&b.venue, b.date)));

        self.artifacts.save_events(category, date, &batch.events)?;
        self.artifacts.save_contexts(category, date, &contexts)?;
        self.artifacts.save_predictions(category, date, records)?;
        Ok(())
    }

    // ── Standalone commands ─────────────────────────────────────────

    /// Verify every configured category's predictions for `date` and store
    /// the reports. Categories whose outcomes cannot be fetched are skipped.
    pub async fn verify(&self, date: NaiveDate) -> Result<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for &category in &self.config.categories {
            let predictions = self.artifacts.load_predictions(category, date)?;
            let outcomes = match self.outcomes.fetch_outcomes(category, date).await {
                Ok(outcomes) => outcomes,
                Err(e) if !e.is_fatal() => {
                    warn!("{} {} not verified: {}", category, date, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let report = self.verifier.verify(category, date, &predictions, &outcomes);
            self.artifacts.save_verifications(category, date, &report.records)?;
            self.artifacts.save_report(&report)?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Tune `categories` on the stored reports of the window ending the day
    /// before `run_date`.
    pub async fn tune(&self, categories: &[Category], run_date: NaiveDate) -> Result<Vec<TuningOutcome>> {
        let mut outcomes = Vec::with_capacity(categories.len());
        for &category in categories {
            outcomes.push(self.tune_category(category, run_date).await?);
        }
        Ok(outcomes)
    }

    pub async fn prune(&self, now: NaiveDate, retention_days: i64) -> Result<RetentionResult> {
        let result = RetentionManager::new(&self.artifacts).prune(now, retention_days)?;
        info!(
            "Retention before {}: {} record(s) deleted, {} byte(s) freed, {} skipped",
            result.cutoff,
            result.deleted_count,
            result.freed_bytes,
            result.skipped.len()
        );
        self.note(
            now,
            "retention",
            json!({
                "cutoff": result.cutoff,
                "deleted_count": result.deleted_count,
                "freed_bytes": result.freed_bytes,
                "skipped": result.skipped.len(),
            }),
        )
        .await;
        Ok(result)
    }

    pub fn status(&self, as_of: NaiveDate) -> Result<DataStatus> {
        RetentionManager::new(&self.artifacts).status(as_of)
    }
}
