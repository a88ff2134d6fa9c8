//! Dated artifact collections on disk.
//!
//! One JSON [`Batch`] per kind, category and date. Every batch carries its
//! own ISO date; file names are only for humans and are never parsed.

use std::fs::{self, create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use common::{
    Category, EnvironmentalContext, Error, Event, PredictionRecord, Result, VerificationRecord,
    VerificationReport,
};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Events,
    Contexts,
    Predictions,
    Verifications,
    Reports,
    WeightHistory,
    AuditLog,
}

impl ArtifactKind {
    /// Kinds stored as dated batches and subject to retention.
    pub const DATED: [ArtifactKind; 5] = [
        ArtifactKind::Events,
        ArtifactKind::Contexts,
        ArtifactKind::Predictions,
        ArtifactKind::Verifications,
        ArtifactKind::Reports,
    ];

    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Events,
        ArtifactKind::Contexts,
        ArtifactKind::Predictions,
        ArtifactKind::Verifications,
        ArtifactKind::Reports,
        ArtifactKind::WeightHistory,
        ArtifactKind::AuditLog,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Events => "events",
            ArtifactKind::Contexts => "contexts",
            ArtifactKind::Predictions => "predictions",
            ArtifactKind::Verifications => "verifications",
            ArtifactKind::Reports => "reports",
            ArtifactKind::WeightHistory => "weights",
            ArtifactKind::AuditLog => "audit",
        }
    }

    /// Never deleted by retention.
    pub fn is_protected(&self) -> bool {
        matches!(self, ArtifactKind::WeightHistory | ArtifactKind::AuditLog)
    }
}

/// One persisted collection of records for a category and date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    pub kind: ArtifactKind,
    pub category: Category,
    pub date: NaiveDate,
    pub written_at: DateTime<Utc>,
    pub records: Vec<T>,
}

/// Identity and size of a batch file, read without decoding its records.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub category: Category,
    pub date: NaiveDate,
    pub record_count: usize,
    pub bytes: u64,
}

#[derive(Deserialize)]
struct BatchHeader {
    kind: ArtifactKind,
    category: Category,
    date: NaiveDate,
    #[serde(default)]
    records: Vec<IgnoredAny>,
}

/// Write to a uniquely named temp file beside `path`, fsync, then rename
/// over `path`. Concurrent writers never share a temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    create_dir_all(&parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Root of every dated collection.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in ArtifactKind::ALL {
            create_dir_all(root.join(kind.dir_name()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn batch_path(&self, kind: ArtifactKind, category: Category, date: NaiveDate) -> PathBuf {
        self.kind_dir(kind)
            .join(format!("{}-{}.json", category.as_str(), date))
    }

    /// Atomically replace the batch for `(kind, category, date)`.
    pub fn write_batch<T: Serialize>(
        &self,
        kind: ArtifactKind,
        category: Category,
        date: NaiveDate,
        records: &[T],
    ) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct BatchRef<'a, T> {
            kind: ArtifactKind,
            category: Category,
            date: NaiveDate,
            written_at: DateTime<Utc>,
            records: &'a [T],
        }

        let path = self.batch_path(kind, category, date);
        let data = serde_json::to_vec_pretty(&BatchRef {
            kind,
            category,
            date,
            written_at: Utc::now(),
            records,
        })?;
        write_atomic(&path, &data)?;
        debug!(
            "Wrote {} {} record(s) to {}",
            records.len(),
            kind.dir_name(),
            path.display()
        );
        Ok(path)
    }

    /// `Ok(None)` when no batch exists for that key.
    pub fn read_batch<T: DeserializeOwned>(
        &self,
        kind: ArtifactKind,
        category: Category,
        date: NaiveDate,
    ) -> Result<Option<Batch<T>>> {
        let path = self.batch_path(kind, category, date);
        if !path.exists() {
            return Ok(None);
        }
        read_batch_file(&path).map(Some)
    }

    /// Every batch file of `kind`, sorted by date then category.
    pub fn list_batches(&self, kind: ArtifactKind) -> Result<Vec<BatchFile>> {
        let dir = self.kind_dir(kind);
        let mut files = Vec::new();
        if !dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::metadata(&path)?.len();
            let raw = fs::read(&path)?;
            let header: BatchHeader = serde_json::from_slice(&raw).map_err(|e| {
                Error::DataIntegrity(format!("unreadable batch {}: {}", path.display(), e))
            })?;
            files.push(BatchFile {
                path,
                kind: header.kind,
                category: header.category,
                date: header.date,
                record_count: header.records.len(),
                bytes,
            });
        }
        files.sort_by(|a, b| (a.date, a.category).cmp(&(b.date, b.category)));
        Ok(files)
    }

    // ── Typed collections ─────────────────────────────────────────────

    pub fn save_events(&self, category: Category, date: NaiveDate, events: &[Event]) -> Result<PathBuf> {
        self.write_batch(ArtifactKind::Events, category, date, events)
    }

    pub fn load_events(&self, category: Category, date: NaiveDate) -> Result<Vec<Event>> {
        Ok(self
            .read_batch(ArtifactKind::Events, category, date)?
            .map(|b| b.records)
            .unwrap_or_default())
    }

    pub fn save_contexts(
        &self,
        category: Category,
        date: NaiveDate,
        contexts: &[EnvironmentalContext],
    ) -> Result<PathBuf> {
        self.write_batch(ArtifactKind::Contexts, category, date, contexts)
    }

    pub fn save_predictions(
        &self,
        category: Category,
        date: NaiveDate,
        records: &[PredictionRecord],
    ) -> Result<PathBuf> {
        self.write_batch(ArtifactKind::Predictions, category, date, records)
    }

    pub fn load_predictions(&self, category: Category, date: NaiveDate) -> Result<Vec<PredictionRecord>> {
        Ok(self
            .read_batch(ArtifactKind::Predictions, category, date)?
            .map(|b| b.records)
            .unwrap_or_default())
    }

    pub fn save_verifications(
        &self,
        category: Category,
        date: NaiveDate,
        records: &[VerificationRecord],
    ) -> Result<PathBuf> {
        self.write_batch(ArtifactKind::Verifications, category, date, records)
    }

    pub fn load_verifications(
        &self,
        category: Category,
        date: NaiveDate,
    ) -> Result<Vec<VerificationRecord>> {
        Ok(self
            .read_batch(ArtifactKind::Verifications, category, date)?
            .map(|b| b.records)
            .unwrap_or_default())
    }

    /// Reports are stored as a single-record batch.
    pub fn save_report(&self, report: &VerificationReport) -> Result<PathBuf> {
        self.write_batch(
            ArtifactKind::Reports,
            report.category,
            report.date,
            std::slice::from_ref(report),
        )
    }

    pub fn load_report(&self, category: Category, date: NaiveDate) -> Result<Option<VerificationReport>> {
        Ok(self
            .read_batch::<VerificationReport>(ArtifactKind::Reports, category, date)?
            .and_then(|b| b.records.into_iter().next()))
    }

    /// Stored reports for `category` dated in `[from, to]`, oldest first.
    pub fn load_reports_between(
        &self,
        category: Category,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        let mut day = from;
        while day <= to {
            if let Some(report) = self.load_report(category, day)? {
                reports.push(report);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(reports)
    }
}

pub(crate) fn read_batch_file<T: DeserializeOwned>(path: &Path) -> Result<Batch<T>> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::DataIntegrity(format!("unreadable batch {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventKey, PriceBand, RationaleTag};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    fn make_key(sequence: u32) -> EventKey {
        EventKey {
            category: Category::HorseRacing,
            venue: "Nakayama".into(),
            sequence,
            date: date(9),
        }
    }

    fn make_prediction(sequence: u32) -> PredictionRecord {
        PredictionRecord {
            event: make_key(sequence),
            entry_number: 4,
            candidate_name: "Silent Wind".into(),
            odds: 3.4,
            score: 61.25,
            rank: 1,
            predicted_winner: true,
            confidence: 0.31,
            rationale: vec![RationaleTag::StrongForm, RationaleTag::NeutralDefaults],
            weights_version: 2,
            date: date(9),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_prediction_round_trip_is_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let records = vec![make_prediction(1), make_prediction(2)];

        store
            .save_predictions(Category::HorseRacing, date(9), &records)
            .unwrap();
        let loaded = store.load_predictions(Category::HorseRacing, date(9)).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_verification_round_trip_is_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let records = vec![VerificationRecord {
            event: make_key(1),
            date: date(9),
            finish_order: vec![4, 2, 9],
            predicted_winner: 4,
            correct: true,
            winner_odds: Some(3.4),
            price_band: Some(PriceBand::MidRange),
            verdicts: vec![],
            learning_factors: vec![],
            verified_at: Utc::now(),
        }];
        store
            .save_verifications(Category::HorseRacing, date(9), &records)
            .unwrap();
        assert_eq!(
            store.load_verifications(Category::HorseRacing, date(9)).unwrap(),
            records
        );
    }

    #[test]
    fn test_missing_batch_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        assert!(store
            .load_predictions(Category::BoatRacing, date(1))
            .unwrap()
            .is_empty());
        assert!(store.load_report(Category::BoatRacing, date(1)).unwrap().is_none());
    }

    #[test]
    fn test_list_batches_reads_date_from_content() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        store
            .save_predictions(Category::HorseRacing, date(9), &[make_prediction(1)])
            .unwrap();
        // A misleading file name must not change the recorded date.
        let renamed = store.kind_dir(ArtifactKind::Predictions).join("2001-01-01.json");
        fs::rename(
            store.batch_path(ArtifactKind::Predictions, Category::HorseRacing, date(9)),
            &renamed,
        )
        .unwrap();

        let files = store.list_batches(ArtifactKind::Predictions).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].date, date(9));
        assert_eq!(files[0].record_count, 1);
    }

    #[test]
    fn test_no_tmp_file_left_after_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        store
            .save_predictions(Category::HorseRacing, date(9), &[make_prediction(1)])
            .unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.kind_dir(ArtifactKind::Predictions))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_protected_kinds() {
        assert!(ArtifactKind::WeightHistory.is_protected());
        assert!(ArtifactKind::AuditLog.is_protected());
        assert!(ArtifactKind::DATED.iter().all(|k| !k.is_protected()));
    }
}
