//! Sliding-window retention over the dated artifact collections.
//!
//! Events and predictions are pruned per record: an event that still has
//! no verification record stays on disk (and is reported) until its
//! outcome arrives. Protected kinds are never touched.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use common::{Error, Event, EventKey, PredictionRecord, Result, VerificationRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::{read_batch_file, ArtifactKind, ArtifactStore, BatchFile};

/// An artifact retention left in place, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub kind: ArtifactKind,
    pub date: Option<NaiveDate>,
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionResult {
    pub cutoff: NaiveDate,
    /// Records removed; a batch with no records counts once.
    pub deleted_count: usize,
    pub freed_bytes: u64,
    pub skipped: Vec<SkippedArtifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "0-1d")]
    UpToOneDay,
    #[serde(rename = "1-3d")]
    OneToThreeDays,
    #[serde(rename = "3-7d")]
    ThreeToSevenDays,
    #[serde(rename = "7d+")]
    OverSevenDays,
}

impl AgeBucket {
    pub fn for_age(days: i64) -> Self {
        if days <= 1 {
            AgeBucket::UpToOneDay
        } else if days <= 3 {
            AgeBucket::OneToThreeDays
        } else if days <= 7 {
            AgeBucket::ThreeToSevenDays
        } else {
            AgeBucket::OverSevenDays
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindStatus {
    pub files: usize,
    pub records: usize,
    pub bytes: u64,
    pub oldest: Option<NaiveDate>,
    pub newest: Option<NaiveDate>,
}

/// Snapshot of what is on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStatus {
    pub as_of: NaiveDate,
    pub by_kind: BTreeMap<ArtifactKind, KindStatus>,
    pub total_files: usize,
    pub total_bytes: u64,
    pub oldest: Option<NaiveDate>,
    pub newest: Option<NaiveDate>,
    /// Dated batches by age relative to `as_of`.
    pub age_histogram: BTreeMap<AgeBucket, usize>,
}

pub struct RetentionManager<'a> {
    store: &'a ArtifactStore,
}

impl<'a> RetentionManager<'a> {
    pub fn new(store: &'a ArtifactStore) -> Self {
        Self { store }
    }

    /// Delete everything dated strictly before `now - retention_days`,
    /// except protected kinds and events still awaiting verification.
    pub fn prune(&self, now: NaiveDate, retention_days: i64) -> Result<RetentionResult> {
        let cutoff = now - Duration::days(retention_days);
        let mut result = RetentionResult {
            cutoff,
            deleted_count: 0,
            freed_bytes: 0,
            skipped: Vec::new(),
        };

        let verified = self.verified_events(&mut result)?;

        self.prune_records::<Event, _>(
            ArtifactKind::Events,
            cutoff,
            &verified,
            |e| &e.key,
            &mut result,
        )?;
        self.prune_records::<PredictionRecord, _>(
            ArtifactKind::Predictions,
            cutoff,
            &verified,
            |p| &p.event,
            &mut result,
        )?;
        for kind in [
            ArtifactKind::Contexts,
            ArtifactKind::Verifications,
            ArtifactKind::Reports,
        ] {
            self.prune_whole(kind, cutoff, &mut result)?;
        }
        self.note_protected(&mut result)?;

        info!(
            "Retention: cutoff={} deleted={} freed={}B skipped={}",
            cutoff,
            result.deleted_count,
            result.freed_bytes,
            result.skipped.len()
        );
        Ok(result)
    }

    /// Keys of every event with a verification record, across all dates.
    fn verified_events(&self, result: &mut RetentionResult) -> Result<HashSet<EventKey>> {
        let mut keys = HashSet::new();
        for file in self.listed(ArtifactKind::Verifications, result)? {
            match read_batch_file::<VerificationRecord>(&file.path) {
                Ok(batch) => keys.extend(batch.records.into_iter().map(|r| r.event)),
                Err(e) => warn!("Ignoring verification batch: {}", e),
            }
        }
        Ok(keys)
    }

    /// List batches, skipping (and reporting) the directory if unreadable.
    fn listed(&self, kind: ArtifactKind, result: &mut RetentionResult) -> Result<Vec<BatchFile>> {
        match self.store.list_batches(kind) {
            Ok(files) => Ok(files),
            Err(Error::DataIntegrity(msg)) => {
                warn!("Retention skipping {}: {}", kind.dir_name(), msg);
                result.skipped.push(SkippedArtifact {
                    kind,
                    date: None,
                    target: kind.dir_name().into(),
                    reason: msg,
                });
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn prune_records<T, F>(
        &self,
        kind: ArtifactKind,
        cutoff: NaiveDate,
        verified: &HashSet<EventKey>,
        key_of: F,
        result: &mut RetentionResult,
    ) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> &EventKey,
    {
        for file in self.listed(kind, result)? {
            if file.date >= cutoff {
                continue;
            }
            let batch = read_batch_file::<T>(&file.path)?;
            let total = batch.records.len();
            let (done, pending): (Vec<T>, Vec<T>) = batch
                .records
                .into_iter()
                .partition(|r| verified.contains(key_of(r)));

            let mut pending_keys: Vec<&EventKey> = pending.iter().map(&key_of).collect();
            pending_keys.sort();
            pending_keys.dedup();
            for key in &pending_keys {
                let conflict = Error::RetentionConflict(format!(
                    "{} {} has no verification record",
                    kind.dir_name(),
                    key
                ));
                warn!("{}", conflict);
                result.skipped.push(SkippedArtifact {
                    kind,
                    date: Some(file.date),
                    target: key.to_string(),
                    reason: conflict.to_string(),
                });
            }

            if pending.is_empty() {
                fs::remove_file(&file.path)?;
                result.deleted_count += total.max(1);
                result.freed_bytes += file.bytes;
            } else if !done.is_empty() {
                let canonical = self
                    .store
                    .write_batch(kind, file.category, file.date, &pending)?;
                let new_size = fs::metadata(&canonical)?.len();
                // Batches found under a non-canonical name are rewritten canonically.
                if file.path != canonical {
                    fs::remove_file(&file.path)?;
                }
                result.deleted_count += done.len();
                result.freed_bytes += file.bytes.saturating_sub(new_size);
            }
        }
        Ok(())
    }

    fn prune_whole(
        &self,
        kind: ArtifactKind,
        cutoff: NaiveDate,
        result: &mut RetentionResult,
    ) -> Result<()> {
        for file in self.listed(kind, result)? {
            if file.date >= cutoff {
                continue;
            }
            fs::remove_file(&file.path)?;
            result.deleted_count += file.record_count.max(1);
            result.freed_bytes += file.bytes;
        }
        Ok(())
    }

    fn note_protected(&self, result: &mut RetentionResult) -> Result<()> {
        for kind in ArtifactKind::ALL.into_iter().filter(|k| k.is_protected()) {
            let dir = self.store.kind_dir(kind);
            if !dir.exists() {
                continue;
            }
            let files = fs::read_dir(&dir)?
                .filter_map(|e| e.ok())
                .filter(|e| is_data_file(&e.path()))
                .count();
            if files > 0 {
                result.skipped.push(SkippedArtifact {
                    kind,
                    date: None,
                    target: kind.dir_name().into(),
                    reason: format!("protected: {files} file(s) kept"),
                });
            }
        }
        Ok(())
    }

    /// Per-kind file counts, sizes, date range and age distribution.
    pub fn status(&self, as_of: NaiveDate) -> Result<DataStatus> {
        let mut status = DataStatus {
            as_of,
            by_kind: BTreeMap::new(),
            total_files: 0,
            total_bytes: 0,
            oldest: None,
            newest: None,
            age_histogram: BTreeMap::new(),
        };

        for kind in ArtifactKind::ALL {
            let mut kind_status = KindStatus::default();
            if kind.is_protected() {
                let dir = self.store.kind_dir(kind);
                if dir.exists() {
                    for entry in fs::read_dir(&dir)? {
                        let entry = entry?;
                        let meta = entry.metadata()?;
                        if meta.is_file() && is_data_file(&entry.path()) {
                            kind_status.files += 1;
                            kind_status.bytes += meta.len();
                        }
                    }
                }
            } else {
                for file in self.store.list_batches(kind)? {
                    kind_status.files += 1;
                    kind_status.records += file.record_count;
                    kind_status.bytes += file.bytes;
                    kind_status.oldest = Some(kind_status.oldest.map_or(file.date, |d| d.min(file.date)));
                    kind_status.newest = Some(kind_status.newest.map_or(file.date, |d| d.max(file.date)));
                    *status
                        .age_histogram
                        .entry(AgeBucket::for_age((as_of - file.date).num_days()))
                        .or_insert(0) += 1;
                }
            }

            status.total_files += kind_status.files;
            status.total_bytes += kind_status.bytes;
            if let Some(d) = kind_status.oldest {
                status.oldest = Some(status.oldest.map_or(d, |o| o.min(d)));
            }
            if let Some(d) = kind_status.newest {
                status.newest = Some(status.newest.map_or(d, |n| n.max(d)));
            }
            status.by_kind.insert(kind, kind_status);
        }

        Ok(status)
    }
}

/// Committed data only; lock and in-flight temp files are not counted.
fn is_data_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Candidate, CandidateProfile, Category};

    fn now() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()
    }

    fn make_event(date: NaiveDate, sequence: u32) -> Event {
        Event {
            key: EventKey {
                category: Category::HorseRacing,
                venue: "Kyoto".into(),
                sequence,
                date,
            },
            name: String::new(),
            scheduled_at: None,
            distance_m: Some(1600),
            declared_surface: None,
            candidates: vec![Candidate {
                entry_number: 1,
                name: "A".into(),
                odds: 2.0,
                recent_form: "○".into(),
                profile: CandidateProfile::Unknown,
            }],
        }
    }

    fn make_verification(key: &EventKey) -> VerificationRecord {
        VerificationRecord {
            event: key.clone(),
            date: key.date,
            finish_order: vec![1],
            predicted_winner: 1,
            correct: true,
            winner_odds: Some(2.0),
            price_band: None,
            verdicts: vec![],
            learning_factors: vec![],
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn test_scenario_c_verified_deleted_unverified_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let old = now() - Duration::days(8);

        let verified = make_event(old, 1);
        let pending = make_event(old, 2);
        store
            .save_events(Category::HorseRacing, old, &[verified.clone(), pending.clone()])
            .unwrap();
        store
            .save_verifications(Category::HorseRacing, old, &[make_verification(&verified.key)])
            .unwrap();

        let result = RetentionManager::new(&store).prune(now(), 7).unwrap();
        assert_eq!(result.cutoff, NaiveDate::from_ymd_opt(2025, 8, 13).unwrap());

        let remaining = store.load_events(Category::HorseRacing, old).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, pending.key);
        assert!(result.deleted_count >= 2, "event + verification record removed");
        assert!(result.freed_bytes > 0);
        assert!(result
            .skipped
            .iter()
            .any(|s| s.kind == ArtifactKind::Events && s.target == pending.key.to_string()));
    }

    #[test]
    fn test_prune_twice_deletes_nothing_more() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let old = now() - Duration::days(10);
        let verified = make_event(old, 1);
        store
            .save_events(Category::HorseRacing, old, &[verified.clone(), make_event(old, 2)])
            .unwrap();
        store
            .save_verifications(Category::HorseRacing, old, &[make_verification(&verified.key)])
            .unwrap();

        let manager = RetentionManager::new(&store);
        let first = manager.prune(now(), 7).unwrap();
        assert!(first.deleted_count > 0);
        let second = manager.prune(now(), 7).unwrap();
        assert_eq!(second.deleted_count, 0);
        assert_eq!(second.freed_bytes, 0);
    }

    #[test]
    fn test_recent_artifacts_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        // Dated exactly at the cutoff: not strictly before it.
        let at_cutoff = now() - Duration::days(7);
        store
            .save_events(Category::HorseRacing, at_cutoff, &[make_event(at_cutoff, 1)])
            .unwrap();

        let result = RetentionManager::new(&store).prune(now(), 7).unwrap();
        assert_eq!(result.deleted_count, 0);
        assert_eq!(store.load_events(Category::HorseRacing, at_cutoff).unwrap().len(), 1);
    }

    #[test]
    fn test_protected_files_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        let audit = store.kind_dir(ArtifactKind::AuditLog).join("audit-2020-01-01.jsonl");
        fs::write(&audit, b"{}\n").unwrap();

        let result = RetentionManager::new(&store).prune(now(), 7).unwrap();
        assert!(audit.exists());
        assert!(result.skipped.iter().any(|s| s.kind == ArtifactKind::AuditLog));
    }

    #[test]
    fn test_status_histogram() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        for age in [0, 2, 5, 9] {
            let d = now() - Duration::days(age);
            store
                .save_events(Category::HorseRacing, d, &[make_event(d, 1)])
                .unwrap();
        }

        let status = RetentionManager::new(&store).status(now()).unwrap();
        let events = &status.by_kind[&ArtifactKind::Events];
        assert_eq!(events.files, 4);
        assert_eq!(events.records, 4);
        assert_eq!(status.oldest, Some(now() - Duration::days(9)));
        assert_eq!(status.newest, Some(now()));
        for bucket in [
            AgeBucket::UpToOneDay,
            AgeBucket::OneToThreeDays,
            AgeBucket::ThreeToSevenDays,
            AgeBucket::OverSevenDays,
        ] {
            assert_eq!(status.age_histogram.get(&bucket), Some(&1), "{bucket:?}");
        }
    }
}
