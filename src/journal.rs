//! Append-only audit journal: one JSONL file per run day under `audit/`.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::warn;

pub type SharedJournal = Arc<Mutex<CycleJournal>>;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct CycleJournal {
    dir: PathBuf,
    day: Option<NaiveDate>,
    file: Option<File>,
}

impl CycleJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            day: None,
            file: None,
        })
    }

    pub fn shared(self) -> SharedJournal {
        Arc::new(Mutex::new(self))
    }

    fn day_path(dir: &Path, day: NaiveDate) -> PathBuf {
        dir.join(format!("audit-{}.jsonl", day))
    }

    fn rotate_if_needed(&mut self, day: NaiveDate) -> std::io::Result<&mut File> {
        if self.day != Some(day) || self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(Self::day_path(&self.dir, day))?;
            self.file = Some(file);
            self.day = Some(day);
        }
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("journal file not open"))
    }

    /// Append one line. `fields` must be a JSON object; `ts`, `day` and
    /// `kind` are added. Failures are logged and swallowed.
    pub fn write_event(&mut self, day: NaiveDate, kind: &str, fields: Value) {
        let mut line = json!({
            "ts": now_iso(),
            "day": day.to_string(),
            "kind": kind,
        });
        if let (Some(obj), Value::Object(extra)) = (line.as_object_mut(), fields) {
            for (k, v) in extra {
                obj.entry(k).or_insert(v);
            }
        }

        let result = (|| -> std::io::Result<()> {
            let file = self.rotate_if_needed(day)?;
            let text = serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string());
            writeln!(file, "{}", text)?;
            file.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!("Audit journal write failed: {}", e);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
