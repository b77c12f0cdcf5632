//! Calibration log
//!
//! Append-only, time-ordered JSONL record of every scored candidate
//! (published or shadow) and every resolved outcome. Offline consumers
//! pair the two by signal id to recalibrate detector and scorer
//! thresholds; this module only defines the log contract and the writer.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;
use types::{OutcomeRecord, PatternCandidate, SignalId};

/// One line in the calibration log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationEntry {
    /// A scored candidate, shadow or published
    Candidate {
        signal_id: SignalId,
        candidate: PatternCandidate,
        final_score: u8,
        /// False for shadow candidates dropped below the minimum score
        published: bool,
        logged_at: DateTime<Utc>,
    },
    /// The eventual resolution, keyed back to the candidate by signal id
    Outcome {
        record: OutcomeRecord,
        logged_at: DateTime<Utc>,
    },
}

pub struct CalibrationLog {
    writer: Mutex<BufWriter<File>>,
}

impl CalibrationLog {
    /// Open (or create) the log in append mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn log_candidate(
        &self,
        signal_id: SignalId,
        candidate: PatternCandidate,
        final_score: u8,
        published: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.append(&CalibrationEntry::Candidate {
            signal_id,
            candidate,
            final_score,
            published,
            logged_at: now,
        })
    }

    pub fn log_outcome(&self, record: OutcomeRecord, now: DateTime<Utc>) -> Result<()> {
        self.append(&CalibrationEntry::Outcome {
            record,
            logged_at: now,
        })
    }

    fn append(&self, entry: &CalibrationEntry) -> Result<()> {
        let line = serde_json::to_string(entry).map_err(|e| {
            crate::error::EngineError::Configuration {
                message: format!("calibration entry not serializable: {e}"),
            }
        })?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        // Flush per entry: the log must survive a crash mid-session
        writer.flush()?;
        debug!("calibration entry appended");
        Ok(())
    }
}
