//! Run log for a flux analysis.
//!
//! Tracks what each stage processed, records recoverable conditions such as
//! events with no matching sample, and can be persisted next to the outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// An event with no matching sample in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingSample {
    pub channel: usize,
    pub start_time: String,
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed { reason: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Diagnostics collected over one run.
#[derive(Debug)]
pub struct RunLog {
    /// Unique identifier for this run
    run_id: Uuid,
    /// Number of channel series loaded
    channels_loaded: u64,
    /// Number of raw samples loaded across channels
    samples_loaded: u64,
    /// Timestamp labels that could not be parsed
    unparsed_labels: u64,
    /// Flux cells computed from data
    cells_measured: u64,
    /// Events with no matching sample, per channel
    missing_samples: Vec<MissingSample>,
    /// Stage outcomes in execution order
    stages: Vec<StageRecord>,
    /// Run start time
    started_at: DateTime<Utc>,
    /// Path for persisting the log
    persist_path: Option<PathBuf>,
}

impl RunLog {
    /// Create a new run log.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            channels_loaded: 0,
            samples_loaded: 0,
            unparsed_labels: 0,
            cells_measured: 0,
            missing_samples: Vec::new(),
            stages: Vec::new(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a run log that [`RunLog::save`] writes to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);
        log
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a loaded channel and its sample count.
    pub fn record_channel_loaded(&mut self, samples: usize) {
        self.channels_loaded += 1;
        self.samples_loaded += samples as u64;
    }

    /// Record labels skipped while indexing a channel.
    pub fn record_unparsed_labels(&mut self, count: usize) {
        self.unparsed_labels += count as u64;
    }

    /// Record a flux cell computed from data.
    pub fn record_measured_cell(&mut self) {
        self.cells_measured += 1;
    }

    /// Record an event with no matching sample in a channel.
    pub fn record_missing_sample(&mut self, channel: usize, start_time: &str) {
        self.missing_samples.push(MissingSample {
            channel,
            start_time: start_time.to_string(),
        });
    }

    /// Record the outcome of a stage.
    pub fn record_stage(&mut self, stage: &str, status: StageStatus) {
        self.stages.push(StageRecord {
            stage: stage.to_string(),
            status,
        });
    }

    pub fn missing_samples(&self) -> &[MissingSample] {
        &self.missing_samples
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Get the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            channels_loaded: self.channels_loaded,
            samples_loaded: self.samples_loaded,
            unparsed_labels: self.unparsed_labels,
            cells_measured: self.cells_measured,
            cells_missing: self.missing_samples.len() as u64,
            started_at: self.started_at,
            elapsed_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let mut summary = format!(
            "Run Statistics ({}):\n\
             - Channels loaded: {}\n\
             - Samples loaded: {}\n\
             - Unparsed timestamp labels: {}\n\
             - Flux cells measured: {}\n\
             - Missing samples: {}\n\
             - Elapsed: {} ms",
            stats.run_id,
            stats.channels_loaded,
            stats.samples_loaded,
            stats.unparsed_labels,
            stats.cells_measured,
            stats.cells_missing,
            stats.elapsed_ms
        );

        for missing in &self.missing_samples {
            summary.push_str(&format!(
                "\n   ! Channel_{} has no data at {}",
                missing.channel, missing.start_time
            ));
        }

        if !self.stages.is_empty() {
            summary.push_str("\n\nStages:");
            for record in &self.stages {
                let status = match &record.status {
                    StageStatus::Completed => "completed".to_string(),
                    StageStatus::Failed { reason } => format!("failed: {reason}"),
                    StageStatus::Skipped => "skipped".to_string(),
                };
                summary.push_str(&format!("\n - {}: {}", record.stage, status));
            }
        }

        summary
    }

    /// Save the log to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedLog {
                stats: self.stats(),
                missing_samples: self.missing_samples.clone(),
                stages: self.stages.clone(),
                finished_at: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of run statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub channels_loaded: u64,
    pub samples_loaded: u64,
    pub unparsed_labels: u64,
    pub cells_measured: u64,
    pub cells_missing: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Log format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedLog {
    #[serde(flatten)]
    stats: RunStats,
    missing_samples: Vec<MissingSample>,
    stages: Vec<StageRecord>,
    finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_counting() {
        let mut log = RunLog::new();

        log.record_channel_loaded(100);
        log.record_channel_loaded(120);
        log.record_measured_cell();
        log.record_missing_sample(1, "10:30:00");

        let stats = log.stats();
        assert_eq!(stats.channels_loaded, 2);
        assert_eq!(stats.samples_loaded, 220);
        assert_eq!(stats.cells_measured, 1);
        assert_eq!(stats.cells_missing, 1);
        assert_eq!(log.missing_samples()[0].channel, 1);
    }

    #[test]
    fn test_summary_format() {
        let mut log = RunLog::new();
        log.record_missing_sample(2, "11:00:00");
        log.record_stage("flux", StageStatus::Completed);
        log.record_stage(
            "flux_decline",
            StageStatus::Failed {
                reason: "did not converge".to_string(),
            },
        );

        let summary = log.summary();
        assert!(summary.contains("Missing samples: 1"));
        assert!(summary.contains("Channel_2 has no data at 11:00:00"));
        assert!(summary.contains("flux_decline: failed: did not converge"));
    }

    #[test]
    fn test_save_writes_json() {
        let path = std::env::temp_dir()
            .join(format!("mfa-log-{}", Uuid::new_v4()))
            .join("run_log.json");
        let mut log = RunLog::with_persistence(path.clone());
        log.record_stage("permeance", StageStatus::Skipped);
        log.save().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["stages"][0]["stage"], "permeance");
        assert_eq!(value["stages"][0]["status"], "skipped");
        assert_eq!(value["run_id"], log.run_id().to_string());

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
