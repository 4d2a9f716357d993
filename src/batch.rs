#![forbid(unsafe_code)]

//! Runs the per-video pipeline over many ids on a small pool of threads.
//!
//! Workers pull ids from a shared queue and send one [`FetchOutcome`] back per
//! id. A panic inside one run is caught and recorded as a failure for that id
//! only; the other workers keep going.

use crate::client::SubtitleApi;
use crate::fetch::{FetchError, fetch_subtitle};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tempfile::NamedTempFile;
use tracing::{error, info};

pub const DEFAULT_MAX_WORKERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub video_id: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded { path: PathBuf },
    Failed { error: String },
}

impl FetchOutcome {
    pub fn from_result(video_id: &str, result: Result<PathBuf, FetchError>) -> Self {
        let status = match result {
            Ok(path) => OutcomeStatus::Succeeded { path },
            Err(err) => OutcomeStatus::Failed {
                error: err.to_string(),
            },
        };
        Self {
            video_id: video_id.to_string(),
            status,
        }
    }

    pub fn failed(video_id: &str, error: impl Into<String>) -> Self {
        Self {
            video_id: video_id.to_string(),
            status: OutcomeStatus::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.status {
            OutcomeStatus::Succeeded { path } => Some(path),
            OutcomeStatus::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Succeeded { .. } => None,
            OutcomeStatus::Failed { error } => Some(error),
        }
    }
}

/// Outcomes in completion order plus the success tally.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub outcomes: Vec<FetchOutcome>,
}

impl BatchReport {
    fn record(&mut self, outcome: FetchOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn get(&self, video_id: &str) -> Option<&FetchOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.video_id == video_id)
    }

    /// Keyed view of the outcomes. Repeated ids keep the last completion.
    pub fn into_map(self) -> HashMap<String, FetchOutcome> {
        self.outcomes
            .into_iter()
            .map(|outcome| (outcome.video_id.clone(), outcome))
            .collect()
    }

    /// Writes the report as pretty JSON through a temp file and rename.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
        let payload = serde_json::to_vec_pretty(self).context("serializing batch report")?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Creating temp file in {}", parent.display()))?;
        tmp.write_all(&payload)
            .with_context(|| format!("Writing {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("Persisting {}", path.display()))?;
        Ok(())
    }
}

/// Fetches subtitles for every id with at most `max_workers` in flight.
///
/// Only a failure to create `output_dir` is returned as an error; everything
/// else ends up in the report.
pub fn run_batch<A: SubtitleApi + Sync + ?Sized>(
    api: &A,
    video_ids: &[String],
    output_dir: &Path,
    max_workers: usize,
) -> Result<BatchReport> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Creating output directory {}", output_dir.display()))?;

    let mut report = BatchReport {
        total: video_ids.len(),
        ..BatchReport::default()
    };
    if video_ids.is_empty() {
        return Ok(report);
    }

    let workers = max_workers.max(1).min(video_ids.len());
    info!(total = video_ids.len(), workers, "starting batch");

    let queue = Mutex::new(video_ids.iter());
    let (sender, receiver) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let queue = &queue;
            scope.spawn(move || {
                loop {
                    let Some(video_id) = queue.lock().next() else {
                        break;
                    };
                    let outcome = run_isolated(api, video_id, output_dir);
                    if sender.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(sender);

        for outcome in receiver {
            report.record(outcome);
        }
    });

    info!(
        "batch finished: {}/{} succeeded",
        report.succeeded, report.total
    );
    Ok(report)
}

fn run_isolated<A: SubtitleApi + ?Sized>(
    api: &A,
    video_id: &str,
    output_dir: &Path,
) -> FetchOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| fetch_subtitle(api, video_id, output_dir))) {
        Ok(result) => FetchOutcome::from_result(video_id, result),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(video_id, "fetch panicked: {message}");
            FetchOutcome::failed(video_id, format!("unexpected error: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
