//! Failure-streak governance monitor.
//!
//! Two states, Normal and Alerting, driven only by the count of consecutive
//! failures since the last success. The monitor is a signal source: it
//! never retries or rolls anything back itself. Escalation is up to the
//! caller that sees `record_failure` return `true`.
//!
//! Events go to a bounded in-memory ring and to an append-only JSONL log
//! (`governance.events.jsonl`). The log is never rewritten.

use crate::core::config::GovernanceConfig;
use crate::core::error::SwitchyardError;
use crate::core::output;
use crate::core::runtime::Switchyard;
use crate::core::time;
use clap::Subcommand;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const ALERT_MESSAGE: &str =
    "Repeated memory bus failures detected; trigger rollback/inspection.";

/// What the caller reports when an operation fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub key: String,
    pub path: String,
    pub operation: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEventKind {
    MemoryBusFailure {
        key: String,
        path: String,
        operation: String,
        error: String,
    },
    GovernanceAlert {
        message: String,
        threshold: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub ts: String,
    pub event_id: String,
    /// Failure streak at the moment the event was recorded.
    pub streak: u32,
    #[serde(flatten)]
    pub kind: GovernanceEventKind,
}

impl GovernanceEvent {
    pub fn is_alert(&self) -> bool {
        matches!(self.kind, GovernanceEventKind::GovernanceAlert { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceState {
    Normal,
    Alerting,
}

struct MonitorState {
    streak: u32,
    events: VecDeque<GovernanceEvent>,
}

/// Shared across threads behind an `Arc`; the streak and ring sit behind a
/// single mutex.
pub struct GovernanceMonitor {
    alert_threshold: u32,
    ring_capacity: usize,
    log_path: PathBuf,
    state: Mutex<MonitorState>,
}

impl GovernanceMonitor {
    pub fn new(alert_threshold: u32, log_path: &Path, ring_capacity: usize) -> Result<Self, SwitchyardError> {
        if alert_threshold == 0 {
            return Err(SwitchyardError::ValidationError(
                "alert threshold must be at least 1".to_string(),
            ));
        }
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let ring_capacity = ring_capacity.max(1);
        Ok(Self {
            alert_threshold,
            ring_capacity,
            log_path: log_path.to_path_buf(),
            state: Mutex::new(MonitorState {
                streak: 0,
                events: VecDeque::with_capacity(ring_capacity),
            }),
        })
    }

    pub fn from_config(config: &GovernanceConfig, log_path: &Path) -> Result<Self, SwitchyardError> {
        Self::new(config.alert_threshold, log_path, config.ring_capacity)
    }

    pub fn alert_threshold(&self) -> u32 {
        self.alert_threshold
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Counts a failure and logs it. Returns `true` once the streak has
    /// reached the threshold, in which case an alert event is logged too.
    pub fn record_failure(&self, report: FailureReport) -> bool {
        let mut state = self.lock();
        state.streak = state.streak.saturating_add(1);
        let streak = state.streak;

        let failure = GovernanceEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            streak,
            kind: GovernanceEventKind::MemoryBusFailure {
                key: report.key,
                path: report.path,
                operation: report.operation,
                error: report.error,
            },
        };
        self.push(&mut state, failure);

        if streak < self.alert_threshold {
            tracing::warn!(streak, threshold = self.alert_threshold, "governance failure recorded");
            return false;
        }

        let alert = GovernanceEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            streak,
            kind: GovernanceEventKind::GovernanceAlert {
                message: ALERT_MESSAGE.to_string(),
                threshold: self.alert_threshold,
            },
        };
        self.push(&mut state, alert);
        tracing::error!(streak, threshold = self.alert_threshold, "{}", ALERT_MESSAGE);
        true
    }

    /// Resets the streak. A no-op when it is already 0.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.streak > 0 {
            tracing::info!(previous_streak = state.streak, "recovered; resetting failure streak");
        }
        state.streak = 0;
    }

    pub fn failure_streak(&self) -> u32 {
        self.lock().streak
    }

    pub fn state(&self) -> GovernanceState {
        if self.failure_streak() >= self.alert_threshold {
            GovernanceState::Alerting
        } else {
            GovernanceState::Normal
        }
    }

    /// The last `limit` events from the in-memory ring, oldest first. Does
    /// not re-read the log file.
    pub fn recent_events(&self, limit: usize) -> Vec<GovernanceEvent> {
        let state = self.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // The state is two plain fields; a panic elsewhere cannot leave it
        // half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, state: &mut MonitorState, event: GovernanceEvent) {
        if let Err(e) = self.persist(&event) {
            tracing::warn!(error = %e, path = %self.log_path.display(), "failed to append governance event");
        }
        if state.events.len() == self.ring_capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    fn persist(&self, event: &GovernanceEvent) -> Result<(), SwitchyardError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }
}

/// Reads the durable governance log back, keeping the last `limit` events.
/// Blank and malformed lines are skipped; a missing file yields nothing.
pub fn load_event_log(path: &Path, limit: usize) -> Result<Vec<GovernanceEvent>, SwitchyardError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut events = VecDeque::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<GovernanceEvent>(&line) {
            Ok(ev) => {
                if events.len() == limit {
                    events.pop_front();
                }
                if limit > 0 {
                    events.push_back(ev);
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping malformed governance log line"),
        }
    }
    Ok(events.into())
}

#[derive(clap::Args, Debug)]
pub struct GovernanceCli {
    #[clap(subcommand)]
    pub command: GovernanceCommand,
}

#[derive(Subcommand, Debug)]
pub enum GovernanceCommand {
    /// Threshold and the streak as last written to the log.
    Status,
    /// Tail of the durable event log.
    Events {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn run_governance_cli(yard: &Switchyard, cli: GovernanceCli, json: bool) -> Result<(), SwitchyardError> {
    let monitor = &yard.governance;
    match cli.command {
        GovernanceCommand::Status => {
            // A fresh process starts at streak 0; the log shows where the
            // last writer left off.
            let last = load_event_log(monitor.log_path(), 1)?.pop();
            let logged_streak = last.as_ref().map(|e| e.streak).unwrap_or(0);
            let alerting = last.as_ref().is_some_and(|e| e.is_alert());
            if json {
                return output::print_envelope(
                    "governance.status",
                    serde_json::json!({
                        "alert_threshold": monitor.alert_threshold(),
                        "streak": monitor.failure_streak(),
                        "state": monitor.state(),
                        "last_logged_streak": logged_streak,
                        "last_event_was_alert": alerting,
                        "last_event_ts": last.map(|e| e.ts),
                    }),
                );
            }
            let state = if alerting {
                "ALERTING".bright_red().bold()
            } else {
                "normal".green()
            };
            println!("Governance: {}", state);
            println!("  threshold:     {}", monitor.alert_threshold());
            println!("  logged streak: {}", logged_streak);
        }
        GovernanceCommand::Events { limit } => {
            let events = load_event_log(monitor.log_path(), limit)?;
            if json {
                return output::print_envelope("governance.events", serde_json::json!({ "events": events }));
            }
            if events.is_empty() {
                println!("No governance events.");
            }
            for ev in events {
                match ev.kind {
                    GovernanceEventKind::MemoryBusFailure {
                        key,
                        operation,
                        error,
                        ..
                    } => println!(
                        "{} {} streak={} {} {}: {}",
                        ev.ts,
                        "failure".yellow(),
                        ev.streak,
                        operation,
                        key,
                        output::compact_line(&error, 80)
                    ),
                    GovernanceEventKind::GovernanceAlert { message, .. } => println!(
                        "{} {} streak={} {}",
                        ev.ts,
                        "ALERT".bright_red().bold(),
                        ev.streak,
                        message
                    ),
                }
            }
        }
    }
    Ok(())
}
