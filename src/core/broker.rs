use crate::core::db;
use crate::core::error::SwitchyardError;
use crate::core::schemas;
use crate::core::time;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// The DB Broker is the single entry point for state access.
///
/// Every call opens a fresh connection, runs the closure under the broker's
/// lock and appends one record to the mutation audit log. Each subsystem owns
/// its broker; nothing here is process-global.
pub struct DbBroker {
    actor: String,
    audit_log_path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
    pub latency_ms: f64,
}

impl DbBroker {
    pub fn new(root: &Path, actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            audit_log_path: root.join(schemas::BROKER_EVENTS_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(&self, db_path: &Path, op_name: &str, f: F) -> Result<R, SwitchyardError>
    where
        F: FnOnce(&Connection) -> Result<R, SwitchyardError>,
    {
        self.run(db_path, op_name, |conn| f(conn))
    }

    /// Like [`with_conn`](Self::with_conn), but wraps the closure in a
    /// `BEGIN IMMEDIATE` transaction. The write lock is taken up front, so a
    /// read-modify-write inside the closure cannot lose an update to another
    /// connection. An `Err` from the closure rolls everything back.
    pub fn with_tx<F, R>(&self, db_path: &Path, op_name: &str, f: F) -> Result<R, SwitchyardError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, SwitchyardError>,
    {
        self.run(db_path, op_name, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    fn run<F, R>(&self, db_path: &Path, op_name: &str, f: F) -> Result<R, SwitchyardError>
    where
        F: FnOnce(&mut Connection) -> Result<R, SwitchyardError>,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SwitchyardError::StoreUnavailable("broker lock poisoned".to_string()))?;

        let started = Instant::now();
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let result = db::db_connect(&db_path.to_string_lossy()).and_then(|mut conn| f(&mut conn));
        let result = result.map_err(|e| {
            if e.is_unavailable() && !matches!(e, SwitchyardError::StoreUnavailable(_)) {
                SwitchyardError::StoreUnavailable(format!("{}: {}", db_id, e))
            } else {
                e
            }
        });

        let status = if result.is_ok() { "success" } else { "error" };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = self.log_event(op_name, &db_id, status, latency_ms) {
            tracing::warn!(op = op_name, error = %e, "failed to append broker audit event");
        }

        result
    }

    fn log_event(&self, op: &str, db_id: &str, status: &str, latency_ms: f64) -> Result<(), SwitchyardError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: self.actor.clone(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
            latency_ms,
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}
