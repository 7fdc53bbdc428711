//! Reinforcement weights between named nodes.
//!
//! Each directed edge (origin -> target) carries a non-negative weight and
//! activation/success/failure counters. A success adds 1 to the weight, a
//! failure subtracts 1 with a floor at 0. Every update is a single
//! `BEGIN IMMEDIATE` transaction, so concurrent callers cannot lose updates.
//!
//! Pruning is never automatic: an edge that is recent but unlucky would be
//! discarded along with genuinely dead ones, so only an operator may call
//! [`WeightManager::prune`].

use crate::core::broker::DbBroker;
use crate::core::error::SwitchyardError;
use crate::core::output;
use crate::core::runtime::Switchyard;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::Subcommand;
use colored::Colorize;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedEdge {
    pub origin: String,
    pub target: String,
    pub weight: f64,
    pub activation_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub created_at: String,
    pub last_updated: String,
}

impl WeightedEdge {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            origin: row.get(0)?,
            target: row.get(1)?,
            weight: row.get(2)?,
            activation_count: row.get::<_, i64>(3)? as u64,
            success_count: row.get::<_, i64>(4)? as u64,
            failure_count: row.get::<_, i64>(5)? as u64,
            created_at: row.get(6)?,
            last_updated: row.get(7)?,
        })
    }
}

const EDGE_COLUMNS: &str = "origin, target, weight, activation_count, success_count, failure_count, created_at, last_updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges where the node is the origin.
    Outgoing,
    /// Edges where the node is the target.
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub total_connections: u64,
    pub average_weight: f64,
    pub max_weight: f64,
    pub total_activations: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

pub struct WeightManager {
    db_path: PathBuf,
    broker: DbBroker,
}

impl WeightManager {
    pub fn open(store: &Store) -> Result<Self, SwitchyardError> {
        let this = Self {
            db_path: store.weights_db_path(),
            broker: DbBroker::new(&store.root, "weights"),
        };
        this.broker.with_conn(&this.db_path, "weights.init", |conn| {
            conn.execute(schemas::WEIGHTS_DB_SCHEMA_EDGES, [])?;
            conn.execute(schemas::WEIGHTS_DB_INDEX_ORIGIN, [])?;
            conn.execute(schemas::WEIGHTS_DB_INDEX_TARGET, [])?;
            conn.execute(schemas::WEIGHTS_DB_INDEX_WEIGHT, [])?;
            Ok(())
        })?;
        Ok(this)
    }

    /// Success signal: weight + 1, creating the edge if needed.
    pub fn strengthen(&self, origin: &str, target: &str) -> Result<f64, SwitchyardError> {
        self.apply(origin, target, Outcome::Success)
    }

    /// Failure signal: weight - 1, floored at 0, creating the edge if needed.
    pub fn weaken(&self, origin: &str, target: &str) -> Result<f64, SwitchyardError> {
        self.apply(origin, target, Outcome::Failure)
    }

    pub fn record_outcome(&self, origin: &str, target: &str, outcome: Outcome) -> Result<f64, SwitchyardError> {
        self.apply(origin, target, outcome)
    }

    fn apply(&self, origin: &str, target: &str, outcome: Outcome) -> Result<f64, SwitchyardError> {
        validate_node(origin)?;
        validate_node(target)?;
        let now = time::now_epoch_z();

        let (op, sql) = match outcome {
            Outcome::Success => (
                "weights.strengthen",
                "INSERT INTO edges(origin, target, weight, activation_count, success_count, failure_count, created_at, last_updated)
                 VALUES(?1, ?2, 1, 1, 1, 0, ?3, ?3)
                 ON CONFLICT(origin, target) DO UPDATE SET
                     weight = weight + 1,
                     activation_count = activation_count + 1,
                     success_count = success_count + 1,
                     last_updated = excluded.last_updated",
            ),
            Outcome::Failure => (
                "weights.weaken",
                "INSERT INTO edges(origin, target, weight, activation_count, success_count, failure_count, created_at, last_updated)
                 VALUES(?1, ?2, 0, 1, 0, 1, ?3, ?3)
                 ON CONFLICT(origin, target) DO UPDATE SET
                     weight = MAX(0, weight - 1),
                     activation_count = activation_count + 1,
                     failure_count = failure_count + 1,
                     last_updated = excluded.last_updated",
            ),
        };

        let (old, new) = self.broker.with_tx(&self.db_path, op, |tx| {
            let old: f64 = tx
                .query_row(
                    "SELECT weight FROM edges WHERE origin = ?1 AND target = ?2",
                    params![origin, target],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0.0);
            tx.execute(sql, params![origin, target, now])?;
            let new: f64 = tx.query_row(
                "SELECT weight FROM edges WHERE origin = ?1 AND target = ?2",
                params![origin, target],
                |row| row.get(0),
            )?;
            Ok((old, new))
        })?;

        tracing::debug!(origin, target, ?outcome, old_weight = old, new_weight = new, "edge updated");
        Ok(new)
    }

    /// Current weight; 0 for an edge that was never created.
    pub fn get_weight(&self, origin: &str, target: &str) -> Result<f64, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "weights.get", |conn| {
            let weight = conn
                .query_row(
                    "SELECT weight FROM edges WHERE origin = ?1 AND target = ?2",
                    params![origin, target],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(weight.unwrap_or(0.0))
        })
    }

    pub fn connection_stats(&self, origin: &str, target: &str) -> Result<Option<WeightedEdge>, SwitchyardError> {
        let sql = format!("SELECT {} FROM edges WHERE origin = ?1 AND target = ?2", EDGE_COLUMNS);
        self.broker.with_conn(&self.db_path, "weights.stats", |conn| {
            Ok(conn
                .query_row(&sql, params![origin, target], WeightedEdge::from_row)
                .optional()?)
        })
    }

    /// Heaviest neighbours of `node`, as `(neighbour, weight)` pairs.
    pub fn strongest_connections(
        &self,
        node: &str,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<(String, f64)>, SwitchyardError> {
        let sql = match direction {
            Direction::Outgoing => {
                "SELECT target, weight FROM edges WHERE origin = ?1 ORDER BY weight DESC, target LIMIT ?2"
            }
            Direction::Incoming => {
                "SELECT origin, weight FROM edges WHERE target = ?1 ORDER BY weight DESC, origin LIMIT ?2"
            }
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.broker.with_conn(&self.db_path, "weights.strongest", |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![node, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Every edge with `weight >= min_weight`, heaviest first.
    pub fn all_connections(&self, min_weight: f64) -> Result<Vec<WeightedEdge>, SwitchyardError> {
        let sql = format!(
            "SELECT {} FROM edges WHERE weight >= ?1 ORDER BY weight DESC, origin, target",
            EDGE_COLUMNS
        );
        self.broker.with_conn(&self.db_path, "weights.list", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![min_weight], WeightedEdge::from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Deletes every edge with `weight <= threshold`; returns how many.
    pub fn prune(&self, threshold: f64) -> Result<usize, SwitchyardError> {
        if threshold.is_nan() {
            return Err(SwitchyardError::ValidationError(
                "prune threshold is NaN".to_string(),
            ));
        }
        let pruned = self.broker.with_tx(&self.db_path, "weights.prune", |tx| {
            Ok(tx.execute("DELETE FROM edges WHERE weight <= ?1", params![threshold])?)
        })?;
        if pruned > 0 {
            tracing::info!(pruned, threshold, "pruned weak connections");
        }
        Ok(pruned)
    }

    /// Mean weight over edges originating at `node`; 0.0 when there are none.
    pub fn average_weight(&self, node: &str) -> Result<f64, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "weights.average", |conn| {
            let avg: Option<f64> = conn.query_row(
                "SELECT AVG(weight) FROM edges WHERE origin = ?1",
                params![node],
                |row| row.get(0),
            )?;
            Ok(avg.unwrap_or(0.0))
        })
    }

    /// Successes over activations for edges originating at `node`.
    pub fn success_rate(&self, node: &str) -> Result<f64, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "weights.success_rate", |conn| {
            let (successes, activations): (Option<i64>, Option<i64>) = conn.query_row(
                "SELECT SUM(success_count), SUM(activation_count) FROM edges WHERE origin = ?1",
                params![node],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(ratio(successes.unwrap_or(0), activations.unwrap_or(0)))
        })
    }

    pub fn network_summary(&self) -> Result<NetworkSummary, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "weights.summary", |conn| {
            let summary = conn.query_row(
                "SELECT COUNT(*), AVG(weight), MAX(weight), SUM(activation_count), SUM(success_count), SUM(failure_count)
                 FROM edges",
                [],
                |row| {
                    let count: i64 = row.get(0)?;
                    let avg: Option<f64> = row.get(1)?;
                    let max: Option<f64> = row.get(2)?;
                    let activations: Option<i64> = row.get(3)?;
                    let successes: Option<i64> = row.get(4)?;
                    let failures: Option<i64> = row.get(5)?;
                    let activations = activations.unwrap_or(0);
                    let successes = successes.unwrap_or(0);
                    Ok(NetworkSummary {
                        total_connections: count as u64,
                        average_weight: avg.unwrap_or(0.0),
                        max_weight: max.unwrap_or(0.0),
                        total_activations: activations as u64,
                        total_successes: successes as u64,
                        total_failures: failures.unwrap_or(0) as u64,
                        success_rate: ratio(successes, activations),
                    })
                },
            )?;
            Ok(summary)
        })
    }

    /// Deletes every edge.
    pub fn reset(&self) -> Result<usize, SwitchyardError> {
        let removed = self.broker.with_tx(&self.db_path, "weights.reset", |tx| {
            Ok(tx.execute("DELETE FROM edges", [])?)
        })?;
        tracing::warn!(removed, "reinforcement weights reset");
        Ok(removed)
    }
}

fn validate_node(node: &str) -> Result<(), SwitchyardError> {
    if node.trim().is_empty() {
        return Err(SwitchyardError::ValidationError(
            "node identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

#[derive(clap::Args, Debug)]
pub struct WeightsCli {
    #[clap(subcommand)]
    pub command: WeightsCommand,
}

#[derive(Subcommand, Debug)]
pub enum WeightsCommand {
    /// Network-wide totals.
    Summary,
    /// Counters for one edge.
    Stats { origin: String, target: String },
    /// Record a task outcome on an edge.
    Record {
        origin: String,
        target: String,
        /// success | failure
        outcome: String,
    },
    /// Delete every edge with weight <= threshold.
    Prune {
        #[clap(long, default_value_t = 0.0, allow_hyphen_values = true)]
        threshold: f64,
    },
    /// Heaviest neighbours of a node.
    Strongest {
        node: String,
        #[clap(long, default_value_t = 5)]
        limit: usize,
        /// Follow edges into the node instead of out of it.
        #[clap(long)]
        incoming: bool,
    },
}

pub fn run_weights_cli(yard: &Switchyard, cli: WeightsCli, json: bool) -> Result<(), SwitchyardError> {
    let weights = &yard.weights;
    match cli.command {
        WeightsCommand::Summary => {
            let summary = weights.network_summary()?;
            if json {
                return output::print_envelope("weights.summary", serde_json::to_value(&summary)?);
            }
            println!("{}", "Weight network".bold());
            println!("  connections:  {}", summary.total_connections);
            println!("  avg weight:   {:.3}", summary.average_weight);
            println!("  max weight:   {:.3}", summary.max_weight);
            println!(
                "  activations:  {} ({} ok / {} failed)",
                summary.total_activations, summary.total_successes, summary.total_failures
            );
            println!("  success rate: {:.1}%", summary.success_rate * 100.0);
        }
        WeightsCommand::Stats { origin, target } => {
            let edge = weights.connection_stats(&origin, &target)?;
            if json {
                return output::print_envelope("weights.stats", serde_json::json!({ "edge": edge }));
            }
            match edge {
                Some(e) => println!(
                    "{} -> {}: weight {:.1}, {} activations ({} ok / {} failed), updated {}",
                    e.origin,
                    e.target,
                    e.weight,
                    e.activation_count,
                    e.success_count,
                    e.failure_count,
                    e.last_updated
                ),
                None => println!("No edge {} -> {}", origin, target),
            }
        }
        WeightsCommand::Record {
            origin,
            target,
            outcome,
        } => {
            let outcome = match outcome.trim().to_ascii_lowercase().as_str() {
                "success" | "ok" => Outcome::Success,
                "failure" | "fail" => Outcome::Failure,
                other => {
                    return Err(SwitchyardError::ValidationError(format!(
                        "Unknown outcome '{}'. Expected success|failure",
                        other
                    )));
                }
            };
            let weight = weights.record_outcome(&origin, &target, outcome)?;
            if json {
                return output::print_envelope(
                    "weights.record",
                    serde_json::json!({ "origin": origin, "target": target, "outcome": outcome, "weight": weight }),
                );
            }
            println!("{} -> {}: weight now {:.1}", origin, target, weight);
        }
        WeightsCommand::Prune { threshold } => {
            let pruned = weights.prune(threshold)?;
            if json {
                return output::print_envelope(
                    "weights.prune",
                    serde_json::json!({ "threshold": threshold, "pruned": pruned }),
                );
            }
            println!("{} {} edge(s) at or below {}", "Pruned".green(), pruned, threshold);
        }
        WeightsCommand::Strongest {
            node,
            limit,
            incoming,
        } => {
            let direction = if incoming {
                Direction::Incoming
            } else {
                Direction::Outgoing
            };
            let neighbours = weights.strongest_connections(&node, limit, direction)?;
            if json {
                let rows: Vec<_> = neighbours
                    .iter()
                    .map(|(n, w)| serde_json::json!({ "node": n, "weight": w }))
                    .collect();
                return output::print_envelope(
                    "weights.strongest",
                    serde_json::json!({ "node": node, "direction": direction, "connections": rows }),
                );
            }
            if neighbours.is_empty() {
                println!("No connections for {}", node);
            }
            for (neighbour, weight) in neighbours {
                println!("{} {:.1}", output::cell(&neighbour, 24), weight);
            }
        }
    }
    Ok(())
}
