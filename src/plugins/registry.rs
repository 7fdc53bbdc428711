//! Capability Router and its durable Score Store.
//!
//! Agents are plain records: a name, an ordered capability list and a
//! three-dimensional score. Routing picks, among the live agents that
//! declare the required capability, the one with the highest composite
//! score; ties go to whichever agent registered first.

use crate::core::broker::DbBroker;
use crate::core::error::SwitchyardError;
use crate::core::output;
use crate::core::runtime::Switchyard;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::Subcommand;
use colored::Colorize;
use regex::Regex;
use rusqlite::{OptionalExtension, params};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

pub const DEFAULT_DIMENSION_SCORE: f64 = 0.5;

const ALIGNMENT_WEIGHT: f64 = 0.4;
const ACCURACY_WEIGHT: f64 = 0.4;
const EFFICIENCY_WEIGHT: f64 = 0.2;

static CAPABILITY_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_\-]+").expect("separator pattern is valid"));

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Lower-cases and collapses separator runs so `Web Search`, `web-search`
/// and `web_search` compare equal. Used only to detect likely typos.
pub fn canonical_capability(capability: &str) -> String {
    CAPABILITY_SEPARATORS
        .replace_all(capability.trim(), "-")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub alignment: f64,
    pub accuracy: f64,
    pub efficiency: f64,
}

impl Default for AgentScore {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_DIMENSION_SCORE,
            accuracy: DEFAULT_DIMENSION_SCORE,
            efficiency: DEFAULT_DIMENSION_SCORE,
        }
    }
}

impl AgentScore {
    /// Builds a score with every dimension clamped to [0, 1].
    pub fn new(alignment: f64, accuracy: f64, efficiency: f64) -> Self {
        Self {
            alignment: clamp_unit(alignment),
            accuracy: clamp_unit(accuracy),
            efficiency: clamp_unit(efficiency),
        }
    }

    pub fn composite(&self) -> f64 {
        self.alignment * ALIGNMENT_WEIGHT
            + self.accuracy * ACCURACY_WEIGHT
            + self.efficiency * EFFICIENCY_WEIGHT
    }

    pub fn get(&self, dimension: ScoreDimension) -> f64 {
        match dimension {
            ScoreDimension::Alignment => self.alignment,
            ScoreDimension::Accuracy => self.accuracy,
            ScoreDimension::Efficiency => self.efficiency,
        }
    }

    /// Returns a copy with `dimension` moved by `delta` and clamped.
    pub fn adjusted(&self, dimension: ScoreDimension, delta: f64) -> Self {
        let mut next = *self;
        let value = clamp_unit(self.get(dimension) + delta);
        match dimension {
            ScoreDimension::Alignment => next.alignment = value,
            ScoreDimension::Accuracy => next.accuracy = value,
            ScoreDimension::Efficiency => next.efficiency = value,
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDimension {
    Alignment,
    Accuracy,
    Efficiency,
}

impl fmt::Display for ScoreDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScoreDimension::Alignment => "alignment",
            ScoreDimension::Accuracy => "accuracy",
            ScoreDimension::Efficiency => "efficiency",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ScoreDimension {
    type Err = SwitchyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alignment" => Ok(ScoreDimension::Alignment),
            "accuracy" => Ok(ScoreDimension::Accuracy),
            "efficiency" => Ok(ScoreDimension::Efficiency),
            other => Err(SwitchyardError::ValidationError(format!(
                "Unknown score dimension '{}'. Expected alignment|accuracy|efficiency",
                other
            ))),
        }
    }
}

/// A unit of work to be routed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub required_capability: Option<String>,
}

impl TaskRequest {
    pub fn new(task_id: &str, required_capability: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            required_capability: Some(required_capability.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub name: String,
    pub capabilities: Vec<String>,
    pub score: AgentScore,
    pub composite: f64,
    pub live: bool,
}

/// Durable table of agent scores and capability lists (`registry.db`).
pub struct ScoreStore {
    db_path: PathBuf,
    broker: DbBroker,
}

impl ScoreStore {
    pub fn open(store: &Store) -> Result<Self, SwitchyardError> {
        let this = Self {
            db_path: store.registry_db_path(),
            broker: DbBroker::new(&store.root, "registry"),
        };
        this.broker.with_conn(&this.db_path, "registry.init", |conn| {
            conn.execute(schemas::REGISTRY_DB_SCHEMA_AGENTS, [])?;
            Ok(())
        })?;
        Ok(this)
    }

    /// Every persisted agent, in first-persisted order.
    pub fn load_all(&self) -> Result<Vec<(String, Vec<String>, AgentScore)>, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "registry.load", |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, capabilities, alignment, accuracy, efficiency FROM agents ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    AgentScore::new(row.get(2)?, row.get(3)?, row.get(4)?),
                ))
            })?;
            let mut out = Vec::new();
            for r in rows {
                let (name, caps_json, score) = r?;
                let caps: Vec<String> = serde_json::from_str(&caps_json)?;
                out.push((name, caps, score));
            }
            Ok(out)
        })
    }

    /// Insert the agent with `default_score` if unknown; otherwise keep the
    /// stored score and refresh the capability list. Returns the score now
    /// on record.
    pub fn upsert_agent(
        &self,
        name: &str,
        capabilities: &[String],
        default_score: AgentScore,
    ) -> Result<AgentScore, SwitchyardError> {
        let caps_json = serde_json::to_string(capabilities)?;
        let now = time::now_epoch_z();

        self.broker.with_tx(&self.db_path, "registry.upsert", |tx| {
            let existing = tx
                .query_row(
                    "SELECT alignment, accuracy, efficiency FROM agents WHERE name = ?1",
                    params![name],
                    |row| Ok(AgentScore::new(row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            match existing {
                Some(score) => {
                    tx.execute(
                        "UPDATE agents SET capabilities = ?1, updated_at = ?2 WHERE name = ?3",
                        params![caps_json, now, name],
                    )?;
                    Ok(score)
                }
                None => {
                    tx.execute(
                        "INSERT INTO agents(name, capabilities, alignment, accuracy, efficiency, created_at, updated_at)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        params![
                            name,
                            caps_json,
                            default_score.alignment,
                            default_score.accuracy,
                            default_score.efficiency,
                            now
                        ],
                    )?;
                    Ok(default_score)
                }
            }
        })
    }

    pub fn save_score(&self, name: &str, score: &AgentScore) -> Result<(), SwitchyardError> {
        let now = time::now_epoch_z();
        self.broker.with_tx(&self.db_path, "registry.score_update", |tx| {
            let changed = tx.execute(
                "UPDATE agents SET alignment = ?1, accuracy = ?2, efficiency = ?3, updated_at = ?4 WHERE name = ?5",
                params![score.alignment, score.accuracy, score.efficiency, now, name],
            )?;
            if changed == 0 {
                return Err(SwitchyardError::NotFound(format!("agent '{}'", name)));
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone)]
struct LiveAgent {
    name: String,
    capabilities: Vec<String>,
}

/// Routes tasks to the best-scoring capable agent.
///
/// Mutations take `&mut self`, so the in-memory read-modify-write of a score
/// cannot interleave; the persisted row is written before the in-memory copy
/// changes.
pub struct CapabilityRouter {
    store: ScoreStore,
    live: Vec<LiveAgent>,
    scores: FxHashMap<String, AgentScore>,
    persisted_capabilities: FxHashMap<String, Vec<String>>,
}

impl CapabilityRouter {
    /// Opens the score store and loads every persisted score. No agent is
    /// routable until it is registered in this process.
    pub fn open(store: &Store) -> Result<Self, SwitchyardError> {
        let score_store = ScoreStore::open(store)?;
        let mut scores = FxHashMap::default();
        let mut persisted_capabilities = FxHashMap::default();
        for (name, caps, score) in score_store.load_all()? {
            scores.insert(name.clone(), score);
            persisted_capabilities.insert(name, caps);
        }
        tracing::debug!(persisted = scores.len(), "capability router opened");
        Ok(Self {
            store: score_store,
            live: Vec::new(),
            scores,
            persisted_capabilities,
        })
    }

    /// Registers an agent. Re-registering a live name is a no-op and never
    /// resets its score. A name seen for the first time is persisted with
    /// the default score before this returns.
    pub fn register(&mut self, name: &str, capabilities: &[&str]) -> Result<AgentScore, SwitchyardError> {
        if name.trim().is_empty() {
            return Err(SwitchyardError::ValidationError(
                "agent name must not be empty".to_string(),
            ));
        }
        if self.is_live(name) {
            tracing::info!(agent = name, "agent already registered; skipping duplicate registration");
            return Ok(self.scores.get(name).copied().unwrap_or_default());
        }

        let capabilities: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();
        self.warn_near_duplicates(name, &capabilities);

        let score = self
            .store
            .upsert_agent(name, &capabilities, AgentScore::default())?;

        self.scores.insert(name.to_string(), score);
        self.persisted_capabilities
            .insert(name.to_string(), capabilities.clone());
        self.live.push(LiveAgent {
            name: name.to_string(),
            capabilities,
        });
        tracing::info!(agent = name, composite = score.composite(), "agent registered");
        Ok(score)
    }

    /// Removes an agent from routing. Its score history stays in the store
    /// and late score updates still apply to it.
    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.live.len();
        self.live.retain(|a| a.name != name);
        let removed = self.live.len() != before;
        if removed {
            tracing::info!(agent = name, "agent removed from live set");
        }
        removed
    }

    pub fn route(&self, task: &TaskRequest) -> Result<String, SwitchyardError> {
        let capability = task
            .required_capability
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(SwitchyardError::MissingCapability)?;

        let mut best: Option<(&str, f64)> = None;
        for agent in &self.live {
            if !agent.capabilities.iter().any(|c| c == capability) {
                continue;
            }
            let composite = self
                .scores
                .get(&agent.name)
                .copied()
                .unwrap_or_default()
                .composite();
            match best {
                Some((_, top)) if composite <= top => {}
                _ => best = Some((agent.name.as_str(), composite)),
            }
        }

        match best {
            Some((name, composite)) => {
                tracing::debug!(task_id = %task.task_id, capability, agent = name, composite, "task routed");
                Ok(name.to_string())
            }
            None => Err(SwitchyardError::NoCapableAgent(capability.to_string())),
        }
    }

    /// Applies `clamp(old + delta, 0, 1)` to one dimension and persists it.
    /// Returns `Ok(None)` for a name with no score on record.
    pub fn update_score(
        &mut self,
        name: &str,
        dimension: ScoreDimension,
        delta: f64,
    ) -> Result<Option<AgentScore>, SwitchyardError> {
        if delta.is_nan() {
            return Err(SwitchyardError::ValidationError(format!(
                "score delta for '{}' is NaN",
                name
            )));
        }
        let Some(current) = self.scores.get(name).copied() else {
            tracing::warn!(agent = name, %dimension, delta, "score update for unknown agent ignored");
            return Ok(None);
        };

        let next = current.adjusted(dimension, delta);
        self.store.save_score(name, &next)?;
        self.scores.insert(name.to_string(), next);

        tracing::info!(
            agent = name,
            %dimension,
            old = current.get(dimension),
            new = next.get(dimension),
            "score updated"
        );
        Ok(Some(next))
    }

    pub fn get_score(&self, name: &str) -> Option<AgentScore> {
        self.scores.get(name).copied()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.live.iter().any(|a| a.name == name)
    }

    /// Live agent names in registration order.
    pub fn agent_names(&self) -> Vec<String> {
        self.live.iter().map(|a| a.name.clone()).collect()
    }

    pub fn capabilities(&self, name: &str) -> Option<&[String]> {
        self.persisted_capabilities.get(name).map(Vec::as_slice)
    }

    /// Every agent with a score on record, best composite first.
    pub fn agents_with_scores(&self) -> Vec<AgentRecord> {
        let mut out: Vec<AgentRecord> = self
            .scores
            .iter()
            .map(|(name, score)| AgentRecord {
                name: name.clone(),
                capabilities: self
                    .persisted_capabilities
                    .get(name)
                    .cloned()
                    .unwrap_or_default(),
                score: *score,
                composite: score.composite(),
                live: self.is_live(name),
            })
            .collect();
        out.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    /// Pairs of distinct capability spellings among live agents that
    /// canonicalise to the same tag, e.g. `("web-search", "web_search")`.
    pub fn near_duplicate_capabilities(&self) -> Vec<(String, String)> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for agent in &self.live {
            for cap in &agent.capabilities {
                let spellings = groups.entry(canonical_capability(cap)).or_default();
                if !spellings.contains(cap) {
                    spellings.push(cap.clone());
                }
            }
        }

        let mut pairs = Vec::new();
        for spellings in groups.values_mut() {
            spellings.sort();
            for i in 0..spellings.len() {
                for j in (i + 1)..spellings.len() {
                    pairs.push((spellings[i].clone(), spellings[j].clone()));
                }
            }
        }
        pairs
    }

    fn warn_near_duplicates(&self, name: &str, capabilities: &[String]) {
        for cap in capabilities {
            let canonical = canonical_capability(cap);
            for agent in &self.live {
                if let Some(known) = agent
                    .capabilities
                    .iter()
                    .find(|k| *k != cap && canonical_capability(k) == canonical)
                {
                    tracing::warn!(
                        agent = name,
                        capability = %cap,
                        known = %known,
                        known_agent = %agent.name,
                        "capability differs from an existing tag only by case or separators"
                    );
                }
            }
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct AgentsCli {
    #[clap(subcommand)]
    pub command: AgentsCommand,
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommand {
    /// List every agent with a score on record, best composite first.
    List,
    /// Persist an agent with its capabilities (default score on first sight).
    Register {
        name: String,
        /// Capability tag; repeat for several.
        #[clap(long = "cap")]
        capabilities: Vec<String>,
    },
    /// Adjust one score dimension by a delta, clamped to [0, 1].
    Score {
        name: String,
        /// alignment | accuracy | efficiency
        dimension: String,
        #[clap(allow_hyphen_values = true)]
        delta: f64,
    },
}

pub fn run_agents_cli(yard: &mut Switchyard, cli: AgentsCli, json: bool) -> Result<(), SwitchyardError> {
    match cli.command {
        AgentsCommand::List => {
            let agents = yard.router.agents_with_scores();
            if json {
                return output::print_envelope("agents.list", serde_json::json!({ "agents": agents }));
            }
            if agents.is_empty() {
                println!("No agents on record.");
                return Ok(());
            }
            println!(
                "{} {} {} {} {}",
                output::cell("NAME", 20).as_str().bold(),
                output::cell("COMPOSITE", 9).as_str().bold(),
                output::cell("ALN/ACC/EFF", 14).as_str().bold(),
                output::cell("LIVE", 4).as_str().bold(),
                "CAPABILITIES".bold()
            );
            for a in agents {
                println!(
                    "{} {} {} {} {}",
                    output::cell(&a.name, 20).as_str().bright_cyan(),
                    output::cell(&format!("{:.3}", a.composite), 9),
                    output::cell(
                        &format!(
                            "{:.2}/{:.2}/{:.2}",
                            a.score.alignment, a.score.accuracy, a.score.efficiency
                        ),
                        14
                    ),
                    output::cell(if a.live { "yes" } else { "no" }, 4),
                    output::compact_line(&a.capabilities.join(", "), 60)
                );
            }
        }
        AgentsCommand::Register { name, capabilities } => {
            let caps: Vec<&str> = capabilities.iter().map(String::as_str).collect();
            let score = yard.router.register(&name, &caps)?;
            let near = yard.router.near_duplicate_capabilities();
            if json {
                return output::print_envelope(
                    "agents.register",
                    serde_json::json!({
                        "name": name,
                        "score": score,
                        "composite": score.composite(),
                        "near_duplicates": near,
                    }),
                );
            }
            println!("{} {} ({:.3})", "Registered".green(), name, score.composite());
            for (a, b) in near {
                println!("  {} '{}' vs '{}'", "near-duplicate capability:".yellow(), a, b);
            }
        }
        AgentsCommand::Score {
            name,
            dimension,
            delta,
        } => {
            let dimension: ScoreDimension = dimension.parse()?;
            let Some(score) = yard.router.update_score(&name, dimension, delta)? else {
                return Err(SwitchyardError::NotFound(format!("agent '{}'", name)));
            };
            if json {
                return output::print_envelope(
                    "agents.score",
                    serde_json::json!({
                        "name": name,
                        "dimension": dimension,
                        "score": score,
                        "composite": score.composite(),
                    }),
                );
            }
            println!(
                "{} {}: {} = {:.3} (composite {:.3})",
                "Updated".green(),
                name,
                dimension,
                score.get(dimension),
                score.composite()
            );
        }
    }
    Ok(())
}
