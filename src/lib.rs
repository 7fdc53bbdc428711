//! Switchyard: adaptive task routing with a governed, write-through memory.
//!
//! Four cooperating components share one on-disk store:
//!
//! - **Capability Router** ([`plugins::registry`]): picks the live agent
//!   with the best composite score for a required capability. Scores
//!   persist across restarts.
//! - **Reinforcement Weight Store** ([`plugins::weights`]): Hebbian
//!   weights on directed `(origin, target)` edges, strengthened on success
//!   and weakened on failure.
//! - **Memory Bus** ([`plugins::memory_bus`]): writes go to the semantic
//!   index, then the document store, with rollback if the second write
//!   fails. Reads fall through exact key, keyword and similarity tiers.
//! - **Governance Monitor** ([`plugins::governance`]): counts consecutive
//!   memory bus failures and raises an alert past a threshold.
//!
//! # Store layout
//!
//! ```text
//! <root>/
//!   switchyard.toml            optional config
//!   registry.db  weights.db  index.db
//!   documents/                 authoritative document copies
//!   broker.events.jsonl        audit log of every database operation
//!   governance.events.jsonl    failure and alert events
//!   memory_bus.intents.jsonl   write-ahead intent journal
//! ```
//!
//! # Example
//!
//! ```bash
//! switchyard --root .switchyard agents register planner --cap plan
//! switchyard --root .switchyard weights record planner coder success
//! switchyard --root .switchyard memory write notes/plan.md --content "ship it"
//! switchyard --root .switchyard memory read "ship"
//! switchyard --root .switchyard governance events
//! ```

pub mod core;
pub mod plugins;

use crate::core::{error, runtime::Switchyard};
use crate::plugins::{governance, memory_bus, registry, weights};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "switchyard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Capability routing, reinforcement weights and a governed memory bus"
)]
pub struct Cli {
    /// Store root directory.
    #[clap(long, global = true, default_value = ".switchyard")]
    pub root: PathBuf,
    /// Emit JSON envelopes instead of text.
    #[clap(long, global = true)]
    pub json: bool,
    /// Verbose logging on stderr (RUST_LOG overrides).
    #[clap(long, short, global = true)]
    pub verbose: bool,
    /// Structured JSON logs on stderr.
    #[clap(long, global = true)]
    pub log_json: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Agent registry and scores.
    Agents(registry::AgentsCli),
    /// Reinforcement weights between nodes.
    Weights(weights::WeightsCli),
    /// Write-through memory bus.
    Memory(memory_bus::MemoryCli),
    /// Governance monitor status and events.
    Governance(governance::GovernanceCli),
    /// Print the effective configuration.
    Config,
}

pub fn run(cli: Cli) -> Result<(), error::SwitchyardError> {
    let mut yard = Switchyard::open(&cli.root)?;
    match cli.command {
        Command::Agents(c) => registry::run_agents_cli(&mut yard, c, cli.json),
        Command::Weights(c) => weights::run_weights_cli(&yard, c, cli.json),
        Command::Memory(c) => memory_bus::run_memory_cli(&yard, c, cli.json),
        Command::Governance(c) => governance::run_governance_cli(&yard, c, cli.json),
        Command::Config => {
            if cli.json {
                return crate::core::output::print_envelope(
                    "config",
                    serde_json::json!({
                        "root": yard.store.root,
                        "config": yard.config,
                    }),
                );
            }
            let rendered = toml::to_string_pretty(&yard.config)
                .map_err(|e| error::SwitchyardError::ValidationError(e.to_string()))?;
            println!("# {}", yard.store.config_path().display());
            print!("{}", rendered);
            Ok(())
        }
    }
}
