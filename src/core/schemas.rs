//! Centralized schema definitions and file names for every Switchyard store.
//!
//! A store root holds three SQLite databases and a handful of append-only
//! JSONL logs:
//! 1. registry.db: agent capability lists and scores.
//! 2. weights.db: directed reinforcement edges between named nodes.
//! 3. index.db: the semantic index (content + embedding + metadata).
//! 4. documents/: the authoritative document tree.

pub const CONFIG_FILE_NAME: &str = "switchyard.toml";
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const GOVERNANCE_EVENTS_NAME: &str = "governance.events.jsonl";
pub const INTENT_JOURNAL_NAME: &str = "memory_bus.intents.jsonl";
pub const DOCUMENTS_DIR_NAME: &str = "documents";

// --- 1. Registry ---
pub const REGISTRY_DB_NAME: &str = "registry.db";

pub const REGISTRY_DB_SCHEMA_AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        name TEXT PRIMARY KEY,
        capabilities TEXT NOT NULL, -- JSON array, registration order
        alignment REAL NOT NULL,
        accuracy REAL NOT NULL,
        efficiency REAL NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

// --- 2. Weights ---
pub const WEIGHTS_DB_NAME: &str = "weights.db";

pub const WEIGHTS_DB_SCHEMA_EDGES: &str = "
    CREATE TABLE IF NOT EXISTS edges (
        origin TEXT NOT NULL,
        target TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 0 CHECK (weight >= 0),
        activation_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        UNIQUE(origin, target),
        CHECK (activation_count = success_count + failure_count)
    )
";
pub const WEIGHTS_DB_INDEX_ORIGIN: &str =
    "CREATE INDEX IF NOT EXISTS idx_edges_origin ON edges(origin)";
pub const WEIGHTS_DB_INDEX_TARGET: &str =
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target)";
pub const WEIGHTS_DB_INDEX_WEIGHT: &str =
    "CREATE INDEX IF NOT EXISTS idx_edges_weight ON edges(weight DESC)";

// --- 3. Semantic index ---
pub const INDEX_DB_NAME: &str = "index.db";

pub const INDEX_DB_SCHEMA_ENTRIES: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL UNIQUE,
        embedding TEXT NOT NULL, -- JSON array of f32
        metadata TEXT NOT NULL DEFAULT '{}',
        content TEXT NOT NULL
    )
";
