//! One handle wiring every component against a single store root.

use crate::core::config::SwitchyardConfig;
use crate::core::error::SwitchyardError;
use crate::core::store::Store;
use crate::plugins::documents::FsDocumentStore;
use crate::plugins::governance::GovernanceMonitor;
use crate::plugins::index::SqliteSemanticIndex;
use crate::plugins::memory_bus::MemoryBus;
use crate::plugins::registry::CapabilityRouter;
use crate::plugins::weights::WeightManager;
use std::path::Path;
use std::sync::Arc;

pub type FsMemoryBus = MemoryBus<SqliteSemanticIndex, FsDocumentStore>;

pub struct Switchyard {
    pub store: Store,
    pub config: SwitchyardConfig,
    pub router: CapabilityRouter,
    pub weights: WeightManager,
    pub governance: Arc<GovernanceMonitor>,
    pub bus: FsMemoryBus,
}

impl Switchyard {
    /// Opens (creating if needed) the store at `root`, reads
    /// `switchyard.toml` from it and brings every component up.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SwitchyardError> {
        let store = Store::open(root)?;
        let config = SwitchyardConfig::load(&store.config_path())?;
        Self::with_config(store, config)
    }

    pub fn with_config(store: Store, config: SwitchyardConfig) -> Result<Self, SwitchyardError> {
        config.validate()?;

        let router = CapabilityRouter::open(&store)?;
        let weights = WeightManager::open(&store)?;
        let governance = Arc::new(GovernanceMonitor::from_config(
            &config.governance,
            &store.governance_log_path(),
        )?);

        let index = SqliteSemanticIndex::open(&store, config.memory.embedding_dim)?;
        let documents = FsDocumentStore::open(&store, &config.memory.document_extension)?;
        let mut bus = MemoryBus::new(index, documents, Arc::clone(&governance))
            .with_search_dirs(config.memory.search_dirs.clone());
        if config.memory.intent_journal {
            bus = bus.with_intent_journal(&store.intent_journal_path());
        }

        tracing::debug!(root = %store.root.display(), "switchyard opened");
        Ok(Self {
            store,
            config,
            router,
            weights,
            governance,
            bus,
        })
    }
}
