//! An orchestrator wired to in-memory fakes.

use crate::fakes::{MemoryWorkspace, RecordingEventBus, RecordingRegistry, ScriptedRuntime};
use gantry_cache::{CacheManager, MemoryStore};
use gantry_core::Result;
use gantry_core::run::{RunReport, TriggerEvent};
use gantry_core::workflow::WorkflowDefinition;
use gantry_runner::JobExecutor;
use gantry_scheduler::{Catalog, EngineConfig, Orchestrator};
use gantry_secrets::{FileVault, SecretScopeManager};
use std::collections::HashMap;
use std::sync::Arc;

pub struct TestEngine {
    pub runtime: Arc<ScriptedRuntime>,
    pub registry: Arc<RecordingRegistry>,
    pub workspace: Arc<MemoryWorkspace>,
    pub events: Arc<RecordingEventBus>,
    pub cache: Arc<CacheManager>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Builder for [`TestEngine`].
pub struct TestEngineBuilder {
    secrets: HashMap<String, String>,
    catalog: Catalog,
    config: EngineConfig,
    cache: Option<Arc<CacheManager>>,
    workspace: Option<Arc<MemoryWorkspace>>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder {
            secrets: HashMap::new(),
            catalog: Catalog::new(),
            config: EngineConfig::default(),
            cache: None,
            workspace: None,
        }
    }

    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<RunReport> {
        self.orchestrator.start_run(definition, event).await
    }

    pub fn catalog(&self) -> &Catalog {
        self.orchestrator.catalog()
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngineBuilder {
    pub fn secret(mut self, name: &str, value: &str) -> Self {
        self.secrets.insert(name.to_string(), value.to_string());
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    /// Share a cache between engines, e.g. to observe a hit on a second run.
    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn workspace(mut self, workspace: Arc<MemoryWorkspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn build(self) -> TestEngine {
        let runtime = Arc::new(ScriptedRuntime::new());
        let registry = Arc::new(RecordingRegistry::default());
        let workspace = self.workspace.unwrap_or_default();
        let events = Arc::new(RecordingEventBus::new());
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheManager::new(Arc::new(MemoryStore::new()))));

        let executor = JobExecutor::new(
            runtime.clone(),
            Arc::new(SecretScopeManager::new(Arc::new(FileVault::from_map(
                self.secrets,
            )))),
            cache.clone(),
            workspace.clone(),
        )
        .with_registry(registry.clone())
        .with_events(events.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(self.catalog),
            Arc::new(executor),
            self.config,
        ));

        TestEngine {
            runtime,
            registry,
            workspace,
            events,
            cache,
            orchestrator,
        }
    }
}
