//! Builder assembling an [`Engine`] from configuration and registrations.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::core::{
    Account, Agent, Area, AreaQueue, Engine, EngineError, EngineResult, InMemoryAuditSink,
    SharedAuditSink, Store, TaskCategory, User,
};
use crate::infra::{InMemoryAreaQueue, InMemoryStore};

/// Create an in-memory audit sink sized from `config`.
pub fn memory_audit_sink(config: &EngineConfig) -> Arc<Mutex<InMemoryAuditSink>> {
    Arc::new(Mutex::new(InMemoryAuditSink::new(config.audit_buffer)))
}

/// Collects configuration and registrations, then builds an [`Engine`].
///
/// Areas registered without an explicit queue get an [`InMemoryAreaQueue`]
/// bounded by `area_queue_max_depth`. Without a store, an [`InMemoryStore`]
/// is used.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    audit: Option<SharedAuditSink>,
    categories: Vec<TaskCategory>,
    users: Vec<User>,
    accounts: Vec<Account>,
    areas: Vec<(Area, Option<Box<dyn AreaQueue>>)>,
    agents: Vec<Agent>,
}

impl EngineBuilder {
    /// Start from `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            audit: None,
            categories: Vec::new(),
            users: Vec::new(),
            accounts: Vec::new(),
            areas: Vec::new(),
            agents: Vec::new(),
        }
    }

    /// Configuration the engine will use.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Use `store` for persistence.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Record lifecycle events into `sink`.
    #[must_use]
    pub fn audit_sink(mut self, sink: SharedAuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Register a task category.
    #[must_use]
    pub fn category(mut self, category: TaskCategory) -> Self {
        self.categories.push(category);
        self
    }

    /// Register a user.
    #[must_use]
    pub fn user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Register an account.
    #[must_use]
    pub fn account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    /// Register an area backed by the default in-memory queue.
    #[must_use]
    pub fn area(mut self, area: Area) -> Self {
        self.areas.push((area, None));
        self
    }

    /// Register an area backed by `queue`.
    #[must_use]
    pub fn area_with_queue(mut self, area: Area, queue: Box<dyn AreaQueue>) -> Self {
        self.areas.push((area, Some(queue)));
        self
    }

    /// Register an agent. Its area must be registered too.
    #[must_use]
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> EngineResult<Engine> {
        self.config
            .validate()
            .map_err(|e| EngineError::Configuration(format!("config invalid: {e}")))?;
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStore::new()),
        };
        let depth = self.config.area_queue_max_depth;
        let mut engine = Engine::new(self.config, store);
        if let Some(sink) = self.audit {
            engine.set_audit_sink(sink);
        }
        for category in self.categories {
            engine.register_category(category);
        }
        for user in self.users {
            engine.register_user(user);
        }
        for account in self.accounts {
            engine.register_account(account);
        }
        for (area, queue) in self.areas {
            let queue: Box<dyn AreaQueue> = match queue {
                Some(queue) => queue,
                None => Box::new(InMemoryAreaQueue::new(area.id, depth)),
            };
            engine.register_area(area, queue);
        }
        for agent in self.agents {
            engine.register_agent(agent)?;
        }
        tracing::info!(
            accounts = engine.accounts().len(),
            areas = engine.areas().loads().len(),
            "engine built"
        );
        Ok(engine)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
