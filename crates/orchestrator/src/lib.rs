//! Umbrella crate for embedding the orchestrator without the daemon: the
//! plugin contracts, both managers, and the stores behind them.

pub use orchestrator_config as config;
pub use orchestrator_eventbus as eventbus;
pub use orchestrator_lifecycle as lifecycle;
pub use orchestrator_protocol as protocol;
pub use orchestrator_registry as registry;
pub use orchestrator_session as session;
pub use orchestrator_store as store;

pub use orchestrator_lifecycle::LifecycleManager;
pub use orchestrator_protocol::{OrchestratorError, OrchestratorResult};
pub use orchestrator_registry::PluginRegistry;
pub use orchestrator_session::SessionManager;
