//! Agent adapter port, type-erased wrapper, and adapter registry.
//!
//! Every automation platform is reached through the [`AgentAdapter`] trait:
//! a uniform capability surface (authenticate, discover, status, execute,
//! health check). The engine never sees a concrete platform -- it resolves
//! a step's agent through the [`AgentDirectory`] and obtains the owning
//! platform's adapter (plus its circuit breaker) from the
//! [`AdapterRegistry`], an explicitly constructed object passed in at
//! engine construction time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use maestro_types::agent::{Agent, AgentStatus};
use maestro_types::error::StoreError;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStats};

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Errors from a remote platform call.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network-level failure reaching the platform.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call exceeded its timeout.
    #[error("remote call timed out")]
    Timeout,

    /// The platform rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The platform answered but reported a business-level failure.
    #[error("remote error: {0}")]
    Remote(String),
}

impl AdapterError {
    /// Transient errors are the ones that should trip a circuit breaker;
    /// business-level rejections should not.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transport(_) | AdapterError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Adapter data types
// ---------------------------------------------------------------------------

/// Structured result of executing an agent on its platform.
///
/// A response with `success == false` is a step failure even though the
/// transport succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterResponse {
    /// Successful response carrying the agent's output.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response with the platform's error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// An agent as reported by a platform's discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAgent {
    /// The agent's id on the remote platform.
    pub external_id: String,
    /// Platform-side display name.
    pub name: String,
    /// Whether the platform reports the agent as runnable.
    pub active: bool,
}

// ---------------------------------------------------------------------------
// AgentAdapter trait
// ---------------------------------------------------------------------------

/// Uniform capability surface implemented per automation platform.
///
/// Uses native async fn in traits (RPITIT); see [`BoxAgentAdapter`] for the
/// type-erased form the registry stores.
pub trait AgentAdapter: Send + Sync {
    /// Human-readable platform name (for logs and diagnostics).
    fn platform_name(&self) -> &str;

    /// Verify credentials against the platform.
    fn authenticate(&self)
    -> impl Future<Output = Result<(), AdapterError>> + Send;

    /// List the agents available on the platform.
    fn discover_agents(
        &self,
    ) -> impl Future<Output = Result<Vec<DiscoveredAgent>, AdapterError>> + Send;

    /// Current status of one agent.
    fn agent_status(
        &self,
        external_id: &str,
    ) -> impl Future<Output = Result<AgentStatus, AdapterError>> + Send;

    /// Execute an agent with the given (already resolved) parameters.
    fn execute_agent(
        &self,
        external_id: &str,
        params: &Value,
    ) -> impl Future<Output = Result<AdapterResponse, AdapterError>> + Send;

    /// Cheap liveness probe.
    fn health_check(&self) -> impl Future<Output = Result<bool, AdapterError>> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe wrapper (BoxAgentAdapter)
// ---------------------------------------------------------------------------

/// Object-safe version of [`AgentAdapter`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `AgentAdapter`.
pub trait AgentAdapterDyn: Send + Sync {
    fn platform_name(&self) -> &str;

    fn authenticate_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdapterError>> + Send + 'a>>;

    fn discover_agents_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiscoveredAgent>, AdapterError>> + Send + 'a>>;

    fn agent_status_boxed<'a>(
        &'a self,
        external_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentStatus, AdapterError>> + Send + 'a>>;

    fn execute_agent_boxed<'a>(
        &'a self,
        external_id: &'a str,
        params: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse, AdapterError>> + Send + 'a>>;

    fn health_check_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AdapterError>> + Send + 'a>>;
}

/// Blanket implementation: any `AgentAdapter` automatically implements
/// `AgentAdapterDyn`.
impl<T: AgentAdapter> AgentAdapterDyn for T {
    fn platform_name(&self) -> &str {
        AgentAdapter::platform_name(self)
    }

    fn authenticate_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdapterError>> + Send + 'a>> {
        Box::pin(self.authenticate())
    }

    fn discover_agents_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiscoveredAgent>, AdapterError>> + Send + 'a>>
    {
        Box::pin(self.discover_agents())
    }

    fn agent_status_boxed<'a>(
        &'a self,
        external_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AgentStatus, AdapterError>> + Send + 'a>> {
        Box::pin(self.agent_status(external_id))
    }

    fn execute_agent_boxed<'a>(
        &'a self,
        external_id: &'a str,
        params: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse, AdapterError>> + Send + 'a>> {
        Box::pin(self.execute_agent(external_id, params))
    }

    fn health_check_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AdapterError>> + Send + 'a>> {
        Box::pin(self.health_check())
    }
}

/// Type-erased platform adapter for runtime selection.
///
/// Since `AgentAdapter` uses RPITIT it cannot be a trait object directly;
/// `BoxAgentAdapter` provides equivalent methods delegating to the inner
/// `AgentAdapterDyn`.
pub struct BoxAgentAdapter {
    inner: Box<dyn AgentAdapterDyn>,
}

impl BoxAgentAdapter {
    /// Wrap a concrete adapter in a type-erased box.
    pub fn new<T: AgentAdapter + 'static>(adapter: T) -> Self {
        Self {
            inner: Box::new(adapter),
        }
    }

    pub fn platform_name(&self) -> &str {
        self.inner.platform_name()
    }

    pub async fn authenticate(&self) -> Result<(), AdapterError> {
        self.inner.authenticate_boxed().await
    }

    pub async fn discover_agents(&self) -> Result<Vec<DiscoveredAgent>, AdapterError> {
        self.inner.discover_agents_boxed().await
    }

    pub async fn agent_status(&self, external_id: &str) -> Result<AgentStatus, AdapterError> {
        self.inner.agent_status_boxed(external_id).await
    }

    pub async fn execute_agent(
        &self,
        external_id: &str,
        params: &Value,
    ) -> Result<AdapterResponse, AdapterError> {
        self.inner.execute_agent_boxed(external_id, params).await
    }

    pub async fn health_check(&self) -> Result<bool, AdapterError> {
        self.inner.health_check_boxed().await
    }
}

// ---------------------------------------------------------------------------
// AgentDirectory trait
// ---------------------------------------------------------------------------

/// Lookup port resolving an agent id to its platform and external id.
///
/// Consumed by the validator (existence/activity checks) and the engine
/// (adapter resolution). Uses native async fn in traits.
pub trait AgentDirectory: Send + Sync {
    /// Fetch an agent by id. `Ok(None)` means the agent is unknown.
    fn get_agent(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Agent>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// A registered adapter together with the circuit breaker guarding it.
#[derive(Clone)]
pub struct AdapterHandle {
    pub adapter: Arc<BoxAgentAdapter>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Registry mapping platform ids to live adapter instances.
///
/// One circuit breaker is created per registered adapter; all calls to that
/// platform share it. The registry is constructed explicitly and passed by
/// reference into the engine -- there is no ambient global.
pub struct AdapterRegistry {
    entries: DashMap<Uuid, AdapterHandle>,
    breaker_config: CircuitBreakerConfig,
}

impl AdapterRegistry {
    /// Registry whose breakers use the default configuration.
    pub fn new() -> Self {
        Self::with_breaker_config(CircuitBreakerConfig::default())
    }

    /// Registry whose breakers use the given configuration.
    pub fn with_breaker_config(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            breaker_config,
        }
    }

    /// Register an adapter for a platform, replacing any previous one.
    ///
    /// The fresh breaker means a replaced adapter starts with a clean
    /// failure history.
    pub fn register<A: AgentAdapter + 'static>(&self, platform_id: Uuid, adapter: A) {
        let name = adapter.platform_name().to_string();
        self.entries.insert(
            platform_id,
            AdapterHandle {
                adapter: Arc::new(BoxAgentAdapter::new(adapter)),
                breaker: Arc::new(CircuitBreaker::new(self.breaker_config.clone())),
            },
        );
        tracing::debug!(platform_id = %platform_id, platform = name.as_str(), "adapter registered");
    }

    /// Remove a platform's adapter. Returns `true` if one was registered.
    pub fn deregister(&self, platform_id: &Uuid) -> bool {
        self.entries.remove(platform_id).is_some()
    }

    /// Resolve a platform id to its adapter and breaker.
    pub fn get(&self, platform_id: &Uuid) -> Option<AdapterHandle> {
        self.entries.get(platform_id).map(|e| e.clone())
    }

    /// Breaker statistics for a platform, if registered.
    pub fn breaker_stats(&self, platform_id: &Uuid) -> Option<CircuitStats> {
        self.entries.get(platform_id).map(|e| e.breaker.stats())
    }

    /// Ids of all registered platforms.
    pub fn platform_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| *e.key()).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
