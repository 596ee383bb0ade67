//! In-memory agent directory.

use dashmap::DashMap;
use uuid::Uuid;

use maestro_core::adapter::AgentDirectory;
use maestro_types::agent::{Agent, AgentStatus};
use maestro_types::error::StoreError;

/// DashMap-backed implementation of the `AgentDirectory` port.
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    agents: DashMap<Uuid, Agent>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent.
    pub fn insert(&self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    /// Remove an agent. Returns `true` if it existed.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.agents.remove(id).is_some()
    }

    /// Update an agent's status in place. Returns `false` if unknown.
    pub fn set_status(&self, id: &Uuid, status: AgentStatus) -> bool {
        match self.agents.get_mut(id) {
            Some(mut agent) => {
                agent.status = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentDirectory for InMemoryAgentDirectory {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        Ok(self.agents.get(&id).map(|e| e.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
