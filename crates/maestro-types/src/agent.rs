//! Agent inventory model.
//!
//! An agent is an external automation unit hosted on a platform. The engine
//! resolves a step's `agent_id` to an `Agent` to learn which platform
//! adapter to call and which external id to pass it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// An external automation unit registered in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Internal agent id (referenced by workflow steps).
    pub id: Uuid,
    /// Human-readable agent name.
    pub name: String,
    /// The platform connection hosting this agent.
    pub platform_id: Uuid,
    /// The agent's id on the remote platform.
    pub external_id: String,
    /// Last known health/lifecycle status.
    pub status: AgentStatus,
}

/// Health/lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

impl AgentStatus {
    /// Whether the agent is considered healthy for validation purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Active)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
