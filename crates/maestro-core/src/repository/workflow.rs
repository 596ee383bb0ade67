//! Workflow store trait definition.
//!
//! Defines the persistence interface for workflow definitions. Updates
//! replace the whole definition (including the full step set) in one
//! operation; steps are never patched individually.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use maestro_types::error::StoreError;
use maestro_types::workflow::{WorkflowDefinition, WorkflowStatus};

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Filters for listing workflow definitions. All fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub created_by: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring match over name and description.
    pub search: Option<String>,
}

/// Pagination request. Pages are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total matching items across all pages.
    pub total: usize,
    pub page: u32,
    pub total_pages: u32,
}

// ---------------------------------------------------------------------------
// WorkflowStore trait
// ---------------------------------------------------------------------------

/// Durable CRUD for workflow definitions.
pub trait WorkflowStore: Send + Sync {
    /// Persist a new definition. Fails with `Conflict` if the id exists.
    fn create(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Replace an existing definition wholesale (including its step set).
    /// Fails with `NotFound` if the id is unknown.
    fn update(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Fetch a definition by id.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, StoreError>> + Send;

    /// List definitions matching `filter`, newest first, paginated.
    fn list(
        &self,
        filter: &WorkflowFilter,
        page: &PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<WorkflowDefinition>, StoreError>> + Send;

    /// Delete a definition by id. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
