//! In-memory workflow store.
//!
//! DashMap-backed implementation of the `WorkflowStore` port. Listing
//! applies the filter in memory, orders newest first, and paginates.

use dashmap::DashMap;
use uuid::Uuid;

use maestro_core::repository::workflow::{Page, PageRequest, WorkflowFilter, WorkflowStore};
use maestro_types::error::StoreError;
use maestro_types::workflow::WorkflowDefinition;

/// Thread-safe in-memory store keyed by workflow id.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    items: DashMap<Uuid, WorkflowDefinition>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored definitions.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn matches(def: &WorkflowDefinition, filter: &WorkflowFilter) -> bool {
    if let Some(status) = filter.status {
        if def.status != status {
            return false;
        }
    }
    if let Some(created_by) = &filter.created_by {
        if def.created_by != *created_by {
            return false;
        }
    }
    if let Some(after) = filter.created_after {
        if def.created_at < after {
            return false;
        }
    }
    if let Some(before) = filter.created_before {
        if def.created_at > before {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        let in_name = def.name.to_lowercase().contains(&needle);
        let in_description = def
            .description
            .as_ref()
            .is_some_and(|d| d.to_lowercase().contains(&needle));
        if !in_name && !in_description {
            return false;
        }
    }
    true
}

impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, def: &WorkflowDefinition) -> Result<(), StoreError> {
        if self.items.contains_key(&def.id) {
            return Err(StoreError::Conflict(format!(
                "workflow {} already exists",
                def.id
            )));
        }
        self.items.insert(def.id, def.clone());
        Ok(())
    }

    async fn update(&self, def: &WorkflowDefinition) -> Result<(), StoreError> {
        if !self.items.contains_key(&def.id) {
            return Err(StoreError::NotFound);
        }
        // Whole-definition replace, steps included.
        self.items.insert(def.id, def.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.items.get(id).map(|e| e.clone()))
    }

    async fn list(
        &self,
        filter: &WorkflowFilter,
        page: &PageRequest,
    ) -> Result<Page<WorkflowDefinition>, StoreError> {
        let mut matching: Vec<WorkflowDefinition> = self
            .items
            .iter()
            .filter(|e| matches(e.value(), filter))
            .map(|e| e.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let per_page = page.per_page.max(1) as usize;
        let current = page.page.max(1);
        let total_pages = total.div_ceil(per_page) as u32;
        let items = matching
            .into_iter()
            .skip((current as usize - 1) * per_page)
            .take(per_page)
            .collect();

        Ok(Page {
            items,
            total,
            page: current,
            total_pages,
        })
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, StoreError> {
        Ok(self.items.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use maestro_types::workflow::{StepCondition, WorkflowStatus, WorkflowStep};

    fn definition(name: &str, status: WorkflowStatus, created_by: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: Some(format!("{name} description")),
            status,
            steps: vec![WorkflowStep {
                id: "s1".to_string(),
                agent_id: Uuid::now_v7(),
                step_order: 1,
                name: "Step".to_string(),
                parameters: Default::default(),
                conditions: vec![StepCondition::Always],
                retry: None,
                timeout_secs: None,
            }],
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = InMemoryWorkflowStore::new();
        let def = definition("alpha", WorkflowStatus::Draft, "ops");

        store.create(&def).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&def.id).await.unwrap().unwrap().name, "alpha");

        assert!(store.delete(&def.id).await.unwrap());
        assert!(!store.delete(&def.id).await.unwrap());
        assert!(store.get(&def.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let def = definition("alpha", WorkflowStatus::Draft, "ops");
        store.create(&def).await.unwrap();
        assert!(matches!(
            store.create(&def).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_replaces_steps() {
        let store = InMemoryWorkflowStore::new();
        let mut def = definition("alpha", WorkflowStatus::Draft, "ops");
        store.create(&def).await.unwrap();

        def.steps[0].id = "renamed".to_string();
        store.update(&def).await.unwrap();
        let stored = store.get(&def.id).await.unwrap().unwrap();
        assert_eq!(stored.steps[0].id, "renamed");
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let store = InMemoryWorkflowStore::new();
        let def = definition("alpha", WorkflowStatus::Draft, "ops");
        assert!(matches!(store.update(&def).await, Err(StoreError::NotFound)));
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_filters_by_status_and_creator() {
        let store = InMemoryWorkflowStore::new();
        store
            .create(&definition("one", WorkflowStatus::Active, "alice"))
            .await
            .unwrap();
        store
            .create(&definition("two", WorkflowStatus::Draft, "alice"))
            .await
            .unwrap();
        store
            .create(&definition("three", WorkflowStatus::Active, "bob"))
            .await
            .unwrap();

        let filter = WorkflowFilter {
            status: Some(WorkflowStatus::Active),
            ..Default::default()
        };
        let page = store.list(&filter, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 2);

        let filter = WorkflowFilter {
            status: Some(WorkflowStatus::Active),
            created_by: Some("bob".to_string()),
            ..Default::default()
        };
        let page = store.list(&filter, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "three");
    }

    #[tokio::test]
    async fn test_list_free_text_search() {
        let store = InMemoryWorkflowStore::new();
        store
            .create(&definition("crm-sync", WorkflowStatus::Active, "ops"))
            .await
            .unwrap();
        store
            .create(&definition("report", WorkflowStatus::Active, "ops"))
            .await
            .unwrap();

        let filter = WorkflowFilter {
            search: Some("CRM".to_string()),
            ..Default::default()
        };
        let page = store.list(&filter, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "crm-sync");
    }

    #[tokio::test]
    async fn test_list_date_range() {
        let store = InMemoryWorkflowStore::new();
        let mut old = definition("old", WorkflowStatus::Draft, "ops");
        old.created_at = Utc::now() - Duration::days(30);
        store.create(&old).await.unwrap();
        store
            .create(&definition("recent", WorkflowStatus::Draft, "ops"))
            .await
            .unwrap();

        let filter = WorkflowFilter {
            created_after: Some(Utc::now() - Duration::days(7)),
            ..Default::default()
        };
        let page = store.list(&filter, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "recent");
    }

    #[tokio::test]
    async fn test_list_pagination_newest_first() {
        let store = InMemoryWorkflowStore::new();
        for i in 0..5 {
            let mut def = definition(&format!("wf-{i}"), WorkflowStatus::Draft, "ops");
            def.created_at = Utc::now() + Duration::seconds(i);
            store.create(&def).await.unwrap();
        }

        let request = PageRequest { page: 1, per_page: 2 };
        let page = store
            .list(&WorkflowFilter::default(), &request)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "wf-4", "newest first");

        let request = PageRequest { page: 3, per_page: 2 };
        let last = store
            .list(&WorkflowFilter::default(), &request)
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].name, "wf-0");
    }
}
