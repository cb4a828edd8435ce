//! Persistence boundary for events, resources and allocations.
//!
//! The allocator only talks to [`Store`]. Each call is expected to be atomic
//! on its own, nothing more: serializing a read followed by a write is the
//! allocator's job, not the store's. A write that has been handed to the
//! store completes or fails as a unit even if the calling future is dropped.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),
    #[error("event not found: {0}")]
    EventNotFound(EventId),
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError>;

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Booking>, StoreError>;

    /// Every booking on `resource_id`, sorted by start, minus those held by
    /// `exclude_event`.
    async fn list_allocations_for_resource(
        &self,
        resource_id: ResourceId,
        exclude_event: Option<EventId>,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<Booking>, StoreError>;

    /// Insert the row unconditionally apart from foreign-key checks.
    /// Overlap is not checked here.
    async fn insert_allocation(
        &self,
        event_id: EventId,
        resource_id: ResourceId,
    ) -> Result<Allocation, StoreError>;

    /// Returns the removed row, `None` if it did not exist.
    async fn delete_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError>;

    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Removes the event and all its allocations. `false` if it did not exist.
    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError>;

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    async fn insert_resource(&self, resource: NewResource) -> Result<Resource, StoreError>;

    /// Removes the resource and all its allocations. `false` if it did not exist.
    async fn delete_resource(&self, id: ResourceId) -> Result<bool, StoreError>;

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StoreError>;
}
