use std::collections::HashMap;

use crate::model::*;
use crate::store::Store;

use super::conflict::{self, validate_span};
use super::{AllocError, Allocator};

/// An event with the resources allocated to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    pub event: Event,
    /// Sorted by name.
    pub resources: Vec<Resource>,
}

impl EventSummary {
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }
}

/// One resource as seen from a particular event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub resource: Resource,
    /// Set when the event already holds this resource.
    pub allocation_id: Option<AllocationId>,
}

impl ResourceStatus {
    pub fn is_allocated(&self) -> bool {
        self.allocation_id.is_some()
    }
}

impl<S: Store> Allocator<S> {
    /// Advisory pre-flight check. `allocate` re-checks under the resource
    /// lock, so a `false` here is no promise that allocation will succeed.
    pub async fn has_conflict(
        &self,
        resource_id: ResourceId,
        span: Span,
        exclude_event: Option<EventId>,
    ) -> Result<bool, AllocError> {
        validate_span(&span)?;
        let existing = self
            .store
            .list_allocations_for_resource(resource_id, exclude_event)
            .await?;
        Ok(conflict::has_conflict(&existing, &span, exclude_event))
    }

    pub async fn get_event(&self, event_id: EventId) -> Result<Event, AllocError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or(AllocError::EventNotFound(event_id))
    }

    pub async fn get_resource(&self, resource_id: ResourceId) -> Result<Resource, AllocError> {
        self.store
            .get_resource(resource_id)
            .await?
            .ok_or(AllocError::ResourceNotFound(resource_id))
    }

    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AllocError> {
        Ok(self.store.list_events(filter).await?)
    }

    pub async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, AllocError> {
        Ok(self.store.list_resources(filter).await?)
    }

    pub async fn allocations_for_event(&self, event_id: EventId) -> Result<Vec<Booking>, AllocError> {
        self.get_event(event_id).await?;
        Ok(self
            .store
            .list_allocations(&AllocationFilter::for_event(event_id))
            .await?)
    }

    /// Events matching `filter`, newest first, each with its allocated resources.
    pub async fn event_overview(&self, filter: &EventFilter) -> Result<Vec<EventSummary>, AllocError> {
        let events = self.store.list_events(filter).await?;
        let resources: HashMap<ResourceId, Resource> = self
            .store
            .list_resources(&ResourceFilter::default())
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let mut held: Vec<Resource> = self
                .store
                .list_allocations(&AllocationFilter::for_event(event.id))
                .await?
                .iter()
                .filter_map(|b| resources.get(&b.resource_id).cloned())
                .collect();
            held.sort_by(|a, b| a.name.cmp(&b.name));
            out.push(EventSummary {
                event,
                resources: held,
            });
        }
        Ok(out)
    }

    /// Every resource, ordered by category then name, flagged with whether
    /// `event_id` holds it.
    pub async fn resource_status_for_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<ResourceStatus>, AllocError> {
        let held: HashMap<ResourceId, AllocationId> = self
            .allocations_for_event(event_id)
            .await?
            .into_iter()
            .map(|b| (b.resource_id, b.allocation_id))
            .collect();
        Ok(self
            .store
            .list_resources(&ResourceFilter::default())
            .await?
            .into_iter()
            .map(|resource| ResourceStatus {
                allocation_id: held.get(&resource.id).copied(),
                resource,
            })
            .collect())
    }
}
