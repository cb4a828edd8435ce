use std::time::Instant;

use tracing::{debug, info, warn};

use crate::model::*;
use crate::observability;
use crate::store::Store;

use super::conflict::find_conflict;
use super::{AllocError, Allocator, ErrorKind};

impl<S: Store> Allocator<S> {
    /// Book `resource_id` for the whole span of `event_id`.
    ///
    /// Existence is checked up front, then the resource's critical section
    /// covers duplicate detection, the conflict check and the insert. Any
    /// error leaves the store unchanged.
    pub async fn allocate(
        &self,
        event_id: EventId,
        resource_id: ResourceId,
    ) -> Result<AllocationId, AllocError> {
        let started = Instant::now();
        let result = self.allocate_inner(event_id, resource_id).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(observability::ALLOCATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::ALLOCATE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(id) => info!("allocated resource {resource_id} to event {event_id} as {id}"),
            Err(e) => match e.kind() {
                ErrorKind::Conflict | ErrorKind::Duplicate | ErrorKind::NotFound => {
                    debug!("allocate {event_id} -> {resource_id} rejected: {e}")
                }
                _ => warn!("allocate {event_id} -> {resource_id} failed: {e}"),
            },
        }
        result
    }

    async fn allocate_inner(
        &self,
        event_id: EventId,
        resource_id: ResourceId,
    ) -> Result<AllocationId, AllocError> {
        // Events are immutable, so the span read here stays valid under the lock.
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(AllocError::EventNotFound(event_id))?;
        // Unknown resources never get a lock entry.
        if self.store.get_resource(resource_id).await?.is_none() {
            return Err(AllocError::ResourceNotFound(resource_id));
        }

        let guard = self.lock_resource(resource_id).await?;
        let span = event.span;
        self.run_locked(guard, move |store, locks| async move {
            let result = check_and_insert(store.as_ref(), event_id, resource_id, span).await;
            if matches!(result, Err(AllocError::ResourceNotFound(_))) {
                // Deleted while we waited; drop the entry our lookup recreated.
                locks.remove(&resource_id);
            }
            result
        })
        .await
    }

    /// Remove an allocation. Needs no resource lock: removal cannot create overlap.
    pub async fn deallocate(&self, allocation_id: AllocationId) -> Result<(), AllocError> {
        let removed = self
            .store
            .delete_allocation(allocation_id)
            .await?
            .ok_or(AllocError::AllocationNotFound(allocation_id))?;
        metrics::counter!(observability::DEALLOCATIONS_TOTAL).increment(1);
        info!(
            "deallocated {allocation_id} (resource {}, event {})",
            removed.resource_id, removed.event_id
        );
        Ok(())
    }

    pub async fn create_event(&self, event: NewEvent) -> Result<Event, AllocError> {
        let event = self.store.insert_event(event).await?;
        debug!("created event {} {}", event.id, event.span);
        Ok(event)
    }

    pub async fn create_resource(&self, resource: NewResource) -> Result<Resource, AllocError> {
        let resource = self.store.insert_resource(resource).await?;
        debug!("created resource {} ({})", resource.id, resource.category);
        Ok(resource)
    }

    /// Delete an event and, through the store, all of its allocations.
    pub async fn delete_event(&self, event_id: EventId) -> Result<(), AllocError> {
        if !self.store.delete_event(event_id).await? {
            return Err(AllocError::EventNotFound(event_id));
        }
        info!("deleted event {event_id}");
        Ok(())
    }

    /// Delete a resource and its allocations. Waits for any in-flight
    /// `allocate` on the resource to finish first.
    pub async fn delete_resource(&self, resource_id: ResourceId) -> Result<(), AllocError> {
        let guard = self.lock_resource(resource_id).await?;
        let deleted = self
            .run_locked(guard, move |store, locks| async move {
                let deleted = store.delete_resource(resource_id).await?;
                locks.remove(&resource_id);
                Ok::<_, AllocError>(deleted)
            })
            .await?;
        if !deleted {
            return Err(AllocError::ResourceNotFound(resource_id));
        }
        info!("deleted resource {resource_id}");
        Ok(())
    }
}

/// Duplicate check, conflict check and insert. Runs with the resource's
/// lock held.
async fn check_and_insert<S: Store>(
    store: &S,
    event_id: EventId,
    resource_id: ResourceId,
    span: Span,
) -> Result<AllocationId, AllocError> {
    if store.get_resource(resource_id).await?.is_none() {
        return Err(AllocError::ResourceNotFound(resource_id));
    }
    let existing = store.list_allocations_for_resource(resource_id, None).await?;
    if let Some(own) = existing.iter().find(|b| b.event_id == event_id) {
        return Err(AllocError::Duplicate {
            event_id,
            resource_id,
            allocation_id: own.allocation_id,
        });
    }
    if let Some(hit) = find_conflict(&existing, &span, None) {
        return Err(AllocError::Conflict {
            resource_id,
            event_id,
            conflicting_event: hit.event_id,
        });
    }

    // The store re-checks both foreign keys, so a delete that raced past
    // the lookups in `allocate` turns into NotFound here.
    let allocation = store.insert_allocation(event_id, resource_id).await?;
    Ok(allocation.id)
}
