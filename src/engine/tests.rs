use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::assert_pending;

use super::*;
use crate::model::*;
use crate::store::{MemoryStore, StoreError};
use crate::time::day_start;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn allocator() -> Allocator<MemoryStore> {
    Allocator::new(Arc::new(MemoryStore::new()), AllocatorConfig::default())
}

fn durable_allocator(path: &PathBuf) -> Allocator<MemoryStore> {
    Allocator::new(
        Arc::new(MemoryStore::open(path).unwrap()),
        AllocatorConfig::default(),
    )
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("resalloc_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Drive a spawned future to completion, letting other tasks run between polls.
async fn finish<F: std::future::Future>(task: &mut tokio_test::task::Spawn<F>) -> F::Output {
    loop {
        if let Poll::Ready(out) = task.poll() {
            return out;
        }
        tokio::task::yield_now().await;
    }
}

async fn event<S: Store>(alloc: &Allocator<S>, start: Ms, end: Ms) -> EventId {
    alloc
        .create_event(NewEvent::new(format!("event {start}-{end}"), Span::new(start, end)))
        .await
        .unwrap()
        .id
}

async fn room<S: Store>(alloc: &Allocator<S>, name: &str) -> ResourceId {
    alloc
        .create_resource(NewResource::new(name, "Room"))
        .await
        .unwrap()
        .id
}

/// Pairwise non-overlap of every resource's bookings.
async fn assert_invariant<S: Store>(alloc: &Allocator<S>) {
    let resources = alloc.list_resources(&ResourceFilter::default()).await.unwrap();
    for resource in resources {
        let bookings = alloc
            .store()
            .list_allocations_for_resource(resource.id, None)
            .await
            .unwrap();
        for (i, a) in bookings.iter().enumerate() {
            for b in &bookings[i + 1..] {
                assert!(
                    !a.span.overlaps(&b.span),
                    "resource {} double-booked: {} and {}",
                    resource.id,
                    a.span,
                    b.span
                );
            }
        }
    }
}

// ── Store wrapper for fault and race injection ───────────────

/// Delegates to a `MemoryStore`, optionally sleeping between the read of a
/// resource's bookings and returning it, and optionally failing inserts.
struct TestStore {
    inner: MemoryStore,
    read_delay: Duration,
    fail_inserts: AtomicBool,
}

impl TestStore {
    fn new(read_delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            read_delay,
            fail_inserts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Store for TestStore {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(id).await
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        self.inner.get_resource(id).await
    }

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Booking>, StoreError> {
        self.inner.get_allocation(id).await
    }

    async fn list_allocations_for_resource(
        &self,
        resource_id: ResourceId,
        exclude_event: Option<EventId>,
    ) -> Result<Vec<Booking>, StoreError> {
        let out = self
            .inner
            .list_allocations_for_resource(resource_id, exclude_event)
            .await;
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        out
    }

    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<Booking>, StoreError> {
        self.inner.list_allocations(filter).await
    }

    async fn insert_allocation(
        &self,
        event_id: EventId,
        resource_id: ResourceId,
    ) -> Result<Allocation, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Wal("injected failure".into()));
        }
        self.inner.insert_allocation(event_id, resource_id).await
    }

    async fn delete_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        self.inner.delete_allocation(id).await
    }

    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        self.inner.insert_event(event).await
    }

    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError> {
        self.inner.delete_event(id).await
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        self.inner.list_events(filter).await
    }

    async fn insert_resource(&self, resource: NewResource) -> Result<Resource, StoreError> {
        self.inner.insert_resource(resource).await
    }

    async fn delete_resource(&self, id: ResourceId) -> Result<bool, StoreError> {
        self.inner.delete_resource(id).await
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StoreError> {
        self.inner.list_resources(filter).await
    }
}

// ── allocate ─────────────────────────────────────────────────

#[tokio::test]
async fn allocate_and_read_back() {
    let alloc = allocator();
    let e = event(&alloc, 9 * H, 10 * H).await;
    let r = room(&alloc, "Room A").await;

    let id = alloc.allocate(e, r).await.unwrap();
    let booking = alloc.store().get_allocation(id).await.unwrap().unwrap();
    assert_eq!(booking.event_id, e);
    assert_eq!(booking.resource_id, r);
    assert_eq!(booking.span, Span::new(9 * H, 10 * H));
}

#[tokio::test]
async fn allocate_missing_event_or_resource() {
    let alloc = allocator();
    let e = event(&alloc, 0, H).await;
    let r = room(&alloc, "Room A").await;

    let err = alloc.allocate(EventId::generate(), r).await.unwrap_err();
    assert!(matches!(err, AllocError::EventNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = alloc.allocate(e, ResourceId::generate()).await.unwrap_err();
    assert!(matches!(err, AllocError::ResourceNotFound(_)));
    // Unknown resources never get a lock entry.
    assert_eq!(alloc.lock_count(), 0);
}

#[tokio::test]
async fn back_to_back_bookings_allowed() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let first = event(&alloc, 10 * H, 11 * H).await;
    let second = event(&alloc, 11 * H, 12 * H).await;

    alloc.allocate(first, r).await.unwrap();
    alloc.allocate(second, r).await.unwrap();
    assert_eq!(
        alloc.store().list_allocations_for_resource(r, None).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn overlapping_booking_conflicts_without_state_change() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let booked = event(&alloc, 10 * H, 12 * H).await;
    let late = event(&alloc, 11 * H, 13 * H).await;

    alloc.allocate(booked, r).await.unwrap();
    let err = alloc.allocate(late, r).await.unwrap_err();
    match err {
        AllocError::Conflict {
            resource_id,
            event_id,
            conflicting_event,
        } => {
            assert_eq!(resource_id, r);
            assert_eq!(event_id, late);
            assert_eq!(conflicting_event, booked);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(alloc.allocations_for_event(late).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_allocation_is_distinct_error() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 10 * H, 11 * H).await;

    let first = alloc.allocate(e, r).await.unwrap();
    let err = alloc.allocate(e, r).await.unwrap_err();
    assert!(err.is_success_equivalent());
    assert!(matches!(
        err,
        AllocError::Duplicate { allocation_id, .. } if allocation_id == first
    ));
    assert_eq!(alloc.allocations_for_event(e).await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_event_can_hold_several_resources() {
    let alloc = allocator();
    let e = event(&alloc, 10 * H, 11 * H).await;
    let r1 = room(&alloc, "Room A").await;
    let projector = alloc
        .create_resource(NewResource::new("Projector", "Equipment"))
        .await
        .unwrap()
        .id;

    alloc.allocate(e, r1).await.unwrap();
    alloc.allocate(e, projector).await.unwrap();
    assert_eq!(alloc.allocations_for_event(e).await.unwrap().len(), 2);
}

#[tokio::test]
async fn store_failure_leaves_no_allocation() {
    let store = Arc::new(TestStore::new(Duration::ZERO));
    let alloc = Allocator::new(store.clone(), AllocatorConfig::default());
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;

    store.fail_inserts.store(true, Ordering::SeqCst);
    let err = alloc.allocate(e, r).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);
    assert!(err.is_retryable());
    assert!(alloc.allocations_for_event(e).await.unwrap().is_empty());

    // The lock was released on the error path.
    store.fail_inserts.store(false, Ordering::SeqCst);
    alloc.allocate(e, r).await.unwrap();
}

// ── deallocate ───────────────────────────────────────────────

#[tokio::test]
async fn deallocate_frees_the_slot() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let a = event(&alloc, 10 * H, 12 * H).await;
    let b = event(&alloc, 11 * H, 12 * H).await;

    let id = alloc.allocate(a, r).await.unwrap();
    assert!(alloc.allocate(b, r).await.is_err());

    alloc.deallocate(id).await.unwrap();
    alloc.allocate(b, r).await.unwrap();
}

#[tokio::test]
async fn deallocate_unknown_is_not_found() {
    let alloc = allocator();
    let err = alloc.deallocate(AllocationId::generate()).await.unwrap_err();
    assert!(matches!(err, AllocError::AllocationNotFound(_)));

    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;
    let id = alloc.allocate(e, r).await.unwrap();
    alloc.deallocate(id).await.unwrap();
    assert!(matches!(
        alloc.deallocate(id).await,
        Err(AllocError::AllocationNotFound(_))
    ));
}

#[tokio::test]
async fn deallocate_does_not_unblock_third_overlap() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let a = event(&alloc, 10 * H, 12 * H).await;
    let c = event(&alloc, 12 * H, 14 * H).await;
    let x = event(&alloc, 11 * H, 13 * H).await;

    let a_id = alloc.allocate(a, r).await.unwrap();
    let c_id = alloc.allocate(c, r).await.unwrap();
    assert!(matches!(alloc.allocate(x, r).await, Err(AllocError::Conflict { .. })));

    alloc.deallocate(a_id).await.unwrap();
    let err = alloc.allocate(x, r).await.unwrap_err();
    assert!(matches!(err, AllocError::Conflict { conflicting_event, .. } if conflicting_event == c));

    alloc.deallocate(c_id).await.unwrap();
    alloc.allocate(x, r).await.unwrap();
    assert_invariant(&alloc).await;
}

// ── has_conflict ─────────────────────────────────────────────

#[tokio::test]
async fn has_conflict_reflects_committed_state() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 10 * H, 11 * H).await;

    assert!(!alloc.has_conflict(r, Span::new(10 * H, 11 * H), None).await.unwrap());
    alloc.allocate(e, r).await.unwrap();

    assert!(alloc.has_conflict(r, Span::new(10 * H + 30 * M, 12 * H), None).await.unwrap());
    assert!(!alloc.has_conflict(r, Span::new(11 * H, 12 * H), None).await.unwrap());
    assert!(!alloc.has_conflict(r, Span::new(9 * H, 10 * H), None).await.unwrap());
    // Re-checking the event's own booking.
    assert!(!alloc.has_conflict(r, Span::new(10 * H, 11 * H), Some(e)).await.unwrap());
}

#[tokio::test]
async fn has_conflict_rejects_degenerate_span() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let err = alloc
        .has_conflict(r, Span { start: H, end: H }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AllocError::InvalidSpan(_)));
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn has_conflict_unknown_resource_is_false() {
    let alloc = allocator();
    assert!(!alloc
        .has_conflict(ResourceId::generate(), Span::new(0, H), None)
        .await
        .unwrap());
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_allocations_admit_exactly_one() {
    // The read delay widens the window between check and insert; without
    // the resource lock every caller would pass the check.
    let store = Arc::new(TestStore::new(Duration::from_millis(5)));
    let alloc = Arc::new(Allocator::new(store, AllocatorConfig::default()));
    let r = room(&alloc, "Room A").await;

    let n = 16;
    let mut events = Vec::new();
    for i in 0..n {
        // All contain 10:00-10:30, with staggered edges.
        events.push(event(&alloc, 9 * H + i * M, 10 * H + 30 * M + i * M).await);
    }

    let mut handles = Vec::new();
    for e in events {
        let alloc = alloc.clone();
        handles.push(tokio::spawn(async move { alloc.allocate(e, r).await }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AllocError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, n - 1);
    assert_eq!(
        alloc.store().list_allocations_for_resource(r, None).await.unwrap().len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_requests_commit_once() {
    let store = Arc::new(TestStore::new(Duration::from_millis(5)));
    let alloc = Arc::new(Allocator::new(store, AllocatorConfig::default()));
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;

    let results = futures::future::join_all((0..8).map(|_| {
        let alloc = alloc.clone();
        tokio::spawn(async move { alloc.allocate(e, r).await })
    }))
    .await;

    let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let dup = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(AllocError::Duplicate { .. }))))
        .count();
    assert_eq!((ok, dup), (1, 7));
    assert_eq!(alloc.allocations_for_event(e).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_resource_admits_one_of_its_contenders() {
    let alloc = Arc::new(allocator());
    let mut rooms = Vec::new();
    for i in 0..8 {
        rooms.push(room(&alloc, &format!("Room {i}")).await);
    }
    let mut contenders = Vec::new();
    for _ in 0..6 {
        contenders.push(event(&alloc, 10 * H, 11 * H).await);
    }

    let mut handles = Vec::new();
    for &r in &rooms {
        for &e in &contenders {
            let alloc = alloc.clone();
            handles.push(tokio::spawn(async move { (r, alloc.allocate(e, r).await) }));
        }
    }

    let mut winners = HashSet::new();
    for h in handles {
        let (r, result) = h.await.unwrap();
        if result.is_ok() {
            assert!(winners.insert(r), "two winners on {r}");
        }
    }
    assert_eq!(winners.len(), rooms.len());
    assert_invariant(alloc.as_ref()).await;
}

#[tokio::test]
async fn lock_timeout_surfaces_as_retryable_timeout() {
    let config = AllocatorConfig {
        lock_timeout: Duration::from_millis(20),
    };
    let alloc = Allocator::new(Arc::new(MemoryStore::new()), config);
    let r = room(&alloc, "Room A").await;
    let other = room(&alloc, "Room B").await;
    let e = event(&alloc, 0, H).await;

    let guard = alloc.lock_resource(r).await.unwrap();
    let err = alloc.allocate(e, r).await.unwrap_err();
    assert!(matches!(err, AllocError::Timeout { resource_id, .. } if resource_id == r));
    assert!(err.is_retryable());
    assert!(alloc.allocations_for_event(e).await.unwrap().is_empty());

    // A different resource does not contend.
    alloc.allocate(e, other).await.unwrap();

    drop(guard);
    alloc.allocate(e, r).await.unwrap();
}

#[tokio::test]
async fn allocate_waits_for_the_resource_lock() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;

    let guard = alloc.lock_resource(r).await.unwrap();
    let mut pending = tokio_test::task::spawn(alloc.allocate(e, r));
    assert_pending!(pending.poll());

    drop(guard);
    assert!(pending.is_woken());
    let id = finish(&mut pending).await.unwrap();
    drop(pending);
    assert_eq!(alloc.allocations_for_event(e).await.unwrap()[0].allocation_id, id);
}

#[tokio::test]
async fn cancelled_allocate_keeps_holding_the_slot() {
    let path = test_wal_path("cancelled_allocate.wal");
    let alloc = durable_allocator(&path);
    let r = room(&alloc, "Room A").await;
    let first = event(&alloc, 10 * H, 12 * H).await;
    let rival = event(&alloc, 11 * H, 13 * H).await;

    {
        // Polled into the critical section, then abandoned by the caller.
        let mut abandoned = tokio_test::task::spawn(alloc.allocate(first, r));
        assert_pending!(abandoned.poll());
    }

    let err = alloc.allocate(rival, r).await.unwrap_err();
    assert!(matches!(err, AllocError::Conflict { conflicting_event, .. } if conflicting_event == first));
    assert_eq!(alloc.allocations_for_event(first).await.unwrap().len(), 1);

    let reopened = durable_allocator(&path);
    let bookings = reopened
        .store()
        .list_allocations_for_resource(r, None)
        .await
        .unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].event_id, first);
    assert_invariant(&reopened).await;
}

#[tokio::test]
async fn resource_deleted_while_waiting_leaves_no_lock() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;

    let guard = alloc.lock_resource(r).await.unwrap();
    let mut waiting = tokio_test::task::spawn(alloc.allocate(e, r));
    assert_pending!(waiting.poll());

    // Removed behind the allocator's back while the call waits for the lock.
    assert!(alloc.store().delete_resource(r).await.unwrap());
    drop(guard);

    let err = finish(&mut waiting).await.unwrap_err();
    assert!(matches!(err, AllocError::ResourceNotFound(id) if id == r));
    drop(waiting);
    assert_eq!(alloc.lock_count(), 0);
}

// ── Invariant under mixed operation sequences ────────────────

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

#[tokio::test]
async fn invariant_holds_across_random_operations() {
    let alloc = allocator();
    let mut rng = Lcg(0x5EED);
    let mut rooms = Vec::new();
    for i in 0..3 {
        rooms.push(room(&alloc, &format!("Room {i}")).await);
    }
    let mut events = Vec::new();
    let mut allocations = Vec::new();

    for step in 0..400 {
        match rng.next(10) {
            0..=2 => {
                let start = rng.next(48) as Ms * 30 * M;
                let len = (rng.next(6) as Ms + 1) * 30 * M;
                events.push(event(&alloc, start, start + len).await);
            }
            3..=7 if !events.is_empty() => {
                let e = events[rng.next(events.len() as u64) as usize];
                let r = rooms[rng.next(rooms.len() as u64) as usize];
                let span = alloc.get_event(e).await.map(|ev| ev.span);
                let predicted = match span {
                    Ok(span) => alloc.has_conflict(r, span, Some(e)).await.unwrap(),
                    Err(_) => false,
                };
                match alloc.allocate(e, r).await {
                    Ok(id) => {
                        assert!(!predicted, "step {step}: allocate succeeded despite conflict");
                        allocations.push(id);
                    }
                    Err(AllocError::Conflict { .. }) => {
                        assert!(predicted, "step {step}: conflict not predicted")
                    }
                    Err(AllocError::Duplicate { .. } | AllocError::EventNotFound(_)) => {}
                    Err(other) => panic!("step {step}: {other}"),
                }
            }
            8 if !allocations.is_empty() => {
                let idx = rng.next(allocations.len() as u64) as usize;
                let id = allocations.swap_remove(idx);
                // May already be gone through an event cascade.
                let _ = alloc.deallocate(id).await;
            }
            9 if !events.is_empty() => {
                let idx = rng.next(events.len() as u64) as usize;
                alloc.delete_event(events.swap_remove(idx)).await.unwrap();
            }
            _ => {}
        }
        assert_invariant(&alloc).await;
    }
}

// ── Deletes ──────────────────────────────────────────────────

#[tokio::test]
async fn delete_event_cascades_and_frees_slot() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let a = event(&alloc, 10 * H, 12 * H).await;
    let b = event(&alloc, 10 * H, 12 * H).await;
    let id = alloc.allocate(a, r).await.unwrap();

    alloc.delete_event(a).await.unwrap();
    assert!(alloc.store().get_allocation(id).await.unwrap().is_none());
    alloc.allocate(b, r).await.unwrap();

    assert!(matches!(
        alloc.delete_event(a).await,
        Err(AllocError::EventNotFound(_))
    ));
}

#[tokio::test]
async fn delete_resource_cascades_and_drops_lock() {
    let alloc = allocator();
    let r = room(&alloc, "Room A").await;
    let e = event(&alloc, 0, H).await;
    alloc.allocate(e, r).await.unwrap();
    assert_eq!(alloc.lock_count(), 1);

    alloc.delete_resource(r).await.unwrap();
    assert_eq!(alloc.lock_count(), 0);
    assert!(alloc.allocations_for_event(e).await.unwrap().is_empty());
    assert!(matches!(
        alloc.allocate(e, r).await,
        Err(AllocError::ResourceNotFound(_))
    ));
    assert!(matches!(
        alloc.delete_resource(r).await,
        Err(AllocError::ResourceNotFound(_))
    ));
}

// ── Utilization ──────────────────────────────────────────────

#[tokio::test]
async fn utilization_january_report() {
    let alloc = allocator();
    let jan1 = day_start(2025, 1, 1).unwrap();
    let jan31 = day_start(2025, 1, 31).unwrap();
    let hall = room(&alloc, "Hall").await;
    let lab = room(&alloc, "Lab").await;
    let idle = room(&alloc, "Idle").await;

    let d10 = day_start(2025, 1, 10).unwrap();
    let d20 = day_start(2025, 1, 20).unwrap();
    for start in [d10 + 9 * H, d20 + 14 * H] {
        let e = event(&alloc, start, start + 2 * H).await;
        alloc.allocate(e, hall).await.unwrap();
    }
    // Straddles the end of the window: excluded entirely.
    let straddle = event(&alloc, jan31 - H, jan31 + 5 * H).await;
    alloc.allocate(straddle, hall).await.unwrap();
    let short = event(&alloc, d10 + 9 * H, d10 + 10 * H).await;
    alloc.allocate(short, lab).await.unwrap();

    let report = alloc.utilization(Span::new(jan1, jan31)).await.unwrap();
    assert_eq!(report.len(), 2);
    assert!(report.get(idle).is_none());

    let rows: Vec<&UtilizationRow> = report.iter().collect();
    assert_eq!(rows[0].resource.id, hall);
    assert_eq!(rows[0].bookings, 2);
    assert_eq!(rows[0].booked_ms, 4 * H);
    assert_eq!(rows[0].booked_hms(), "04:00:00");
    assert_eq!(rows[1].resource.id, lab);
    assert_eq!(rows[1].booked_ms, H);

    // Restartable: a second pass sees the same rows.
    let again: Vec<ResourceId> = (&report).into_iter().map(|r| r.resource.id).collect();
    assert_eq!(again, vec![hall, lab]);
    assert_eq!(report.total_booked_ms(), 5 * H);
}

#[tokio::test]
async fn utilization_rejects_bad_window() {
    let alloc = allocator();
    assert!(matches!(
        alloc.utilization(Span { start: H, end: 0 }).await,
        Err(AllocError::InvalidSpan(_))
    ));
}

// ── Listings ─────────────────────────────────────────────────

#[tokio::test]
async fn event_overview_lists_resource_names() {
    let alloc = allocator();
    let early = event(&alloc, H, 2 * H).await;
    let late = event(&alloc, 5 * H, 6 * H).await;
    let a = room(&alloc, "Room B").await;
    let b = room(&alloc, "Room A").await;
    alloc.allocate(late, a).await.unwrap();
    alloc.allocate(late, b).await.unwrap();

    let overview = alloc.event_overview(&EventFilter::recent(5)).await.unwrap();
    assert_eq!(overview.len(), 2);
    assert_eq!(overview[0].event.id, late);
    assert_eq!(overview[0].resource_names(), vec!["Room A", "Room B"]);
    assert_eq!(overview[1].event.id, early);
    assert!(overview[1].resources.is_empty());
}

#[tokio::test]
async fn resource_status_flags_allocated() {
    let alloc = allocator();
    let e = event(&alloc, 0, H).await;
    let held = room(&alloc, "Room A").await;
    let free = room(&alloc, "Room B").await;
    let id = alloc.allocate(e, held).await.unwrap();

    let status = alloc.resource_status_for_event(e).await.unwrap();
    assert_eq!(status.len(), 2);
    let by_id = |rid: ResourceId| status.iter().find(|s| s.resource.id == rid).unwrap();
    assert_eq!(by_id(held).allocation_id, Some(id));
    assert!(!by_id(free).is_allocated());

    assert!(matches!(
        alloc.resource_status_for_event(EventId::generate()).await,
        Err(AllocError::EventNotFound(_))
    ));
}

#[tokio::test]
async fn create_event_validates_input() {
    let alloc = allocator();
    let err = alloc
        .create_event(NewEvent::new("Empty", Span { start: H, end: H }))
        .await
        .unwrap_err();
    assert!(matches!(err, AllocError::InvalidSpan(_)));

    let err = alloc
        .create_resource(NewResource::new("", "Room"))
        .await
        .unwrap_err();
    assert!(matches!(err, AllocError::Invalid(ValidationError::Empty { field: "name" })));
}
