use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{Store, StoreError};

// ── Group-commit WAL writer ──────────────────────────────

type CommitResponse = oneshot::Sender<Result<(), StoreError>>;

enum WalCommand {
    Commit {
        record: Record,
        response: CommitResponse,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    Stats {
        response: oneshot::Sender<WalStats>,
    },
    #[cfg(test)]
    FailNextWrite { after: usize },
}

/// Counters kept by the WAL writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub appends_since_compact: u64,
    /// Group commits performed (one fsync each).
    pub batches: u64,
    /// Most records written by a single group commit.
    pub largest_batch: usize,
}

/// Sole mutator of a durable store's tables.
///
/// Takes one commit, drains whatever else is queued, writes and fsyncs the
/// batch once, then applies it in log order and answers every caller. Live
/// state and replay run the same `Tables::apply` over the same sequence, and
/// a caller that stops waiting does not stop its record from landing.
struct WalWriter {
    wal: Wal,
    tables: Arc<RwLock<Tables>>,
    batches: u64,
    largest_batch: usize,
}

impl WalWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<WalCommand>) {
        while let Some(cmd) = rx.recv().await {
            let (record, response) = match cmd {
                WalCommand::Commit { record, response } => (record, response),
                other => {
                    self.handle_other(other).await;
                    continue;
                }
            };

            let mut records = vec![record];
            let mut responses = vec![response];
            let mut deferred = None;
            while let Ok(next) = rx.try_recv() {
                match next {
                    WalCommand::Commit { record, response } => {
                        records.push(record);
                        responses.push(response);
                    }
                    other => {
                        deferred = Some(other);
                        break;
                    }
                }
            }

            self.commit_batch(records, responses).await;

            if let Some(cmd) = deferred {
                self.handle_other(cmd).await;
            }
        }
    }

    async fn commit_batch(&mut self, records: Vec<Record>, responses: Vec<CommitResponse>) {
        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(records.len() as f64);
        let flush_start = Instant::now();
        let written = self.wal.append_batch(&records);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        self.batches += 1;
        self.largest_batch = self.largest_batch.max(records.len());

        match written {
            Ok(()) => {
                let mut tables = self.tables.write().await;
                for (record, response) in records.iter().zip(responses) {
                    let _ = response.send(tables.apply(record));
                }
            }
            Err(e) => {
                warn!("WAL write of {} records failed: {e}", records.len());
                for response in responses {
                    let _ = response.send(Err(StoreError::Wal(e.to_string())));
                }
            }
        }
    }

    async fn handle_other(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { response } => {
                // This task is the only writer, so the snapshot cannot go stale
                // before the swap.
                let records = self.tables.read().await.snapshot();
                let count = records.len();
                let result = Wal::write_compact_file(self.wal.path(), &records)
                    .and_then(|()| self.wal.swap_compact_file())
                    .map(|()| count);
                let _ = response.send(result);
            }
            WalCommand::Stats { response } => {
                let _ = response.send(WalStats {
                    appends_since_compact: self.wal.appends_since_compact(),
                    batches: self.batches,
                    largest_batch: self.largest_batch,
                });
            }
            #[cfg(test)]
            WalCommand::FailNextWrite { after } => self.wal.fail_next_write_after(after),
            WalCommand::Commit { response, .. } => {
                let _ = response.send(Err(StoreError::Wal(
                    "commit routed to non-commit handler".into(),
                )));
            }
        }
    }
}

fn writer_gone() -> StoreError {
    StoreError::Wal("WAL writer shut down".into())
}

// ── Tables ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    resources: HashMap<ResourceId, Resource>,
    allocations: HashMap<AllocationId, Booking>,
    by_resource: HashMap<ResourceId, ResourceBookings>,
    by_event: HashMap<EventId, Vec<AllocationId>>,
}

impl Tables {
    fn check_allocation(&self, event_id: EventId, resource_id: ResourceId) -> Result<(), StoreError> {
        if !self.events.contains_key(&event_id) {
            return Err(StoreError::EventNotFound(event_id));
        }
        if !self.resources.contains_key(&resource_id) {
            return Err(StoreError::ResourceNotFound(resource_id));
        }
        if self
            .by_resource
            .get(&resource_id)
            .is_some_and(|b| b.len() >= MAX_ALLOCATIONS_PER_RESOURCE)
        {
            return Err(StoreError::LimitExceeded("too many allocations on resource"));
        }
        Ok(())
    }

    /// Apply a record if its references still hold. A rejected record changes
    /// nothing, both live and on replay.
    fn apply(&mut self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::EventCreated {
                id,
                title,
                span,
                description,
            } => {
                self.events.insert(
                    *id,
                    Event {
                        id: *id,
                        title: title.clone(),
                        span: *span,
                        description: description.clone(),
                    },
                );
            }
            Record::EventDeleted { id } => {
                if self.events.remove(id).is_none() {
                    return Err(StoreError::EventNotFound(*id));
                }
                for allocation_id in self.by_event.remove(id).unwrap_or_default() {
                    if let Some(booking) = self.allocations.remove(&allocation_id)
                        && let Some(bookings) = self.by_resource.get_mut(&booking.resource_id)
                    {
                        bookings.remove(allocation_id);
                    }
                }
            }
            Record::ResourceCreated { id, name, category } => {
                self.resources.insert(
                    *id,
                    Resource {
                        id: *id,
                        name: name.clone(),
                        category: category.clone(),
                    },
                );
                self.by_resource.entry(*id).or_default();
            }
            Record::ResourceDeleted { id } => {
                if self.resources.remove(id).is_none() {
                    return Err(StoreError::ResourceNotFound(*id));
                }
                for booking in self.by_resource.remove(id).unwrap_or_default().iter() {
                    self.allocations.remove(&booking.allocation_id);
                    self.unlink_event(booking.event_id, booking.allocation_id);
                }
            }
            Record::AllocationCreated {
                id,
                event_id,
                resource_id,
            } => {
                self.check_allocation(*event_id, *resource_id)?;
                let booking = Booking {
                    allocation_id: *id,
                    event_id: *event_id,
                    resource_id: *resource_id,
                    span: self.events[event_id].span,
                };
                self.allocations.insert(*id, booking);
                self.by_resource.entry(*resource_id).or_default().insert(booking);
                self.by_event.entry(*event_id).or_default().push(*id);
            }
            Record::AllocationDeleted { id } => {
                let Some(booking) = self.allocations.remove(id) else {
                    return Err(StoreError::AllocationNotFound(*id));
                };
                if let Some(bookings) = self.by_resource.get_mut(&booking.resource_id) {
                    bookings.remove(*id);
                }
                self.unlink_event(booking.event_id, *id);
            }
        }
        Ok(())
    }

    fn unlink_event(&mut self, event_id: EventId, allocation_id: AllocationId) {
        if let Some(ids) = self.by_event.get_mut(&event_id) {
            ids.retain(|a| *a != allocation_id);
            if ids.is_empty() {
                self.by_event.remove(&event_id);
            }
        }
    }

    /// Minimal record set that recreates the current tables.
    fn snapshot(&self) -> Vec<Record> {
        let mut resources: Vec<&Resource> = self.resources.values().collect();
        resources.sort_by_key(|r| r.id);
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by_key(|e| e.id);
        let mut allocations: Vec<&Booking> = self.allocations.values().collect();
        allocations.sort_by_key(|b| b.allocation_id);

        let mut records = Vec::with_capacity(resources.len() + events.len() + allocations.len());
        records.extend(resources.into_iter().map(|r| Record::ResourceCreated {
            id: r.id,
            name: r.name.clone(),
            category: r.category.clone(),
        }));
        records.extend(events.into_iter().map(|e| Record::EventCreated {
            id: e.id,
            title: e.title.clone(),
            span: e.span,
            description: e.description.clone(),
        }));
        records.extend(allocations.into_iter().map(|b| Record::AllocationCreated {
            id: b.allocation_id,
            event_id: b.event_id,
            resource_id: b.resource_id,
        }));
        records
    }
}

// ── MemoryStore ──────────────────────────────────────────

/// In-process tables behind one async `RwLock`, optionally backed by a WAL.
///
/// Durable stores route every mutation through the WAL writer task, which
/// logs it before applying it. The tables lock is only taken for the apply,
/// never across the fsync.
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store with no WAL.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            wal_tx: None,
        }
    }

    /// Replay the WAL at `path` and keep appending to it.
    /// Must be called from within a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.torn_tail {
            warn!("{}: discarded torn WAL tail", path.display());
        }
        let mut tables = Tables::default();
        let mut rejected = 0;
        for record in &replay.records {
            if let Err(e) = tables.apply(record) {
                debug!("replay: record rejected: {e}");
                rejected += 1;
            }
        }
        info!(
            "{}: replayed {} records, {rejected} rejected ({} events, {} resources, {} allocations)",
            path.display(),
            replay.records.len(),
            tables.events.len(),
            tables.resources.len(),
            tables.allocations.len()
        );

        let tables = Arc::new(RwLock::new(tables));
        let writer = WalWriter {
            wal: Wal::open(path)?,
            tables: Arc::clone(&tables),
            batches: 0,
            largest_batch: 0,
        };
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(writer.run(wal_rx));

        Ok(Self {
            tables,
            wal_tx: Some(wal_tx),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Log (when durable) and apply one record. Once the record is queued,
    /// dropping this future no longer affects whether it commits.
    async fn commit(&self, record: Record) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return self.tables.write().await.apply(&record);
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Commit {
                record,
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
    }

    /// Rewrite the WAL with only the records needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| writer_gone())?;
        let count = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!("WAL compacted to {count} records");
        Ok(())
    }

    /// Writer counters. `None` for a volatile store.
    pub async fn wal_stats(&self) -> Option<WalStats> {
        let wal_tx = self.wal_tx.as_ref()?;
        let (tx, rx) = oneshot::channel();
        wal_tx.send(WalCommand::Stats { response: tx }).await.ok()?;
        rx.await.ok()
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal_stats().await.map_or(0, |s| s.appends_since_compact)
    }

    #[cfg(test)]
    async fn fail_next_wal_write(&self, after: usize) {
        if let Some(wal_tx) = &self.wal_tx {
            let _ = wal_tx.send(WalCommand::FailNextWrite { after }).await;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.tables.read().await.resources.get(&id).cloned())
    }

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.read().await.allocations.get(&id).copied())
    }

    async fn list_allocations_for_resource(
        &self,
        resource_id: ResourceId,
        exclude_event: Option<EventId>,
    ) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_resource
            .get(&resource_id)
            .map(|bookings| {
                bookings
                    .iter()
                    .filter(|b| Some(b.event_id) != exclude_event)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_allocations(&self, filter: &AllocationFilter) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Booking> = match (filter.resource_id, filter.within) {
            (Some(rid), Some(window)) => tables
                .by_resource
                .get(&rid)
                .map(|bookings| {
                    bookings
                        .contained_in(window)
                        .filter(|b| filter.matches(b))
                        .copied()
                        .collect()
                })
                .unwrap_or_default(),
            (Some(rid), None) => tables
                .by_resource
                .get(&rid)
                .map(|bookings| bookings.iter().filter(|b| filter.matches(b)).copied().collect())
                .unwrap_or_default(),
            (None, Some(window)) => tables
                .by_resource
                .values()
                .flat_map(|bookings| bookings.contained_in(window))
                .filter(|b| filter.matches(b))
                .copied()
                .collect(),
            (None, None) => match filter.event_id {
                Some(eid) => tables
                    .by_event
                    .get(&eid)
                    .map(|ids| ids.iter().filter_map(|id| tables.allocations.get(id)).copied().collect())
                    .unwrap_or_default(),
                None => tables.allocations.values().copied().collect(),
            },
        };
        out.sort_by_key(|b| (b.span.start, b.allocation_id));
        Ok(out)
    }

    async fn insert_allocation(
        &self,
        event_id: EventId,
        resource_id: ResourceId,
    ) -> Result<Allocation, StoreError> {
        // Fail fast without touching the log; the writer checks again on apply.
        self.tables.read().await.check_allocation(event_id, resource_id)?;
        let allocation = Allocation {
            id: AllocationId::generate(),
            event_id,
            resource_id,
        };
        self.commit(Record::AllocationCreated {
            id: allocation.id,
            event_id,
            resource_id,
        })
        .await?;
        Ok(allocation)
    }

    async fn delete_allocation(&self, id: AllocationId) -> Result<Option<Allocation>, StoreError> {
        let Some(booking) = self.tables.read().await.allocations.get(&id).copied() else {
            return Ok(None);
        };
        match self.commit(Record::AllocationDeleted { id }).await {
            Ok(()) => Ok(Some(booking.allocation())),
            Err(StoreError::AllocationNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        event.validate()?;
        let id = EventId::generate();
        self.commit(Record::EventCreated {
            id,
            title: event.title.clone(),
            span: event.span,
            description: event.description.clone(),
        })
        .await?;
        Ok(Event {
            id,
            title: event.title,
            span: event.span,
            description: event.description,
        })
    }

    async fn delete_event(&self, id: EventId) -> Result<bool, StoreError> {
        if !self.tables.read().await.events.contains_key(&id) {
            return Ok(false);
        }
        match self.commit(Record::EventDeleted { id }).await {
            Ok(()) => Ok(true),
            Err(StoreError::EventNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Event> = tables
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.span
                .start
                .cmp(&a.span.start)
                .then_with(|| b.id.cmp(&a.id))
        });
        out.truncate(filter.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT));
        Ok(out)
    }

    async fn insert_resource(&self, resource: NewResource) -> Result<Resource, StoreError> {
        resource.validate()?;
        let id = ResourceId::generate();
        self.commit(Record::ResourceCreated {
            id,
            name: resource.name.clone(),
            category: resource.category.clone(),
        })
        .await?;
        Ok(Resource {
            id,
            name: resource.name,
            category: resource.category,
        })
    }

    async fn delete_resource(&self, id: ResourceId) -> Result<bool, StoreError> {
        if !self.tables.read().await.resources.contains_key(&id) {
            return Ok(false);
        }
        match self.commit(Record::ResourceDeleted { id }).await {
            Ok(()) => Ok(true),
            Err(StoreError::ResourceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Resource> = tables
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }
}
