use std::time::Duration;

use thiserror::Error;

use crate::model::{AllocationId, EventId, ResourceId, SpanError, ValidationError};
use crate::store::StoreError;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Duplicate,
    Timeout,
    Invalid,
    Store,
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("event not found: {0}")]
    EventNotFound(EventId),
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),
    #[error("resource {resource_id} already booked by event {conflicting_event} during event {event_id}")]
    Conflict {
        resource_id: ResourceId,
        event_id: EventId,
        conflicting_event: EventId,
    },
    #[error("event {event_id} already holds resource {resource_id} (allocation {allocation_id})")]
    Duplicate {
        event_id: EventId,
        resource_id: ResourceId,
        allocation_id: AllocationId,
    },
    #[error("timed out after {waited:?} waiting for resource {resource_id}")]
    Timeout {
        resource_id: ResourceId,
        waited: Duration,
    },
    #[error(transparent)]
    InvalidSpan(#[from] SpanError),
    #[error("invalid input: {0}")]
    Invalid(ValidationError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("store error: {0}")]
    Store(StoreError),
    /// The task running the critical section panicked or was cancelled.
    #[error("allocation task failed: {0}")]
    Aborted(String),
}

impl AllocError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EventNotFound(_) | Self::ResourceNotFound(_) | Self::AllocationNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidSpan(_) | Self::Invalid(_) | Self::LimitExceeded(_) => ErrorKind::Invalid,
            Self::Store(_) | Self::Aborted(_) => ErrorKind::Store,
        }
    }

    /// Safe to retry the same call unchanged, with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Store(StoreError::Wal(_)))
    }

    /// The requested allocation already exists.
    pub fn is_success_equivalent(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Store => "store_error",
        }
    }
}

impl From<ValidationError> for AllocError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Span(span) => Self::InvalidSpan(span),
            other => Self::Invalid(other),
        }
    }
}

/// Foreign-key failures surface as the matching not-found variant.
impl From<StoreError> for AllocError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EventNotFound(id) => Self::EventNotFound(id),
            StoreError::ResourceNotFound(id) => Self::ResourceNotFound(id),
            StoreError::AllocationNotFound(id) => Self::AllocationNotFound(id),
            StoreError::LimitExceeded(msg) => Self::LimitExceeded(msg),
            StoreError::Invalid(v) => v.into(),
            other => Self::Store(other),
        }
    }
}
