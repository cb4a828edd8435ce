use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::*;

/// Unix milliseconds, UTC.
pub type Ms = i64;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Fresh, time-ordered identifier.
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            pub fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl From<Ulid> for $name {
            fn from(id: Ulid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Store-assigned event identifier.
    EventId
);
id_type!(
    /// Store-assigned resource identifier.
    ResourceId
);
id_type!(
    /// Store-assigned allocation identifier.
    AllocationId
);

// ── Interval model ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid span [{start}, {end}): start must be before end")]
pub struct SpanError {
    pub start: Ms,
    pub end: Ms,
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Build a span the caller already knows to be non-empty.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input. Empty and inverted spans are rejected.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, SpanError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(SpanError { start, end })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `A.start < B.end && B.start < A.end`. Touching spans do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Non-empty, inside the valid timestamp range, no longer than `max_duration`.
    pub fn check_bounds(&self, max_duration: Ms) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(SpanError {
                start: self.start,
                end: self.end,
            }
            .into());
        }
        if self.start < MIN_VALID_TIMESTAMP_MS || self.end > MAX_VALID_TIMESTAMP_MS {
            return Err(ValidationError::TimestampOutOfRange);
        }
        if self.duration_ms() > max_duration {
            return Err(ValidationError::SpanTooWide);
        }
        Ok(())
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Span(#[from] SpanError),
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("timestamp out of range")]
    TimestampOutOfRange,
    #[error("span too wide")]
    SpanTooWide,
}

fn check_text(field: &'static str, value: &str, max: usize, required: bool) -> Result<(), ValidationError> {
    if required && value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

// ── Rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub span: Span,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    /// Free-form category tag, e.g. "Room" or "Projector".
    pub category: String,
}

/// A committed booking of `resource_id` for the full span of `event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub event_id: EventId,
    pub resource_id: ResourceId,
}

/// An allocation joined with the span of its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booking {
    pub allocation_id: AllocationId,
    pub event_id: EventId,
    pub resource_id: ResourceId,
    pub span: Span,
}

impl Booking {
    pub fn allocation(&self) -> Allocation {
        Allocation {
            id: self.allocation_id,
            event_id: self.event_id,
            resource_id: self.resource_id,
        }
    }
}

/// Input for event creation. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub span: Span,
    pub description: String,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, span: Span) -> Self {
        Self {
            title: title.into(),
            span,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text("title", &self.title, MAX_TITLE_LEN, true)?;
        check_text("description", &self.description, MAX_DESCRIPTION_LEN, false)?;
        self.span.check_bounds(MAX_SPAN_DURATION_MS)
    }
}

/// Input for resource creation. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    pub category: String,
}

impl NewResource {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text("name", &self.name, MAX_NAME_LEN, true)?;
        check_text("category", &self.category, MAX_CATEGORY_LEN, true)
    }
}

// ── Filters ──────────────────────────────────────────────────────

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Event listing filter. Results are ordered newest start first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Keep events overlapping this window.
    pub window: Option<Span>,
    /// Case-insensitive substring match on the title.
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    /// The `n` most recent events.
    pub fn recent(n: usize) -> Self {
        Self {
            limit: Some(n),
            ..Self::default()
        }
    }

    pub fn overlapping(window: Span) -> Self {
        Self {
            window: Some(window),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.window.is_none_or(|w| w.overlaps(&event.span))
            && self
                .title_contains
                .as_deref()
                .is_none_or(|t| contains_ci(&event.title, t))
    }
}

/// Resource listing filter. Results are ordered by category, then name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Exact (case-insensitive) category match.
    pub category: Option<String>,
    pub name_contains: Option<String>,
}

impl ResourceFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.category
            .as_deref()
            .is_none_or(|c| resource.category.eq_ignore_ascii_case(c))
            && self
                .name_contains
                .as_deref()
                .is_none_or(|n| contains_ci(&resource.name, n))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationFilter {
    pub resource_id: Option<ResourceId>,
    pub event_id: Option<EventId>,
    /// Keep bookings whose span lies fully inside this window.
    pub within: Option<Span>,
}

impl AllocationFilter {
    pub fn for_event(event_id: EventId) -> Self {
        Self {
            event_id: Some(event_id),
            ..Self::default()
        }
    }

    pub fn within(window: Span) -> Self {
        Self {
            within: Some(window),
            ..Self::default()
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.resource_id.is_none_or(|r| r == booking.resource_id)
            && self.event_id.is_none_or(|e| e == booking.event_id)
            && self.within.is_none_or(|w| w.contains_span(&booking.span))
    }
}

// ── Per-resource booking index ───────────────────────────────────

/// All bookings on one resource, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct ResourceBookings {
    bookings: Vec<Booking>,
}

impl ResourceBookings {
    /// Insert keeping the vec sorted by start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: AllocationId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.allocation_id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter()
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Bookings lying fully inside `window`. Only those starting in
    /// `[window.start, window.end)` are visited.
    pub fn contained_in(&self, window: Span) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.span.start < window.start);
        let hi = self.bookings.partition_point(|b| b.span.start < window.end);
        self.bookings[lo..hi.max(lo)]
            .iter()
            .filter(move |b| b.span.end <= window.end)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// One durable mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    EventCreated {
        id: EventId,
        title: String,
        span: Span,
        description: String,
    },
    /// Cascades to the event's allocations.
    EventDeleted {
        id: EventId,
    },
    ResourceCreated {
        id: ResourceId,
        name: String,
        category: String,
    },
    /// Cascades to the resource's allocations.
    ResourceDeleted {
        id: ResourceId,
    },
    AllocationCreated {
        id: AllocationId,
        event_id: EventId,
        resource_id: ResourceId,
    },
    AllocationDeleted {
        id: AllocationId,
    },
}
