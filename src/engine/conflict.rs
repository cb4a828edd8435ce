use crate::limits::MAX_SPAN_DURATION_MS;
use crate::model::*;

use super::AllocError;

pub(crate) fn validate_span(span: &Span) -> Result<(), AllocError> {
    span.check_bounds(MAX_SPAN_DURATION_MS)?;
    Ok(())
}

/// First booking overlapping `candidate`, ignoring those held by `exclude`.
///
/// `existing` is every booking currently on one resource. Pure; the caller
/// decides how consistent that snapshot is.
pub fn find_conflict<'a>(
    existing: &'a [Booking],
    candidate: &Span,
    exclude: Option<EventId>,
) -> Option<&'a Booking> {
    existing
        .iter()
        .filter(|b| Some(b.event_id) != exclude)
        .find(|b| b.span.overlaps(candidate))
}

pub fn has_conflict(existing: &[Booking], candidate: &Span, exclude: Option<EventId>) -> bool {
    find_conflict(existing, candidate, exclude).is_some()
}
