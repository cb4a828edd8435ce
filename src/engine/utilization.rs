use std::collections::HashMap;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;
use crate::store::Store;
use crate::time::format_hms;

use super::{AllocError, Allocator};

const HOUR_MS: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilizationRow {
    pub resource: Resource,
    pub bookings: usize,
    pub booked_ms: Ms,
}

impl UtilizationRow {
    pub fn booked_hours(&self) -> f64 {
        self.booked_ms as f64 / HOUR_MS
    }

    /// `HH:MM:SS`, hours unbounded.
    pub fn booked_hms(&self) -> String {
        format_hms(self.booked_ms)
    }
}

/// Booked time per resource over a window, busiest first.
///
/// Only allocations whose event lies entirely inside the window count. A
/// booking straddling either edge is left out rather than clipped, and
/// resources with nothing qualifying have no row. Rows are computed and
/// sorted up front, so the report is a snapshot: later allocations do not
/// show up in it. Iterate it by reference as often as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilizationReport {
    window: Span,
    rows: Vec<UtilizationRow>,
}

impl UtilizationReport {
    pub fn window(&self) -> Span {
        self.window
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UtilizationRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, resource_id: ResourceId) -> Option<&UtilizationRow> {
        self.rows.iter().find(|r| r.resource.id == resource_id)
    }

    pub fn total_booked_ms(&self) -> Ms {
        self.rows.iter().map(|r| r.booked_ms).sum()
    }
}

impl<'a> IntoIterator for &'a UtilizationReport {
    type Item = &'a UtilizationRow;
    type IntoIter = std::slice::Iter<'a, UtilizationRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Group bookings fully inside `window` by resource. Bookings on resources
/// missing from `resources` are skipped.
pub(crate) fn aggregate(
    window: &Span,
    bookings: &[Booking],
    resources: &HashMap<ResourceId, Resource>,
) -> Vec<UtilizationRow> {
    let mut totals: HashMap<ResourceId, (usize, Ms)> = HashMap::new();
    for booking in bookings.iter().filter(|b| window.contains_span(&b.span)) {
        let entry = totals.entry(booking.resource_id).or_default();
        entry.0 += 1;
        entry.1 += booking.span.duration_ms();
    }

    let mut rows: Vec<UtilizationRow> = totals
        .into_iter()
        .filter_map(|(id, (count, ms))| {
            resources.get(&id).map(|resource| UtilizationRow {
                resource: resource.clone(),
                bookings: count,
                booked_ms: ms,
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        b.booked_ms
            .cmp(&a.booked_ms)
            .then_with(|| a.resource.name.cmp(&b.resource.name))
            .then_with(|| a.resource.id.cmp(&b.resource.id))
    });
    rows
}

impl<S: Store> Allocator<S> {
    pub async fn utilization(&self, window: Span) -> Result<UtilizationReport, AllocError> {
        window.check_bounds(MAX_QUERY_WINDOW_MS)?;
        let bookings = self
            .store
            .list_allocations(&AllocationFilter::within(window))
            .await?;
        let resources: HashMap<ResourceId, Resource> = self
            .store
            .list_resources(&ResourceFilter::default())
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        Ok(UtilizationReport {
            window,
            rows: aggregate(&window, &bookings, &resources),
        })
    }
}
