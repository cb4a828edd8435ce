use crate::model::Ms;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_CATEGORY_LEN: usize = 50;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// An event may not last longer than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Utilization windows are capped at ten years.
pub const MAX_QUERY_WINDOW_MS: Ms = 10 * 366 * 24 * 3_600_000;

pub const MAX_ALLOCATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_LIST_LIMIT: usize = 10_000;
