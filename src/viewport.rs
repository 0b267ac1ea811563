//! Choosing which aircraft to render.

use crate::bounds::GeographicBounds;
use crate::types::FlightRecord;
use std::cmp::Ordering;

/// Default render cap.
pub const MAX_VISIBLE: usize = 500;

/// Filter to `visible` (everything when `None`), order by altitude + speed
/// descending, and keep at most `cap`.
///
/// Ties fall back to ascending `icao24`, so the result does not depend on
/// the iteration order of the source map.
pub fn select<'a, I>(flights: I, visible: Option<&GeographicBounds>, cap: usize) -> Vec<&'a FlightRecord>
where
    I: IntoIterator<Item = &'a FlightRecord>,
{
    let mut selected: Vec<&FlightRecord> = flights
        .into_iter()
        .filter(|f| match (visible, f.position) {
            (None, _) => true,
            (Some(region), Some(p)) => region.contains(p.latitude, p.longitude),
            (Some(_), None) => false,
        })
        .collect();

    selected.sort_by(|a, b| a.icao24.cmp(&b.icao24));
    selected.sort_by(|a, b| {
        b.display_priority()
            .partial_cmp(&a.display_priority())
            .unwrap_or(Ordering::Equal)
    });
    selected.truncate(cap);
    selected
}
