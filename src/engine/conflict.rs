use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Build a range from raw dates, enforcing order, length and year bounds.
pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<DayRange, EngineError> {
    let range = DayRange::new(start, end)
        .ok_or_else(|| EngineError::validation("end date is before start date"))?;
    if range.start.year() < MIN_YEAR || range.end.year() > MAX_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(range)
}

/// First booking on the timeline sharing a day with `range`, any kind.
pub(crate) fn find_conflict<'a>(timeline: &'a VehicleTimeline, range: &DayRange) -> Option<&'a Booking> {
    timeline.overlapping(range).next()
}

pub(crate) fn check_no_conflict(timeline: &VehicleTimeline, range: &DayRange) -> Result<(), EngineError> {
    match find_conflict(timeline, range) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict {
                booking_id: existing.id,
                kind: existing.kind,
                range: existing.range,
            })
        }
        None => Ok(()),
    }
}

/// Lane for a new reservation: B when it touches a lane-A reservation
/// end-to-start, A otherwise. Lane-B neighbours are never consulted.
pub(crate) fn assign_lane(timeline: &VehicleTimeline, range: &DayRange) -> Lane {
    let touches_lane_a = timeline
        .bookings
        .iter()
        .filter(|b| b.is_reservation())
        .any(|b| b.lane == Some(Lane::A) && b.range.is_adjacent_to(range));
    if touches_lane_a { Lane::B } else { Lane::A }
}
