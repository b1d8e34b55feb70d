//! Month grid projection.
//!
//! Pure functions over a slice of bookings: nothing here touches the journal
//! or takes a lock, so a view can be rebuilt as often as callers like.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::directory::{DEFAULT_COLOR_A, DEFAULT_COLOR_B, Vehicle};
use crate::limits::{MAX_YEAR, MIN_YEAR};
use crate::model::*;

use super::EngineError;
use super::pricing::{RateCard, day_price};

pub const GRID_CELLS: usize = 42;

pub const MAINTENANCE_BG: &str = "rgba(251, 191, 36, 0.6)";
pub const BLOCK_BG: &str = "rgba(203, 213, 225, 0.9)";
pub const MUTED_FG: &str = "#111827";
pub const RESERVATION_FG: &str = "#0f172a";

/// One booking as drawn inside one day cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellEntry {
    pub booking_id: BookingId,
    pub vehicle_id: VehicleId,
    pub kind: &'static str,
    pub lane: Option<&'static str>,
    pub bg: String,
    pub fg: String,
    pub label: String,
    pub tooltip: String,
    pub crosses_border: bool,
    pub day_price: Amount,
    pub daily_rate_applied: Amount,
    pub pricing_source: &'static str,
    pub customer: String,
    pub employee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    pub in_month: bool,
    pub is_today: bool,
    pub entries: Vec<CellEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<DayCell>,
    /// Full totals of every reservation touching the month, no pro-rating.
    pub total_amount: Amount,
    pub reservation_count: usize,
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, EngineError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(EngineError::validation(format!("year out of range: {year}")));
    }
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| EngineError::validation(format!("invalid month: {month}")))
}

/// The calendar month itself, first to last day.
pub fn month_range(year: i32, month: u32) -> Result<DayRange, EngineError> {
    let first = first_of_month(year, month)?;
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(|| EngineError::validation("month out of range"))?;
    Ok(DayRange {
        start: first,
        end: next - Duration::days(1),
    })
}

/// The six Monday-first weeks drawn for a month.
pub fn grid_range(year: i32, month: u32) -> Result<DayRange, EngineError> {
    let first = first_of_month(year, month)?;
    let start = first - Duration::days(i64::from(first.weekday().num_days_from_monday()));
    Ok(DayRange {
        start,
        end: start + Duration::days(GRID_CELLS as i64 - 1),
    })
}

fn entry_for(booking: &Booking, vehicle: Option<&Vehicle>, day: NaiveDate) -> CellEntry {
    let (color_a, color_b) = vehicle.map_or((DEFAULT_COLOR_A, DEFAULT_COLOR_B), |v| v.lane_colors());
    let (bg, fg) = match booking.kind {
        BookingKind::Reservation => {
            let bg = if booking.lane == Some(Lane::B) { color_b } else { color_a };
            (bg, RESERVATION_FG)
        }
        BookingKind::Maintenance => (MAINTENANCE_BG, MUTED_FG),
        BookingKind::Block => (BLOCK_BG, MUTED_FG),
    };

    let plate = if !booking.vehicle.plate.is_empty() {
        booking.vehicle.plate.clone()
    } else if let Some(v) = vehicle.filter(|v| !v.plate.trim().is_empty()) {
        v.plate.trim().to_string()
    } else {
        format!("#{}", booking.vehicle_id)
    };
    let label = format!("{plate} · {}", booking.kind.title());
    let tooltip = format!("{label} | {} → {}", booking.range.start, booking.range.end);

    let rates = vehicle.map(RateCard::for_vehicle).unwrap_or_default();
    let day_price = if booking.is_reservation() {
        day_price(booking, &rates, day)
    } else {
        0
    };
    let customer = format!("{} {}", booking.customer.name, booking.customer.surname)
        .trim()
        .to_string();

    CellEntry {
        booking_id: booking.id,
        vehicle_id: booking.vehicle_id,
        kind: booking.kind.as_str(),
        lane: booking.lane.map(|l| l.as_str()),
        bg: bg.to_string(),
        fg: fg.to_string(),
        label,
        tooltip,
        crosses_border: booking.is_reservation() && booking.crosses_border_on(day),
        day_price,
        daily_rate_applied: booking.daily_rate_applied,
        pricing_source: booking.pricing_source.as_str(),
        customer,
        employee: booking.employee.as_ref().map(|e| e.name.clone()),
    }
}

/// Project `bookings` onto the 42-cell grid for `year`/`month`.
///
/// Callers apply any vehicle filter before calling; entries inside a cell
/// keep the order of `bookings`.
pub fn build_month(
    year: i32,
    month: u32,
    bookings: &[Booking],
    vehicles: &HashMap<VehicleId, Vehicle>,
    today: NaiveDate,
) -> Result<MonthView, EngineError> {
    let grid = grid_range(year, month)?;
    let window = month_range(year, month)?;

    let visible: Vec<&Booking> = bookings.iter().filter(|b| b.range.overlaps(&grid)).collect();

    let cells = grid
        .iter_days()
        .map(|day| DayCell {
            date: day,
            in_month: window.contains(day),
            is_today: day == today,
            entries: visible
                .iter()
                .filter(|b| b.range.contains(day))
                .map(|b| entry_for(b, vehicles.get(&b.vehicle_id), day))
                .collect(),
        })
        .collect();

    let touching: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.is_reservation() && b.range.overlaps(&window))
        .collect();

    Ok(MonthView {
        year,
        month,
        cells,
        total_amount: touching.iter().map(|b| b.total_amount).sum(),
        reservation_count: touching.len(),
    })
}
