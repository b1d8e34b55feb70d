use chrono::NaiveDate;

use crate::directory::index_vehicles;
use crate::model::*;

use super::calendar::{MonthView, build_month, grid_range};
use super::conflict::{check_no_conflict, validate_range};
use super::{Engine, EngineError};

impl Engine {
    /// Pre-check for a create. Takes only a read lock and reserves nothing,
    /// so a create issued later can still lose to a concurrent one.
    pub async fn check_conflict(
        &self,
        vehicle_id: VehicleId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        if vehicle_id <= 0 {
            return Err(EngineError::validation("vehicle_id is required"));
        }
        let range = validate_range(start, end)?;
        let Some(timeline) = self.get_timeline(vehicle_id) else {
            return Ok(());
        };
        let guard = timeline.read().await;
        check_no_conflict(&guard, &range)
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let vehicle_id = self
            .vehicle_for_booking(id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let timeline = self
            .get_timeline(vehicle_id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let guard = timeline.read().await;
        guard.get(id).cloned().ok_or(EngineError::BookingNotFound(id))
    }

    /// All bookings, or one vehicle's, ordered by id.
    pub async fn list_bookings(&self, vehicle_id: Option<VehicleId>) -> Vec<Booking> {
        let mut out = Vec::new();
        for timeline in self.timelines_for(vehicle_id) {
            out.extend(timeline.read().await.bookings.iter().cloned());
        }
        out.sort_by_key(|b| b.id);
        out
    }

    fn timelines_for(&self, vehicle_id: Option<VehicleId>) -> Vec<super::SharedTimeline> {
        match vehicle_id {
            Some(id) => self.get_timeline(id).into_iter().collect(),
            None => self.timelines.iter().map(|e| e.value().clone()).collect(),
        }
    }

    /// The 42-cell grid for a month plus the month's reservation total.
    pub async fn month_view(
        &self,
        year: i32,
        month: u32,
        vehicle_id: Option<VehicleId>,
        today: NaiveDate,
    ) -> Result<MonthView, EngineError> {
        let grid = grid_range(year, month)?;
        let mut bookings = Vec::new();
        for timeline in self.timelines_for(vehicle_id) {
            let guard = timeline.read().await;
            bookings.extend(guard.overlapping(&grid).cloned());
        }
        bookings.sort_by_key(|b| (b.range.start, b.vehicle_id, b.id));

        let vehicles = index_vehicles(self.vehicles.vehicles());
        build_month(year, month, &bookings, &vehicles, today)
    }
}
