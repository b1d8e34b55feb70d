use std::collections::BTreeMap;

use chrono::NaiveDate;
use tokio::sync::oneshot;

use crate::directory::Vehicle;
use crate::limits::*;
use crate::model::*;

use super::conflict::{assign_lane, check_no_conflict, validate_range};
use super::pricing::{RateCard, reprice};
use super::{Engine, EngineError, JournalCommand};

/// Input of `create_booking`. Pricing and employee fields only matter for
/// reservations.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub vehicle_id: VehicleId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: BookingKind,
    pub crosses_border: bool,
    pub negotiated: bool,
    pub negotiated_rate: Option<Amount>,
    pub employee_id: Option<EmployeeId>,
    pub note: String,
    pub customer: Customer,
}

impl NewBooking {
    pub fn new(vehicle_id: VehicleId, start: NaiveDate, end: NaiveDate, kind: BookingKind) -> Self {
        Self {
            vehicle_id,
            start,
            end,
            kind,
            crosses_border: false,
            negotiated: false,
            negotiated_rate: None,
            employee_id: None,
            note: String::new(),
            customer: Customer::default(),
        }
    }
}

/// Edit of an existing booking. `None` leaves a field untouched; for the
/// nested options `Some(None)` clears it.
///
/// Without `target_date` this is a global edit: the booking-level border
/// flag, negotiation and negotiated rate change and every derived amount is
/// recomputed. With `target_date` the border flag and `rate` are pinned to
/// that day only and just the total is recomputed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingUpdate {
    pub target_date: Option<NaiveDate>,
    pub crosses_border: Option<bool>,
    pub negotiated: Option<bool>,
    pub rate: Option<Option<Amount>>,
    pub customer: CustomerPatch,
    pub employee_id: Option<Option<EmployeeId>>,
    pub note: Option<String>,
}

impl BookingUpdate {
    fn touches_pricing(&self) -> bool {
        self.target_date.is_some()
            || self.crosses_border.is_some()
            || self.negotiated.is_some()
            || self.rate.is_some()
    }
}

fn check_text_limits(note: &str, customer: &Customer) -> Result<(), EngineError> {
    let fields: [&str; 7] = [
        note,
        &customer.name,
        &customer.surname,
        &customer.national_id,
        &customer.nationality,
        &customer.phone,
        &customer.email,
    ];
    if fields.iter().any(|f| f.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

fn check_amount(rate: Amount, what: &str) -> Result<(), EngineError> {
    if rate < 0 {
        return Err(EngineError::validation(format!("{what} must not be negative")));
    }
    if rate > MAX_AMOUNT {
        return Err(EngineError::validation(format!("{what} exceeds {MAX_AMOUNT}")));
    }
    Ok(())
}

impl Engine {
    fn employee_snapshot(&self, id: EmployeeId) -> Result<EmployeeSnapshot, EngineError> {
        let employee = self
            .employees
            .employee(id)
            .ok_or(EngineError::EmployeeNotFound(id))?;
        Ok(EmployeeSnapshot {
            id,
            name: employee.full_name(),
        })
    }

    /// Rates for re-pricing an existing booking. A vehicle gone from the
    /// directory prices at the defaults.
    fn rates_for_existing(&self, vehicle_id: VehicleId) -> (RateCard, Option<Vehicle>) {
        match self.vehicles.vehicle(vehicle_id) {
            Some(v) => (RateCard::for_vehicle(&v), Some(v)),
            None => {
                tracing::warn!(vehicle_id, "vehicle missing from directory, pricing with default rates");
                (RateCard::default(), None)
            }
        }
    }

    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        if req.vehicle_id <= 0 {
            return Err(EngineError::validation("vehicle_id is required"));
        }
        let range = validate_range(req.start, req.end)?;
        check_text_limits(&req.note, &req.customer)?;
        if let Some(rate) = req.negotiated_rate {
            check_amount(rate, "negotiated rate")?;
        }

        let vehicle = self
            .vehicles
            .vehicle(req.vehicle_id)
            .ok_or(EngineError::VehicleNotFound(req.vehicle_id))?;
        let is_reservation = req.kind == BookingKind::Reservation;
        let employee = match req.employee_id {
            Some(id) => Some(self.employee_snapshot(id)?),
            None => None,
        };

        let _gate = self.compaction_gate.read().await;
        let timeline = self.timeline_or_insert(req.vehicle_id);
        let mut guard = timeline.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }
        check_no_conflict(&guard, &range)?;
        let lane = is_reservation.then(|| assign_lane(&guard, &range));

        let mut booking = Booking {
            id: self.allocate_id(),
            vehicle_id: req.vehicle_id,
            kind: req.kind,
            range,
            lane,
            crosses_border: is_reservation && req.crosses_border,
            pricing_source: PricingSource::Kind(req.kind),
            daily_rate_applied: 0,
            total_amount: 0,
            negotiated: is_reservation && req.negotiated,
            negotiated_rate: if is_reservation && req.negotiated {
                req.negotiated_rate
            } else {
                None
            },
            per_day_overrides: BTreeMap::new(),
            per_day_flags: BTreeMap::new(),
            note: req.note.trim().to_string(),
            customer: req.customer,
            employee,
            vehicle: vehicle.snapshot(),
        };
        reprice(&mut booking, &RateCard::for_vehicle(&vehicle), true);

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(
            id = booking.id,
            vehicle_id = booking.vehicle_id,
            kind = %booking.kind,
            "booking created {}",
            booking.range
        );

        self.side_effects.sync_contract(&booking, Some(&vehicle));
        self.side_effects.booking_created(&booking);
        Ok(booking)
    }

    pub async fn update_booking(&self, id: BookingId, update: BookingUpdate) -> Result<Booking, EngineError> {
        if let Some(note) = &update.note
            && note.len() > MAX_TEXT_LEN
        {
            return Err(EngineError::LimitExceeded("text field too long"));
        }
        if let Some(Some(rate)) = update.rate {
            check_amount(rate, "rate")?;
        }
        let employee = match update.employee_id {
            Some(Some(eid)) => Some(Some(self.employee_snapshot(eid)?)),
            Some(None) => Some(None),
            None => None,
        };

        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let current = guard
            .get(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))?;

        if update.touches_pricing() && !current.is_reservation() {
            return Err(EngineError::validation(format!(
                "pricing fields do not apply to {} bookings",
                current.kind
            )));
        }

        let mut booking = current.clone();
        let (rates, vehicle) = if current.is_reservation() {
            self.rates_for_existing(current.vehicle_id)
        } else {
            (RateCard::default(), None)
        };

        match update.target_date {
            Some(day) => {
                if !booking.range.contains(day) {
                    return Err(EngineError::validation(format!(
                        "{day} is outside booking {}",
                        booking.range
                    )));
                }
                if update.negotiated.is_some() {
                    return Err(EngineError::validation(
                        "negotiation applies to the whole booking, not a single day",
                    ));
                }
                if let Some(flag) = update.crosses_border {
                    booking.per_day_flags.insert(day, DayFlags { crosses_border: flag });
                }
                match update.rate {
                    Some(Some(rate)) => {
                        booking.per_day_overrides.insert(day, rate);
                    }
                    Some(None) => {
                        booking.per_day_overrides.remove(&day);
                    }
                    None => {}
                }
                reprice(&mut booking, &rates, false);
            }
            None => {
                if let Some(flag) = update.crosses_border {
                    booking.crosses_border = flag;
                }
                match (update.negotiated, update.rate) {
                    (Some(false), _) => {
                        booking.negotiated = false;
                        booking.negotiated_rate = None;
                    }
                    (Some(true), rate) => {
                        booking.negotiated = true;
                        if let Some(rate) = rate {
                            booking.negotiated_rate = rate;
                        }
                    }
                    (None, Some(Some(rate))) => {
                        booking.negotiated = true;
                        booking.negotiated_rate = Some(rate);
                    }
                    (None, Some(None)) => {
                        booking.negotiated = false;
                        booking.negotiated_rate = None;
                    }
                    (None, None) => {}
                }
                reprice(&mut booking, &rates, true);
            }
        }

        update.customer.apply(&mut booking.customer);
        if let Some(note) = &update.note {
            booking.note = note.trim().to_string();
        }
        check_text_limits(&booking.note, &booking.customer)?;
        if let Some(employee) = employee {
            booking.employee = employee;
        }
        let employee_changed = booking.employee != current.employee;

        let event = Event::BookingUpdated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(id, total = booking.total_amount, "booking updated");

        self.side_effects.sync_contract(&booking, vehicle.as_ref());
        if employee_changed {
            self.side_effects.employee_changed(&booking);
        }
        Ok(booking)
    }

    pub async fn delete_booking(&self, id: BookingId) -> Result<Booking, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(id).await?;
        let booking = guard
            .get(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))?;
        let event = Event::BookingDeleted {
            id,
            vehicle_id: booking.vehicle_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(id, vehicle_id = booking.vehicle_id, "booking deleted");

        self.side_effects.booking_deleted(id);
        Ok(booking)
    }

    /// Rewrite the journal as the id watermark plus one creation per live booking.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let timelines: Vec<_> = self.timelines.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for timeline in timelines {
            bookings.extend(timeline.read().await.bookings.iter().cloned());
        }
        bookings.sort_by_key(|b| b.id);

        let mut events = Vec::with_capacity(bookings.len() + 1);
        events.push(Event::SequenceAdvanced {
            next_id: self.next_id.load(std::sync::atomic::Ordering::SeqCst),
        });
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
