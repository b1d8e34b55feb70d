use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::limits::MAX_AMOUNT;

/// Currency in the smallest unit the business uses. Never fractional.
pub type Amount = i64;
pub type BookingId = i64;
pub type VehicleId = i64;
pub type EmployeeId = i64;

pub const ISO_DATE: &str = "%Y-%m-%d";
pub const DMY_DATE: &str = "%d-%m-%Y";

/// Inclusive whole-day interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    /// Returns `None` when `end` is before `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    #[cfg(test)]
    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Inclusive day count; a one-day range has `days() == 1`.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DayRange) -> bool {
        !(self.end < other.start || other.end < self.start)
    }

    /// True when the ranges touch with no gap and no shared day.
    pub fn is_adjacent_to(&self, other: &DayRange) -> bool {
        self.end + Duration::days(1) == other.start || other.end + Duration::days(1) == self.start
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.start, self.end)
    }
}

/// Strict `YYYY-MM-DD`.
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), ISO_DATE).ok()
}

/// `YYYY-MM-DD` or `DD-MM-YYYY`; used for the per-day edit target.
pub fn parse_lenient_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, ISO_DATE)
        .or_else(|_| NaiveDate::parse_from_str(s, DMY_DATE))
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("amount exceeds {}", MAX_AMOUNT)]
pub struct AmountTooLarge;

/// Strip every non-digit and read what is left. `Ok(None)` when nothing is left.
pub fn parse_amount(s: &str) -> Result<Option<Amount>, AmountTooLarge> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Ok(None);
    }
    let value: Amount = digits.parse().map_err(|_| AmountTooLarge)?;
    if value > MAX_AMOUNT {
        return Err(AmountTooLarge);
    }
    Ok(Some(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKind {
    Reservation,
    Maintenance,
    Block,
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Reservation => "reservation",
            BookingKind::Maintenance => "maintenance",
            BookingKind::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reservation" => Some(BookingKind::Reservation),
            "maintenance" => Some(BookingKind::Maintenance),
            "block" => Some(BookingKind::Block),
            _ => None,
        }
    }

    /// Capitalised form used in calendar labels.
    pub fn title(&self) -> &'static str {
        match self {
            BookingKind::Reservation => "Reservation",
            BookingKind::Maintenance => "Maintenance",
            BookingKind::Block => "Block",
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lane {
    A,
    B,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::A => "A",
            Lane::B => "B",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingSource {
    Standard,
    SingleDay,
    Border,
    Negotiated,
    /// Non-reservation kinds label themselves.
    Kind(BookingKind),
}

impl PricingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingSource::Standard => "standard",
            PricingSource::SingleDay => "single_day",
            PricingSource::Border => "border",
            PricingSource::Negotiated => "negotiated",
            PricingSource::Kind(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for PricingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub surname: String,
    pub national_id: String,
    pub nationality: String,
    pub phone: String,
    pub email: String,
}

/// Field-wise merge into a [`Customer`]; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub national_id: Option<String>,
    pub nationality: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CustomerPatch {
    pub fn apply(&self, customer: &mut Customer) {
        let fields = [
            (&self.name, &mut customer.name),
            (&self.surname, &mut customer.surname),
            (&self.national_id, &mut customer.national_id),
            (&self.nationality, &mut customer.nationality),
            (&self.phone, &mut customer.phone),
            (&self.email, &mut customer.email),
        ];
        for (patch, field) in fields {
            if let Some(value) = patch {
                *field = value.trim().to_string();
            }
        }
    }

    pub fn into_customer(self) -> Customer {
        let mut customer = Customer::default();
        self.apply(&mut customer);
        customer
    }
}

/// Vehicle attributes captured at creation so history survives vehicle deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub make: String,
    pub model: String,
    pub year: String,
    pub plate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeSnapshot {
    pub id: EmployeeId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayFlags {
    pub crosses_border: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub vehicle_id: VehicleId,
    pub kind: BookingKind,
    pub range: DayRange,
    /// Set only for reservations.
    pub lane: Option<Lane>,
    pub crosses_border: bool,
    pub pricing_source: PricingSource,
    pub daily_rate_applied: Amount,
    pub total_amount: Amount,
    pub negotiated: bool,
    pub negotiated_rate: Option<Amount>,
    pub per_day_overrides: BTreeMap<NaiveDate, Amount>,
    pub per_day_flags: BTreeMap<NaiveDate, DayFlags>,
    pub note: String,
    pub customer: Customer,
    pub employee: Option<EmployeeSnapshot>,
    pub vehicle: VehicleSnapshot,
}

impl Booking {
    pub fn is_reservation(&self) -> bool {
        self.kind == BookingKind::Reservation
    }

    /// Border flag for one day: per-day flag first, booking-level otherwise.
    pub fn crosses_border_on(&self, day: NaiveDate) -> bool {
        self.per_day_flags
            .get(&day)
            .map_or(self.crosses_border, |f| f.crosses_border)
    }
}

/// All bookings of one vehicle, sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct VehicleTimeline {
    pub vehicle_id: VehicleId,
    pub bookings: Vec<Booking>,
}

impl VehicleTimeline {
    pub fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.range.start, |b| b.range.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Replace a booking in place. Ranges are immutable, so order is kept.
    pub fn replace_booking(&mut self, booking: Booking) -> Option<Booking> {
        let slot = self.bookings.iter_mut().find(|b| b.id == booking.id)?;
        Some(std::mem::replace(slot, booking))
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose range shares at least one day with `query`.
    /// Everything starting after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &DayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= query.start)
    }
}

/// Journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    /// Full replacement of a booking's mutable fields.
    BookingUpdated { booking: Booking },
    BookingDeleted { id: BookingId, vehicle_id: VehicleId },
    /// Id watermark, written by compaction so ids are never reused.
    SequenceAdvanced { next_id: BookingId },
}
