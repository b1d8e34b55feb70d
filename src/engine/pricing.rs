use chrono::NaiveDate;

use crate::directory::Vehicle;
use crate::limits::MAX_AMOUNT;
use crate::model::*;

pub const DEFAULT_RATE_SINGLE_DAY: Amount = 60_000;
pub const DEFAULT_RATE_STANDARD: Amount = 50_000;
pub const DEFAULT_RATE_BORDER: Amount = 80_000;

/// A vehicle's three configured day rates, defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCard {
    pub single_day: Amount,
    pub standard: Amount,
    pub border: Amount,
}

impl Default for RateCard {
    fn default() -> Self {
        Self {
            single_day: DEFAULT_RATE_SINGLE_DAY,
            standard: DEFAULT_RATE_STANDARD,
            border: DEFAULT_RATE_BORDER,
        }
    }
}

impl RateCard {
    /// Zero, negative or oversized directory rates count as unset.
    pub fn for_vehicle(vehicle: &Vehicle) -> Self {
        let usable = |rate: Option<Amount>| rate.filter(|r| (1..=MAX_AMOUNT).contains(r));
        Self {
            single_day: usable(vehicle.rate_single_day).unwrap_or(DEFAULT_RATE_SINGLE_DAY),
            standard: usable(vehicle.rate_standard).unwrap_or(DEFAULT_RATE_STANDARD),
            border: usable(vehicle.rate_border).unwrap_or(DEFAULT_RATE_BORDER),
        }
    }

    /// Rate without overrides or negotiation: border, then single-day, then standard.
    pub fn listed_rate(&self, crosses_border: bool, days: i64) -> (Amount, PricingSource) {
        if crosses_border {
            (self.border, PricingSource::Border)
        } else if days == 1 {
            (self.single_day, PricingSource::SingleDay)
        } else {
            (self.standard, PricingSource::Standard)
        }
    }
}

/// Whole-range display rate stored as `daily_rate_applied` / `pricing_source`.
pub fn whole_range_rate(booking: &Booking, rates: &RateCard) -> (Amount, PricingSource) {
    if !booking.is_reservation() {
        return (0, PricingSource::Kind(booking.kind));
    }
    if booking.negotiated
        && let Some(rate) = booking.negotiated_rate
    {
        return (rate, PricingSource::Negotiated);
    }
    rates.listed_rate(booking.crosses_border, booking.range.days())
}

/// Effective price of one day: per-day override, then negotiated rate,
/// then the listed rate for that day's border flag.
pub fn day_price(booking: &Booking, rates: &RateCard, day: NaiveDate) -> Amount {
    if let Some(price) = booking.per_day_overrides.get(&day) {
        return *price;
    }
    if booking.negotiated
        && let Some(rate) = booking.negotiated_rate
    {
        return rate;
    }
    rates
        .listed_rate(booking.crosses_border_on(day), booking.range.days())
        .0
}

/// Sum of `day_price` over the range. Non-reservations cost nothing.
pub fn total_for(booking: &Booking, rates: &RateCard) -> Amount {
    if !booking.is_reservation() {
        return 0;
    }
    booking
        .range
        .iter_days()
        .map(|day| day_price(booking, rates, day))
        .fold(0, Amount::saturating_add)
}

/// Refresh the derived amounts. `whole_range` also refreshes the display rate.
pub fn reprice(booking: &mut Booking, rates: &RateCard, whole_range: bool) {
    if whole_range {
        let (rate, source) = whole_range_rate(booking, rates);
        booking.daily_rate_applied = rate;
        booking.pricing_source = source;
    }
    booking.total_amount = total_for(booking, rates);
}
