//! Derived records kept in step with bookings.
//!
//! Every failure here is logged and counted, never returned: the booking
//! write that triggered the sync has already been journaled.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contracts::{Contract, ContractStore, STATUS_ACTIVE};
use crate::directory::Vehicle;
use crate::expenses::{CATEGORY_EMPLOYEE, Expense, ExpenseStore};
use crate::json_store::SyncError;
use crate::model::{Amount, Booking, BookingId, DMY_DATE};

pub struct SideEffects {
    contracts: Arc<dyn ContractStore>,
    expenses: Arc<dyn ExpenseStore>,
    employee_daily_rate: Amount,
}

impl SideEffects {
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        expenses: Arc<dyn ExpenseStore>,
        employee_daily_rate: Amount,
    ) -> Self {
        Self {
            contracts,
            expenses,
            employee_daily_rate,
        }
    }

    /// Create or refresh the contract of a reservation.
    pub fn sync_contract(&self, booking: &Booking, vehicle: Option<&Vehicle>) {
        if !booking.is_reservation() {
            return;
        }
        report("contract", booking.id, self.try_sync_contract(booking, vehicle));
    }

    /// Generate the staff-payment expense of a newly created reservation.
    pub fn booking_created(&self, booking: &Booking) {
        let Some(expense) = self.employee_expense(booking) else {
            return;
        };
        report("expense", booking.id, self.expenses.append_if_absent(expense).map(drop));
    }

    /// Replace the booking's staff-payment expense after its employee changed.
    pub fn employee_changed(&self, booking: &Booking) {
        let result = self.expenses.remove_by_booking_id(booking.id).and_then(|_| {
            match self.employee_expense(booking) {
                Some(expense) => self.expenses.append_if_absent(expense).map(drop),
                None => Ok(()),
            }
        });
        report("expense", booking.id, result);
    }

    /// Drop derived expenses. The contract is left in place.
    pub fn booking_deleted(&self, booking_id: BookingId) {
        report(
            "expense",
            booking_id,
            self.expenses.remove_by_booking_id(booking_id).map(drop),
        );
    }

    fn try_sync_contract(&self, booking: &Booking, vehicle: Option<&Vehicle>) -> Result<(), SyncError> {
        let existing = self.contracts.find_by_booking_id(booking.id)?;
        let vehicle = vehicle.map_or_else(|| booking.vehicle.clone(), Vehicle::snapshot);
        let mut contract = Contract {
            id: 0,
            booking_id: booking.id,
            customer: booking.customer.clone(),
            vehicle,
            start_date: booking.range.start,
            end_date: booking.range.end,
            amount: booking.total_amount,
            status: STATUS_ACTIVE.to_string(),
            notes: booking.note.clone(),
            extra: BTreeMap::new(),
        };
        if let Some(prev) = existing {
            contract.id = prev.id;
            contract.status = prev.status;
            contract.notes = prev.notes;
            contract.extra = prev.extra;
        }
        let saved = self.contracts.upsert(contract)?;
        tracing::debug!(booking_id = booking.id, contract_id = saved.id, "contract synced");
        Ok(())
    }

    fn employee_expense(&self, booking: &Booking) -> Option<Expense> {
        if !booking.is_reservation() {
            return None;
        }
        let employee = booking.employee.as_ref()?;
        let start = booking.range.start.format(DMY_DATE);
        let end = booking.range.end.format(DMY_DATE);
        Some(Expense {
            id: 0,
            date: booking.range.end,
            category: CATEGORY_EMPLOYEE.to_string(),
            description: format!(
                "Staff payment {} for rental {} from {start} to {end}",
                employee.name, booking.vehicle.plate
            ),
            amount: booking.range.days() * self.employee_daily_rate,
            note: format!("Booking #{}", booking.id),
            recurring: false,
            booking_id: Some(booking.id),
            employee_id: Some(employee.id),
            employee_name: Some(employee.name.clone()),
        })
    }
}

fn report(store: &'static str, booking_id: BookingId, result: Result<(), SyncError>) {
    if let Err(e) = result {
        metrics::counter!(crate::observability::SYNC_FAILURES_TOTAL, "store" => store).increment(1);
        tracing::warn!(booking_id, store, "sync failed: {e}");
    }
}
