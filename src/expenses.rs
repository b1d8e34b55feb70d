use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::json_store::{JsonCollection, SyncError};
use crate::model::{Amount, BookingId, EmployeeId};

pub const CATEGORY_EMPLOYEE: &str = "employee";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    #[serde(default)]
    pub id: i64,
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub amount: Amount,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub recurring: bool,
    /// Set on expenses generated from a booking.
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    #[serde(default)]
    pub employee_id: Option<EmployeeId>,
    #[serde(default)]
    pub employee_name: Option<String>,
}

pub trait ExpenseStore: Send + Sync {
    /// Append unless an expense for the same booking already exists.
    /// Returns whether anything was written.
    fn append_if_absent(&self, expense: Expense) -> Result<bool, SyncError>;

    /// Returns how many expenses were removed.
    fn remove_by_booking_id(&self, booking_id: BookingId) -> Result<usize, SyncError>;
}

impl ExpenseStore for JsonCollection<Expense> {
    fn append_if_absent(&self, mut expense: Expense) -> Result<bool, SyncError> {
        self.modify(|expenses| {
            let exists = expense.booking_id.is_some()
                && expenses.iter().any(|e| e.booking_id == expense.booking_id);
            if exists {
                return (false, false);
            }
            expense.id = expenses.iter().map(|e| e.id).max().unwrap_or(0) + 1;
            expenses.push(expense);
            (true, true)
        })
    }

    fn remove_by_booking_id(&self, booking_id: BookingId) -> Result<usize, SyncError> {
        self.modify(|expenses| {
            let before = expenses.len();
            expenses.retain(|e| e.booking_id != Some(booking_id));
            let removed = before - expenses.len();
            (removed, removed > 0)
        })
    }
}
