use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::json_store::{JsonCollection, SyncError};
use crate::model::{Amount, BookingId, Customer, VehicleSnapshot};

pub const STATUS_ACTIVE: &str = "active";

/// Rental contract derived from a reservation, one per booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub id: i64,
    pub booking_id: BookingId,
    #[serde(default)]
    pub customer: Customer,
    #[serde(default)]
    pub vehicle: VehicleSnapshot,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub notes: String,
    /// Fields written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub trait ContractStore: Send + Sync {
    fn find_by_booking_id(&self, booking_id: BookingId) -> Result<Option<Contract>, SyncError>;

    /// Insert or replace by `booking_id`. A zero `id` gets the next free one.
    fn upsert(&self, contract: Contract) -> Result<Contract, SyncError>;
}

impl ContractStore for JsonCollection<Contract> {
    fn find_by_booking_id(&self, booking_id: BookingId) -> Result<Option<Contract>, SyncError> {
        Ok(self
            .read()?
            .into_iter()
            .find(|c| c.booking_id == booking_id))
    }

    fn upsert(&self, mut contract: Contract) -> Result<Contract, SyncError> {
        self.modify(|contracts| {
            if contract.id <= 0 {
                contract.id = contracts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
            }
            match contracts
                .iter_mut()
                .find(|c| c.booking_id == contract.booking_id)
            {
                Some(slot) => *slot = contract.clone(),
                None => contracts.push(contract.clone()),
            }
            (contract, true)
        })
    }
}
