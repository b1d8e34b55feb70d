use crate::model::{BookingId, BookingKind, DayRange, EmployeeId, VehicleId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("vehicle already has a {kind} booking (#{booking_id}) from {} to {}", range.start, range.end)]
    Conflict {
        booking_id: BookingId,
        kind: BookingKind,
        range: DayRange,
    },
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),
    #[error("vehicle not found: {0}")]
    VehicleNotFound(VehicleId),
    #[error("employee not found: {0}")]
    EmployeeNotFound(EmployeeId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    JournalError(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::BookingNotFound(_)
                | EngineError::VehicleNotFound(_)
                | EngineError::EmployeeNotFound(_)
        )
    }
}
