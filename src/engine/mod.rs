pub mod calendar;
mod conflict;
mod error;
mod mutations;
pub mod pricing;
mod queries;
#[cfg(test)]
mod tests;

pub use calendar::{CellEntry, DayCell, MonthView};
pub use error::EngineError;
pub use mutations::{BookingUpdate, NewBooking};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::contracts::ContractStore;
use crate::directory::{EmployeeDirectory, VehicleDirectory};
use crate::expenses::ExpenseStore;
use crate::journal::Journal;
use crate::model::*;
use crate::sync::SideEffects;

pub type SharedTimeline = Arc<RwLock<VehicleTimeline>>;

/// Everything outside the booking journal the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub vehicles: Arc<dyn VehicleDirectory>,
    pub employees: Arc<dyn EmployeeDirectory>,
    pub contracts: Arc<dyn ContractStore>,
    pub expenses: Arc<dyn ExpenseStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Staff payment per rented day.
    pub employee_daily_rate: Amount,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            employee_daily_rate: 10_000,
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the journal. Appends that queue up while one fsync is running are
/// buffered together and made durable by a single `flush_sync`.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut journal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut journal, batch.iter().map(|(event, _)| event));
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut journal, cmd);
        }
    }
}

fn flush_batch<'a>(journal: &mut Journal, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
    let result = events
        .into_iter()
        .try_for_each(|event| journal.append_buffered(event))
        .and_then(|()| journal.flush_sync());
    if result.is_err() {
        // Unacknowledged frames must not survive a restart.
        if let Err(e) = journal.rollback() {
            tracing::error!("journal rollback failed: {e}");
        }
    }
    result
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events).and_then(|()| journal.swap_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            let result = flush_batch(journal, [&event]);
            let _ = response.send(result);
        }
    }
}

/// Booking engine for one tenant.
pub struct Engine {
    pub(super) timelines: DashMap<VehicleId, SharedTimeline>,
    /// Reverse lookup: booking id → vehicle id.
    pub(super) booking_to_vehicle: DashMap<BookingId, VehicleId>,
    /// Next id to hand out. Only ever moves forward.
    pub(super) next_id: AtomicI64,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    /// Mutations hold it shared; compaction takes it exclusively so no
    /// append lands between the snapshot and the swap.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) vehicles: Arc<dyn VehicleDirectory>,
    pub(super) employees: Arc<dyn EmployeeDirectory>,
    pub(super) side_effects: SideEffects,
}

/// Apply an event to a timeline (no locking, caller holds the lock).
fn apply_to_timeline(
    timeline: &mut VehicleTimeline,
    event: &Event,
    booking_to_vehicle: &DashMap<BookingId, VehicleId>,
) {
    match event {
        Event::BookingCreated { booking } => {
            booking_to_vehicle.insert(booking.id, booking.vehicle_id);
            timeline.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking } => {
            timeline.replace_booking(booking.clone());
        }
        Event::BookingDeleted { id, .. } => {
            timeline.remove_booking(*id);
            booking_to_vehicle.remove(id);
        }
        Event::SequenceAdvanced { .. } => {}
    }
}

fn event_vehicle_id(event: &Event) -> Option<VehicleId> {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => Some(booking.vehicle_id),
        Event::BookingDeleted { vehicle_id, .. } => Some(*vehicle_id),
        Event::SequenceAdvanced { .. } => None,
    }
}

impl Engine {
    pub fn new(
        journal_path: PathBuf,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Journal::load_all(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            timelines: DashMap::new(),
            booking_to_vehicle: DashMap::new(),
            next_id: AtomicI64::new(1),
            journal_tx,
            compaction_gate: RwLock::new(()),
            vehicles: collaborators.vehicles,
            employees: collaborators.employees,
            side_effects: SideEffects::new(
                collaborators.contracts,
                collaborators.expenses,
                settings.employee_daily_rate,
            ),
        };

        // Sole owner of every Arc here, so try_write never contends. Blocking
        // lock calls would panic if this runs inside the runtime.
        for event in &events {
            match event {
                Event::SequenceAdvanced { next_id } => engine.bump_next_id(*next_id),
                Event::BookingCreated { booking } => engine.bump_next_id(booking.id + 1),
                _ => {}
            }
            let Some(vehicle_id) = event_vehicle_id(event) else {
                continue;
            };
            let timeline = engine.timeline_or_insert(vehicle_id);
            let Ok(mut guard) = timeline.try_write() else {
                continue;
            };
            apply_to_timeline(&mut guard, event, &engine.booking_to_vehicle);
        }

        tracing::debug!(
            events = events.len(),
            bookings = engine.booking_to_vehicle.len(),
            "journal replayed from {}",
            journal_path.display()
        );
        Ok(engine)
    }

    fn bump_next_id(&self, candidate: BookingId) {
        self.next_id.fetch_max(candidate, Ordering::SeqCst);
    }

    pub(super) fn allocate_id(&self) -> BookingId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn timeline_or_insert(&self, vehicle_id: VehicleId) -> SharedTimeline {
        self.timelines
            .entry(vehicle_id)
            .or_insert_with(|| Arc::new(RwLock::new(VehicleTimeline::new(vehicle_id))))
            .value()
            .clone()
    }

    pub fn get_timeline(&self, vehicle_id: VehicleId) -> Option<SharedTimeline> {
        self.timelines.get(&vehicle_id).map(|e| e.value().clone())
    }

    pub fn vehicle_for_booking(&self, id: BookingId) -> Option<VehicleId> {
        self.booking_to_vehicle.get(&id).map(|e| *e.value())
    }

    /// Write an event through the group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Journal, then apply. Nothing is applied when the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        timeline: &mut VehicleTimeline,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_timeline(timeline, event, &self.booking_to_vehicle);
        Ok(())
    }

    /// Lookup booking → vehicle, acquire the vehicle's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<VehicleTimeline>, EngineError> {
        let vehicle_id = self
            .vehicle_for_booking(id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let timeline = self
            .get_timeline(vehicle_id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let guard = timeline.write_owned().await;
        // Deleted while we waited for the lock.
        if guard.get(id).is_none() {
            return Err(EngineError::BookingNotFound(id));
        }
        Ok(guard)
    }
}
