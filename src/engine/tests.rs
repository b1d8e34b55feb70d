use chrono::NaiveDate;

use super::*;
use crate::contracts::Contract;
use crate::directory::{Employee, StaticDirectory, Vehicle};
use crate::expenses::Expense;
use crate::json_store::JsonCollection;
use crate::limits::MAX_AMOUNT;

fn d(s: &str) -> NaiveDate {
    parse_iso_date(s).unwrap()
}

fn vehicle(id: VehicleId, plate: &str) -> Vehicle {
    Vehicle {
        id,
        plate: plate.into(),
        make: "Toyota".into(),
        model: "Hilux".into(),
        year: "2021".into(),
        rate_single_day: Some(60_000),
        rate_standard: Some(50_000),
        rate_border: Some(80_000),
        color_a: None,
        color_b: None,
    }
}

struct Harness {
    engine: Engine,
    contracts: Arc<JsonCollection<Contract>>,
    expenses: Arc<JsonCollection<Expense>>,
}

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("fleetcal_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn harness_at(path: PathBuf) -> Harness {
    let directory = Arc::new(StaticDirectory::new(
        vec![vehicle(1, "AB-12"), vehicle(2, "CD-34")],
        vec![
            Employee { id: 1, name: "Luis".into(), surname: "Soto".into(), active: true },
            Employee { id: 2, name: "Eva".into(), surname: "Paz".into(), active: true },
            Employee { id: 3, name: "Old".into(), surname: "Hand".into(), active: false },
        ],
    ));
    let contracts: Arc<JsonCollection<Contract>> = Arc::new(JsonCollection::in_memory());
    let expenses: Arc<JsonCollection<Expense>> = Arc::new(JsonCollection::in_memory());
    let collaborators = Collaborators {
        vehicles: directory.clone(),
        employees: directory,
        contracts: contracts.clone(),
        expenses: expenses.clone(),
    };
    let engine = Engine::new(path, collaborators, EngineSettings::default()).unwrap();
    Harness { engine, contracts, expenses }
}

fn harness(name: &str) -> Harness {
    harness_at(test_journal_path(name))
}

fn reservation(vehicle_id: VehicleId, a: &str, b: &str) -> NewBooking {
    NewBooking::new(vehicle_id, d(a), d(b), BookingKind::Reservation)
}

#[tokio::test]
async fn create_assigns_ids_and_snapshots() {
    let h = harness("create_snapshot.journal");
    let mut req = reservation(1, "2025-03-10", "2025-03-12");
    req.customer = Customer { name: "Ana".into(), surname: "Rojas".into(), ..Default::default() };
    let first = h.engine.create_booking(req).await.unwrap();
    let second = h
        .engine
        .create_booking(reservation(2, "2025-03-10", "2025-03-12"))
        .await
        .unwrap();

    assert_eq!((first.id, second.id), (1, 2));
    assert_eq!(first.vehicle.plate, "AB-12");
    assert_eq!(first.vehicle.make, "Toyota");
    assert_eq!(first.customer.surname, "Rojas");
    assert_eq!(first.lane, Some(Lane::A));
    assert_eq!(first.total_amount, 150_000);
    assert_eq!(h.engine.get_booking(first.id).await.unwrap(), first);
}

#[tokio::test]
async fn single_day_then_border_edit() {
    let h = harness("single_then_border.journal");
    let b = h
        .engine
        .create_booking(reservation(1, "2025-03-10", "2025-03-10"))
        .await
        .unwrap();
    assert_eq!(b.total_amount, 60_000);
    assert_eq!(b.pricing_source, PricingSource::SingleDay);

    let edited = h
        .engine
        .update_booking(b.id, BookingUpdate { crosses_border: Some(true), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(edited.total_amount, 80_000);
    assert_eq!(edited.pricing_source, PricingSource::Border);
    assert_eq!(edited.daily_rate_applied, 80_000);
}

#[tokio::test]
async fn overlapping_create_is_rejected_without_mutation() {
    let h = harness("overlap_rejected.journal");
    h.engine
        .create_booking(NewBooking::new(1, d("2025-01-03"), d("2025-01-04"), BookingKind::Maintenance))
        .await
        .unwrap();

    let err = h
        .engine
        .create_booking(reservation(1, "2025-01-01", "2025-01-03"))
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict { booking_id, kind, range } => {
            assert_eq!(booking_id, 1);
            assert_eq!(kind, BookingKind::Maintenance);
            assert_eq!(range.start, d("2025-01-03"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(h.engine.list_bookings(Some(1)).await.len(), 1);
    assert!(h.contracts.read().unwrap().is_empty());
}

#[tokio::test]
async fn other_vehicle_is_independent() {
    let h = harness("other_vehicle.journal");
    h.engine.create_booking(reservation(1, "2025-01-01", "2025-01-05")).await.unwrap();
    h.engine.create_booking(reservation(2, "2025-01-01", "2025-01-05")).await.unwrap();
    assert_eq!(h.engine.list_bookings(None).await.len(), 2);
}

#[tokio::test]
async fn lane_assignment_follows_adjacency() {
    let h = harness("lanes.journal");
    let a = h.engine.create_booking(reservation(1, "2025-01-01", "2025-01-05")).await.unwrap();
    let b = h.engine.create_booking(reservation(1, "2025-01-06", "2025-01-08")).await.unwrap();
    let c = h.engine.create_booking(reservation(1, "2025-01-10", "2025-01-12")).await.unwrap();
    assert_eq!(a.lane, Some(Lane::A));
    assert_eq!(b.lane, Some(Lane::B));
    assert_eq!(c.lane, Some(Lane::A));
}

#[tokio::test]
async fn check_conflict_reports_without_reserving() {
    let h = harness("check_conflict.journal");
    assert!(h.engine.check_conflict(1, d("2025-01-01"), d("2025-01-05")).await.is_ok());
    h.engine
        .create_booking(NewBooking::new(1, d("2025-01-02"), d("2025-01-02"), BookingKind::Block))
        .await
        .unwrap();
    let err = h
        .engine
        .check_conflict(1, d("2025-01-01"), d("2025-01-05"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { kind: BookingKind::Block, .. }));
    assert!(h.engine.check_conflict(1, d("2025-01-03"), d("2025-01-05")).await.is_ok());
    assert_eq!(h.engine.list_bookings(None).await.len(), 1);
}

#[tokio::test]
async fn validation_and_not_found() {
    let h = harness("validation.journal");
    let err = h
        .engine
        .create_booking(reservation(1, "2025-01-05", "2025-01-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = h.engine.create_booking(reservation(0, "2025-01-01", "2025-01-01")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = h.engine.create_booking(reservation(99, "2025-01-01", "2025-01-01")).await.unwrap_err();
    assert!(matches!(err, EngineError::VehicleNotFound(99)));

    let mut req = reservation(1, "2025-01-01", "2025-01-01");
    req.employee_id = Some(3);
    let err = h.engine.create_booking(req).await.unwrap_err();
    assert!(matches!(err, EngineError::EmployeeNotFound(3)));

    assert!(matches!(
        h.engine.update_booking(42, BookingUpdate::default()).await,
        Err(EngineError::BookingNotFound(42))
    ));
    assert!(matches!(h.engine.delete_booking(42).await, Err(EngineError::BookingNotFound(42))));
    assert!(h.engine.list_bookings(None).await.is_empty());
}

#[tokio::test]
async fn rates_outside_amount_bounds_are_rejected() {
    let h = harness("rate_bounds.journal");
    let mut req = reservation(1, "2025-04-01", "2025-04-02");
    req.negotiated = true;
    req.negotiated_rate = Some(i64::MAX);
    let err = h.engine.create_booking(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(h.engine.list_bookings(None).await.is_empty());

    let mut req = reservation(1, "2025-04-01", "2025-04-02");
    req.negotiated = true;
    req.negotiated_rate = Some(MAX_AMOUNT);
    let b = h.engine.create_booking(req).await.unwrap();
    assert_eq!(b.total_amount, 2 * MAX_AMOUNT);

    for rate in [MAX_AMOUNT + 1, -1] {
        for target_date in [None, Some(d("2025-04-02"))] {
            let err = h
                .engine
                .update_booking(b.id, BookingUpdate { target_date, rate: Some(Some(rate)), ..Default::default() })
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{rate} {target_date:?}");
        }
    }
    assert_eq!(h.engine.get_booking(b.id).await.unwrap(), b);
}

#[tokio::test]
async fn non_reservations_are_unpriced_and_reject_pricing_edits() {
    let h = harness("non_reservation.journal");
    let mut req = NewBooking::new(1, d("2025-02-01"), d("2025-02-03"), BookingKind::Maintenance);
    req.crosses_border = true;
    let b = h.engine.create_booking(req).await.unwrap();
    assert_eq!(b.lane, None);
    assert!(!b.crosses_border);
    assert_eq!(b.total_amount, 0);
    assert_eq!(b.pricing_source, PricingSource::Kind(BookingKind::Maintenance));
    assert!(h.contracts.read().unwrap().is_empty());

    let err = h
        .engine
        .update_booking(b.id, BookingUpdate { crosses_border: Some(true), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let noted = h
        .engine
        .update_booking(b.id, BookingUpdate { note: Some("brakes".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(noted.note, "brakes");
}

#[tokio::test]
async fn per_day_override_and_negotiated_rate() {
    let h = harness("per_day_negotiated.journal");
    let b = h.engine.create_booking(reservation(1, "2025-02-01", "2025-02-03")).await.unwrap();
    assert_eq!(b.total_amount, 150_000);

    let b = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate { negotiated: Some(true), rate: Some(Some(70_000)), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(b.pricing_source, PricingSource::Negotiated);
    assert_eq!(b.total_amount, 210_000);

    let b = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate {
                target_date: Some(d("2025-02-02")),
                rate: Some(Some(45_000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(b.total_amount, 70_000 + 45_000 + 70_000);
    assert_eq!(b.per_day_overrides.get(&d("2025-02-02")), Some(&45_000));
    // Per-day edits leave the whole-range fields alone.
    assert_eq!(b.daily_rate_applied, 70_000);

    // Negotiated on, rate omitted: stored rate kept.
    let b = h
        .engine
        .update_booking(b.id, BookingUpdate { negotiated: Some(true), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(b.negotiated_rate, Some(70_000));

    let b = h
        .engine
        .update_booking(b.id, BookingUpdate { negotiated: Some(false), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(b.negotiated_rate, None);
    assert_eq!(b.pricing_source, PricingSource::Standard);
    assert_eq!(b.total_amount, 50_000 + 45_000 + 50_000);

    let b = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate { target_date: Some(d("2025-02-02")), rate: Some(None), ..Default::default() },
        )
        .await
        .unwrap();
    assert!(b.per_day_overrides.is_empty());
    assert_eq!(b.total_amount, 150_000);
}

#[tokio::test]
async fn per_day_border_flag() {
    let h = harness("per_day_border.journal");
    let b = h.engine.create_booking(reservation(1, "2025-02-01", "2025-02-03")).await.unwrap();
    let b = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate {
                target_date: Some(d("2025-02-03")),
                crosses_border: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!b.crosses_border);
    assert_eq!(b.total_amount, 50_000 + 50_000 + 80_000);
    assert_eq!(b.pricing_source, PricingSource::Standard);
}

#[tokio::test]
async fn per_day_edit_outside_range_is_rejected() {
    let h = harness("per_day_outside.journal");
    let b = h.engine.create_booking(reservation(1, "2025-02-01", "2025-02-03")).await.unwrap();
    let err = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate { target_date: Some(d("2025-02-04")), rate: Some(Some(1)), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(h.engine.get_booking(b.id).await.unwrap(), b);
}

#[tokio::test]
async fn global_edit_is_idempotent() {
    let h = harness("idempotent.journal");
    let b = h.engine.create_booking(reservation(1, "2025-04-01", "2025-04-07")).await.unwrap();
    let update = BookingUpdate { crosses_border: Some(true), ..Default::default() };
    let once = h.engine.update_booking(b.id, update.clone()).await.unwrap();
    let twice = h.engine.update_booking(b.id, update).await.unwrap();
    assert_eq!(once.total_amount, twice.total_amount);
    assert_eq!(once.total_amount, 7 * 80_000);
}

#[tokio::test]
async fn customer_merge_keeps_unset_fields() {
    let h = harness("customer_merge.journal");
    let mut req = reservation(1, "2025-04-01", "2025-04-02");
    req.customer = Customer { name: "Ana".into(), phone: "111".into(), ..Default::default() };
    let b = h.engine.create_booking(req).await.unwrap();
    let b = h
        .engine
        .update_booking(
            b.id,
            BookingUpdate {
                customer: CustomerPatch { phone: Some("222".into()), ..Default::default() },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(b.customer.name, "Ana");
    assert_eq!(b.customer.phone, "222");
    let contract = h.contracts.find_by_booking_id(b.id).unwrap().unwrap();
    assert_eq!(contract.customer.phone, "222");
}

#[tokio::test]
async fn contract_follows_reservation_edits() {
    let h = harness("contract_sync.journal");
    let b = h.engine.create_booking(reservation(1, "2025-03-10", "2025-03-10")).await.unwrap();
    let created = h.contracts.find_by_booking_id(b.id).unwrap().unwrap();
    assert_eq!(created.amount, 60_000);
    assert_eq!(created.vehicle.plate, "AB-12");

    h.engine
        .update_booking(b.id, BookingUpdate { crosses_border: Some(true), ..Default::default() })
        .await
        .unwrap();
    let synced = h.contracts.find_by_booking_id(b.id).unwrap().unwrap();
    assert_eq!(synced.id, created.id);
    assert_eq!(synced.amount, 80_000);
    assert_eq!(h.contracts.read().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_cascades_to_expense_only() {
    let h = harness("delete_cascade.journal");
    let mut req = reservation(1, "2025-03-10", "2025-03-12");
    req.employee_id = Some(1);
    let b = h.engine.create_booking(req).await.unwrap();
    assert_eq!(b.employee.as_ref().unwrap().name, "Luis Soto");

    let mut other = reservation(2, "2025-03-10", "2025-03-11");
    other.employee_id = Some(2);
    let other = h.engine.create_booking(other).await.unwrap();

    let expenses = h.expenses.read().unwrap();
    assert_eq!(expenses.len(), 2);
    assert_eq!(expenses[0].amount, 3 * 10_000);

    h.engine.delete_booking(b.id).await.unwrap();
    let left = h.expenses.read().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].booking_id, Some(other.id));

    // Contract is kept, and nothing new is created for the deleted booking.
    assert_eq!(h.contracts.read().unwrap().len(), 2);
    assert!(h.engine.get_booking(b.id).await.is_err());
    assert!(h.engine.check_conflict(1, d("2025-03-10"), d("2025-03-12")).await.is_ok());
}

#[tokio::test]
async fn employee_reassignment_regenerates_expense() {
    let h = harness("reassign.journal");
    let mut req = reservation(1, "2025-03-10", "2025-03-11");
    req.employee_id = Some(1);
    let b = h.engine.create_booking(req).await.unwrap();

    let b = h
        .engine
        .update_booking(b.id, BookingUpdate { employee_id: Some(Some(2)), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(b.employee.as_ref().unwrap().name, "Eva Paz");
    let expenses = h.expenses.read().unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].employee_id, Some(2));

    h.engine
        .update_booking(b.id, BookingUpdate { employee_id: Some(None), ..Default::default() })
        .await
        .unwrap();
    assert!(h.expenses.read().unwrap().is_empty());
}

#[tokio::test]
async fn month_view_counts_boundary_booking_in_both_months() {
    let h = harness("month_view.journal");
    let b = h.engine.create_booking(reservation(1, "2025-01-30", "2025-02-02")).await.unwrap();
    assert_eq!(b.total_amount, 200_000);
    h.engine
        .create_booking(NewBooking::new(2, d("2025-01-15"), d("2025-01-16"), BookingKind::Block))
        .await
        .unwrap();

    let jan = h.engine.month_view(2025, 1, None, d("2025-01-15")).await.unwrap();
    let feb = h.engine.month_view(2025, 2, None, d("2025-01-15")).await.unwrap();
    assert_eq!(jan.cells.len(), 42);
    assert_eq!(jan.total_amount, 200_000);
    assert_eq!(feb.total_amount, 200_000);

    let block_day = jan.cells.iter().find(|c| c.date == d("2025-01-15")).unwrap();
    assert!(block_day.is_today);
    assert_eq!(block_day.entries.len(), 1);
    assert_eq!(block_day.entries[0].label, "CD-34 · Block");

    let only_v2 = h.engine.month_view(2025, 1, Some(2), d("2025-01-15")).await.unwrap();
    assert_eq!(only_v2.total_amount, 0);
    assert!(only_v2.cells.iter().all(|c| c.entries.iter().all(|e| e.vehicle_id == 2)));
}

#[tokio::test]
async fn journal_replay_restores_state() {
    let path = test_journal_path("replay.journal");
    let (id, total) = {
        let h = harness_at(path.clone());
        let b = h.engine.create_booking(reservation(1, "2025-05-01", "2025-05-03")).await.unwrap();
        let b = h
            .engine
            .update_booking(b.id, BookingUpdate { crosses_border: Some(true), ..Default::default() })
            .await
            .unwrap();
        let gone = h.engine.create_booking(reservation(2, "2025-05-01", "2025-05-01")).await.unwrap();
        h.engine.delete_booking(gone.id).await.unwrap();
        (b.id, b.total_amount)
    };

    let h = harness_at(path);
    let restored = h.engine.get_booking(id).await.unwrap();
    assert_eq!(restored.total_amount, total);
    assert_eq!(h.engine.list_bookings(None).await.len(), 1);
    let next = h.engine.create_booking(reservation(2, "2025-06-01", "2025-06-01")).await.unwrap();
    assert_eq!(next.id, 3);
}

#[tokio::test]
async fn compaction_keeps_bookings_and_id_watermark() {
    let path = test_journal_path("compact.journal");
    {
        let h = harness_at(path.clone());
        for day in 1..=5 {
            let date = format!("2025-07-{day:02}");
            let b = h.engine.create_booking(reservation(1, &date, &date)).await.unwrap();
            if day > 2 {
                h.engine.delete_booking(b.id).await.unwrap();
            }
        }
        assert_eq!(h.engine.journal_appends_since_compact().await, 8);
        h.engine.compact_journal().await.unwrap();
        assert_eq!(h.engine.journal_appends_since_compact().await, 0);
    }

    let h = harness_at(path);
    assert_eq!(h.engine.list_bookings(None).await.len(), 2);
    let next = h.engine.create_booking(reservation(1, "2025-08-01", "2025-08-01")).await.unwrap();
    assert_eq!(next.id, 6, "ids of deleted bookings are never reused");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_admit_one() {
    let h = Arc::new(harness("concurrent.journal"));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.engine.create_booking(reservation(1, "2025-09-01", "2025-09-05")).await
        }));
    }
    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 7));
    assert_eq!(h.engine.list_bookings(Some(1)).await.len(), 1);
}
