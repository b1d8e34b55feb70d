use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};

use fleetcal::engine::EngineSettings;
use fleetcal::tenant::{EMPLOYEES_FILE, TenantManager, VEHICLES_FILE};
use fleetcal::wire;

// ── Test infrastructure ──────────────────────────────────────

const TENANT: &str = "test";

fn test_data_dir() -> PathBuf {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let dir = std::env::temp_dir().join(format!(
        "fleetcal_int_test_{}_{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let tenant_dir = dir.join(TENANT);
    std::fs::create_dir_all(&tenant_dir).unwrap();
    std::fs::write(
        tenant_dir.join(VEHICLES_FILE),
        r#"[{"id": 1, "plate": "AB-12", "make": "Toyota", "model": "Hilux", "year": 2021},
            {"id": 2, "plate": "CD-34", "make": "Kia", "model": "Rio", "year": "2019", "rate_standard": 40000}]"#,
    )
    .unwrap();
    std::fs::write(
        tenant_dir.join(EMPLOYEES_FILE),
        r#"[{"id": 1, "name": "Luis", "surname": "Soto"}]"#,
    )
    .unwrap();
    dir
}

async fn start_test_server() -> (SocketAddr, PathBuf) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = test_data_dir();
    let tm = Arc::new(TenantManager::new(dir.clone(), 1000, EngineSettings::default()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "fleetcal".to_string(), None).await;
            });
        }
    });

    (addr, dir)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(TENANT)
        .user("fleetcal")
        .password("fleetcal");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.as_db_error().unwrap().code().code().to_string()
}

fn col<'a>(row: &'a SimpleQueryRow, name: &str) -> &'a str {
    row.get(name).unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_price_and_conflict() {
    let (addr, _dir) = start_test_server().await;
    let client = connect(addr).await;

    let created = rows(
        &client,
        "INSERT INTO bookings (vehicle_id, start_date, end_date, kind, employee_id, customer_name) \
         VALUES (1, '2025-03-10', '2025-03-12', 'reservation', 1, 'Ana') RETURNING *",
    )
    .await;
    assert_eq!(created.len(), 1);
    let b = &created[0];
    assert_eq!(col(b, "lane"), "A");
    assert_eq!(col(b, "days"), "3");
    assert_eq!(col(b, "pricing_source"), "standard");
    assert_eq!(col(b, "total_amount"), "150000");
    assert_eq!(col(b, "employee_name"), "Luis Soto");
    assert_eq!(col(b, "plate"), "AB-12");

    // Pre-check sees the blocking booking.
    let blocking = rows(
        &client,
        "SELECT * FROM conflicts WHERE vehicle_id = 1 AND start_date = '2025-03-12' AND end_date = '2025-03-14'",
    )
    .await;
    assert_eq!(blocking.len(), 1);
    assert_eq!(col(&blocking[0], "kind"), "reservation");
    assert_eq!(col(&blocking[0], "start_date"), "2025-03-10");

    let free = rows(
        &client,
        "SELECT * FROM conflicts WHERE vehicle_id = 1 AND start_date = '2025-03-13' AND end_date = '2025-03-14'",
    )
    .await;
    assert!(free.is_empty());

    let code = sqlstate(
        &client,
        "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (1, '2025-03-12', '2025-03-20', 'block')",
    )
    .await;
    assert_eq!(code, "23P01");

    // Adjacent reservation goes to lane B.
    let next = rows(
        &client,
        "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (1, '2025-03-13', '2025-03-13', 'reservation') RETURNING *",
    )
    .await;
    assert_eq!(col(&next[0], "lane"), "B");
    assert_eq!(col(&next[0], "pricing_source"), "single_day");
}

#[tokio::test]
async fn update_with_bound_parameters() {
    let (addr, _dir) = start_test_server().await;
    let client = connect(addr).await;

    let created = rows(
        &client,
        "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (2, '2025-05-01', '2025-05-04', 'reservation') RETURNING *",
    )
    .await;
    let id = col(&created[0], "id").to_string();
    assert_eq!(col(&created[0], "total_amount"), "160000");

    let updated = client
        .execute("UPDATE bookings SET rate = $2 WHERE id = $1", &[&id, &"45.000"])
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let per_day = client
        .execute(
            "UPDATE bookings SET crosses_border = $3 WHERE id = $1 AND target_date = $2",
            &[&id, &"02-05-2025", &"true"],
        )
        .await
        .unwrap();
    assert_eq!(per_day, 1);

    let got = rows(&client, &format!("SELECT * FROM bookings WHERE id = {id}")).await;
    let b = &got[0];
    assert_eq!(col(b, "negotiated"), "t");
    assert_eq!(col(b, "negotiated_rate"), "45000");
    assert_eq!(col(b, "pricing_source"), "negotiated");
    // Negotiated rate applies to every day; the per-day border flag does not override it.
    assert_eq!(col(b, "total_amount"), "180000");
    assert!(col(b, "per_day").contains("2025-05-02"));
}

#[tokio::test]
async fn calendar_and_month_totals() {
    let (addr, _dir) = start_test_server().await;
    let client = connect(addr).await;

    client
        .simple_query(
            "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (1, '2025-01-30', '2025-02-02', 'reservation')",
        )
        .await
        .unwrap();
    client
        .simple_query("INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (2, '2025-02-10', '2025-02-10', 'maintenance')")
        .await
        .unwrap();

    let cells = rows(&client, "SELECT * FROM calendar WHERE year = 2025 AND month = 2").await;
    assert_eq!(cells.len(), 42);
    // February 2025 starts on a Saturday; the grid starts on the Monday before.
    assert_eq!(col(&cells[0], "date"), "2025-01-27");
    assert_eq!(col(&cells[0], "in_month"), "f");
    let first = cells.iter().find(|c| col(c, "date") == "2025-02-01").unwrap();
    assert_eq!(col(first, "booking_count"), "1");
    assert!(col(first, "entries").contains("AB-12 · Reservation"));

    let only_two = rows(
        &client,
        "SELECT * FROM calendar WHERE year = 2025 AND month = 2 AND vehicle_id = 2",
    )
    .await;
    assert_eq!(
        only_two.iter().filter(|c| col(c, "booking_count") != "0").count(),
        1
    );

    let totals = rows(&client, "SELECT * FROM month_totals WHERE year = 2025 AND month = 2").await;
    assert_eq!(totals.len(), 1);
    assert_eq!(col(&totals[0], "total_amount"), "200000");
    assert_eq!(col(&totals[0], "reservation_count"), "1");

    assert_eq!(
        sqlstate(&client, "SELECT * FROM calendar WHERE year = 2025 AND month = 13").await,
        "22023"
    );
}

#[tokio::test]
async fn delete_and_error_codes() {
    let (addr, dir) = start_test_server().await;
    let client = connect(addr).await;

    let created = rows(
        &client,
        "INSERT INTO bookings (vehicle_id, start_date, end_date, kind, employee_id) VALUES (1, '2025-06-01', '2025-06-02', 'reservation', 1) RETURNING id",
    )
    .await;
    let id = col(&created[0], "id").to_string();

    let expenses = std::fs::read_to_string(dir.join(TENANT).join("expenses.json")).unwrap();
    assert!(expenses.contains(&format!("Booking #{id}")));

    let deleted = client
        .simple_query(&format!("DELETE FROM bookings WHERE id = {id}"))
        .await
        .unwrap();
    assert!(matches!(deleted.last(), Some(SimpleQueryMessage::CommandComplete(1))));

    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM bookings WHERE id = {id}")).await,
        "P0002"
    );
    let expenses = std::fs::read_to_string(dir.join(TENANT).join("expenses.json")).unwrap();
    assert!(!expenses.contains(&format!("Booking #{id}")));

    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (1, '2025-06-05', '2025-06-01', 'block')"
        )
        .await,
        "22023"
    );
    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO bookings (vehicle_id, start_date, end_date, kind) VALUES (99, '2025-06-05', '2025-06-06', 'block')"
        )
        .await,
        "P0002"
    );
    assert_eq!(sqlstate(&client, "SELEC * FROM bookings").await, "42601");
    assert!(rows(&client, &format!("SELECT * FROM bookings WHERE id = {id}")).await.is_empty());
}
