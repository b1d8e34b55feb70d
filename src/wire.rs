use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::FleetAuthSource;
use crate::engine::{Engine, EngineError, MonthView};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct FleetHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<FleetQueryParser>,
}

impl FleetHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(FleetQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::CheckConflict { vehicle_id, start, end } => {
                let blocking = match engine.check_conflict(vehicle_id, start, end).await {
                    Ok(()) => None,
                    Err(EngineError::Conflict {
                        booking_id,
                        kind,
                        range,
                    }) => Some((booking_id, kind, range)),
                    Err(e) => return Err(engine_err(e)),
                };
                let schema = Arc::new(conflict_schema());
                let rows: Vec<PgWireResult<DataRow>> = blocking
                    .into_iter()
                    .map(|(booking_id, kind, range)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&booking_id)?;
                        encoder.encode_field(&kind.as_str())?;
                        encoder.encode_field(&iso(range.start))?;
                        encoder.encode_field(&iso(range.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertBooking { booking, returning } => {
                let created = engine.create_booking(booking).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![booking_rows(vec![created])?]);
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking { id, update, returning } => {
                let updated = engine.update_booking(id, update).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![booking_rows(vec![updated])?]);
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id, returning } => {
                let deleted = engine.delete_booking(id).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![booking_rows(vec![deleted])?]);
                }
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { id, vehicle_id } => {
                let bookings = match id {
                    Some(id) => match engine.get_booking(id).await {
                        Ok(b) => vec![b],
                        Err(e) if e.is_not_found() => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_bookings(vehicle_id).await,
                };
                let bookings = bookings
                    .into_iter()
                    .filter(|b| vehicle_id.is_none_or(|v| b.vehicle_id == v))
                    .collect();
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectCalendar { year, month, vehicle_id } => {
                let view = engine
                    .month_view(year, month, vehicle_id, today())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![calendar_rows(view)?])
            }
            Command::SelectMonthTotals { year, month, vehicle_id } => {
                let view = engine
                    .month_view(year, month, vehicle_id, today())
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(month_totals_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&view.year)?;
                encoder.encode_field(&(view.month as i32))?;
                encoder.encode_field(&view.total_amount)?;
                encoder.encode_field(&(view.reservation_count as i64))?;
                let rows: Vec<PgWireResult<DataRow>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn iso(day: NaiveDate) -> String {
    day.format(ISO_DATE).to_string()
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("kind", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("vehicle_id", Type::INT8),
        field("kind", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("days", Type::INT8),
        field("lane", Type::VARCHAR),
        field("crosses_border", Type::BOOL),
        field("pricing_source", Type::VARCHAR),
        field("daily_rate_applied", Type::INT8),
        field("total_amount", Type::INT8),
        field("negotiated", Type::BOOL),
        field("negotiated_rate", Type::INT8),
        field("per_day", Type::VARCHAR),
        field("note", Type::VARCHAR),
        field("customer_name", Type::VARCHAR),
        field("customer_surname", Type::VARCHAR),
        field("customer_national_id", Type::VARCHAR),
        field("customer_nationality", Type::VARCHAR),
        field("customer_phone", Type::VARCHAR),
        field("customer_email", Type::VARCHAR),
        field("employee_id", Type::INT8),
        field("employee_name", Type::VARCHAR),
        field("plate", Type::VARCHAR),
        field("make", Type::VARCHAR),
        field("model", Type::VARCHAR),
        field("year", Type::VARCHAR),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("in_month", Type::BOOL),
        field("is_today", Type::BOOL),
        field("booking_count", Type::INT8),
        field("entries", Type::VARCHAR),
    ]
}

fn month_totals_schema() -> Vec<FieldInfo> {
    vec![
        field("year", Type::INT4),
        field("month", Type::INT4),
        field("total_amount", Type::INT8),
        field("reservation_count", Type::INT8),
    ]
}

/// Schema of the rows a statement returns, decided before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("RETURNING") {
        return booking_schema();
    }
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("CONFLICTS") {
        conflict_schema()
    } else if upper.contains("MONTH_TOTALS") {
        month_totals_schema()
    } else if upper.contains("CALENDAR") {
        calendar_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else {
        vec![]
    }
}

fn json_text<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| user_error("XX000", format!("encoding error: {e}")))
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<DataRow>> = bookings
        .into_iter()
        .map(|b| {
            let per_day = json_text(&serde_json::json!({
                "overrides": b.per_day_overrides,
                "flags": b.per_day_flags,
            }))?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id)?;
            encoder.encode_field(&b.vehicle_id)?;
            encoder.encode_field(&b.kind.as_str())?;
            encoder.encode_field(&iso(b.range.start))?;
            encoder.encode_field(&iso(b.range.end))?;
            encoder.encode_field(&b.range.days())?;
            encoder.encode_field(&b.lane.map(|l| l.as_str()))?;
            encoder.encode_field(&b.crosses_border)?;
            encoder.encode_field(&b.pricing_source.as_str())?;
            encoder.encode_field(&b.daily_rate_applied)?;
            encoder.encode_field(&b.total_amount)?;
            encoder.encode_field(&b.negotiated)?;
            encoder.encode_field(&b.negotiated_rate)?;
            encoder.encode_field(&per_day)?;
            encoder.encode_field(&b.note)?;
            encoder.encode_field(&b.customer.name)?;
            encoder.encode_field(&b.customer.surname)?;
            encoder.encode_field(&b.customer.national_id)?;
            encoder.encode_field(&b.customer.nationality)?;
            encoder.encode_field(&b.customer.phone)?;
            encoder.encode_field(&b.customer.email)?;
            encoder.encode_field(&b.employee.as_ref().map(|e| e.id))?;
            encoder.encode_field(&b.employee.as_ref().map(|e| e.name.clone()))?;
            encoder.encode_field(&b.vehicle.plate)?;
            encoder.encode_field(&b.vehicle.make)?;
            encoder.encode_field(&b.vehicle.model)?;
            encoder.encode_field(&b.vehicle.year)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn calendar_rows(view: MonthView) -> PgWireResult<Response> {
    let schema = Arc::new(calendar_schema());
    let rows: Vec<PgWireResult<DataRow>> = view
        .cells
        .into_iter()
        .map(|cell| {
            let entries = json_text(&cell.entries)?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&iso(cell.date))?;
            encoder.encode_field(&cell.in_month)?;
            encoder.encode_field(&cell.is_today)?;
            encoder.encode_field(&(cell.entries.len() as i64))?;
            encoder.encode_field(&entries)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for FleetHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetQueryParser;

#[async_trait]
impl QueryParser for FleetQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetHandler {
    type Statement = String;
    type QueryParser = FleetQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&engine, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

/// One left-to-right pass: bound text is copied verbatim and never rescanned.
/// Placeholders without a bound value are left as written.
fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            result.push_str(&sql[copied..i]);
            match param {
                Some(text) => {
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end.max(i + 1);
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetFactory {
    handler: Arc<FleetHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<FleetAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl FleetFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = FleetAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(FleetHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls_acceptor: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(FleetFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls_acceptor, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::BookingNotFound(_) | EngineError::VehicleNotFound(_) | EngineError::EmployeeNotFound(_) => {
            "P0002"
        }
        EngineError::LimitExceeded(_) => "54000",
        EngineError::JournalError(_) => "58030",
    }
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidValue { .. } => "22023",
        _ => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
