use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::{BookingUpdate, NewBooking};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CheckConflict {
        vehicle_id: VehicleId,
        start: NaiveDate,
        end: NaiveDate,
    },
    InsertBooking {
        booking: NewBooking,
        returning: bool,
    },
    UpdateBooking {
        id: BookingId,
        update: BookingUpdate,
        returning: bool,
    },
    DeleteBooking {
        id: BookingId,
        returning: bool,
    },
    SelectBookings {
        id: Option<BookingId>,
        vehicle_id: Option<VehicleId>,
    },
    SelectCalendar {
        year: i32,
        month: u32,
        vehicle_id: Option<VehicleId>,
    },
    SelectMonthTotals {
        year: i32,
        month: u32,
        vehicle_id: Option<VehicleId>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(table, assignments, selection, returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT INTO bookings needs a column list".into()));
    }
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT into bookings".into()));
    }
    let values = &rows[0];
    if values.len() != insert.columns.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            insert.columns.len(),
            values.len()
        )));
    }

    let (mut vehicle_id, mut start, mut end, mut kind) = (None, None, None, None);
    let mut booking = NewBooking::new(0, NaiveDate::MIN, NaiveDate::MIN, BookingKind::Reservation);
    let mut customer = CustomerPatch::default();
    for (column, expr) in insert.columns.iter().zip(values) {
        let col = column.value.to_lowercase();
        let lit = literal(expr)?;
        match col.as_str() {
            "vehicle_id" => vehicle_id = Some(lit.as_i64(&col)?),
            "start_date" => start = Some(lit.as_iso_date(&col)?),
            "end_date" => end = Some(lit.as_iso_date(&col)?),
            "kind" => kind = Some(lit.as_kind(&col)?),
            "crosses_border" => booking.crosses_border = lit.as_bool(&col)?,
            "negotiated" => booking.negotiated = lit.as_bool(&col)?,
            "negotiated_rate" | "rate" => booking.negotiated_rate = lit.as_amount(&col)?,
            "employee_id" => booking.employee_id = lit.as_optional_i64(&col)?,
            "note" => booking.note = lit.into_text(),
            other => {
                if !set_customer_field(&mut customer, other, lit) {
                    return Err(SqlError::UnknownColumn(other.to_string()));
                }
            }
        }
    }

    booking.vehicle_id = vehicle_id.ok_or(SqlError::MissingColumn("vehicle_id"))?;
    booking.start = start.ok_or(SqlError::MissingColumn("start_date"))?;
    booking.end = end.ok_or(SqlError::MissingColumn("end_date"))?;
    booking.kind = kind.ok_or(SqlError::MissingColumn("kind"))?;
    booking.customer = customer.into_customer();
    Ok(Command::InsertBooking {
        booking,
        returning: insert.returning.is_some(),
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "bookings" {
        return Err(SqlError::UnknownTable(name));
    }

    let mut id = None;
    let mut update = BookingUpdate::default();
    for (col, lit) in eq_filters(selection)? {
        match col.as_str() {
            "id" => id = Some(lit.as_i64(&col)?),
            "target_date" => update.target_date = Some(lit.as_lenient_date(&col)?),
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }
    let id = id.ok_or(SqlError::MissingFilter("id"))?;

    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        let lit = literal(&assignment.value)?;
        match col.as_str() {
            "crosses_border" => update.crosses_border = Some(lit.as_bool(&col)?),
            "negotiated" => update.negotiated = Some(lit.as_bool(&col)?),
            "rate" | "negotiated_rate" | "day_rate" => update.rate = Some(lit.as_amount(&col)?),
            "employee_id" => update.employee_id = Some(lit.as_optional_i64(&col)?),
            "note" => update.note = Some(lit.into_text()),
            other => {
                if !set_customer_field(&mut update.customer, other, lit) {
                    return Err(SqlError::UnknownColumn(other.to_string()));
                }
            }
        }
    }

    Ok(Command::UpdateBooking { id, update, returning })
}

fn set_customer_field(patch: &mut CustomerPatch, column: &str, lit: Literal) -> bool {
    let field = match column {
        "customer_name" => &mut patch.name,
        "customer_surname" => &mut patch.surname,
        "customer_national_id" => &mut patch.national_id,
        "customer_nationality" => &mut patch.nationality,
        "customer_phone" => &mut patch.phone,
        "customer_email" => &mut patch.email,
        _ => return false,
    };
    *field = Some(lit.into_text());
    true
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let mut id = None;
    for (col, lit) in eq_filters(&delete.selection)? {
        match col.as_str() {
            "id" => id = Some(lit.as_i64(&col)?),
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }
    Ok(Command::DeleteBooking {
        id: id.ok_or(SqlError::MissingFilter("id"))?,
        returning: delete.returning.is_some(),
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = eq_filters(&select.selection)?;

    match table.as_str() {
        "conflicts" => {
            let (mut vehicle_id, mut start, mut end) = (None, None, None);
            for (col, lit) in filters {
                match col.as_str() {
                    "vehicle_id" => vehicle_id = Some(lit.as_i64(&col)?),
                    "start_date" => start = Some(lit.as_iso_date(&col)?),
                    "end_date" => end = Some(lit.as_iso_date(&col)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::CheckConflict {
                vehicle_id: vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                end: end.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        "bookings" => {
            let (mut id, mut vehicle_id) = (None, None);
            for (col, lit) in filters {
                match col.as_str() {
                    "id" => id = Some(lit.as_i64(&col)?),
                    "vehicle_id" => vehicle_id = Some(lit.as_i64(&col)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectBookings { id, vehicle_id })
        }
        "calendar" | "month_totals" => {
            let (mut year, mut month, mut vehicle_id) = (None, None, None);
            for (col, lit) in filters {
                match col.as_str() {
                    "year" => {
                        let v = lit.as_i64(&col)?;
                        year = Some(i32::try_from(v).map_err(|_| invalid(&col, format!("{v} out of range")))?);
                    }
                    "month" => {
                        let v = lit.as_i64(&col)?;
                        month = Some(u32::try_from(v).map_err(|_| invalid(&col, format!("{v} out of range")))?);
                    }
                    "vehicle_id" => vehicle_id = Some(lit.as_i64(&col)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            let year = year.ok_or(SqlError::MissingFilter("year"))?;
            let month = month.ok_or(SqlError::MissingFilter("month"))?;
            if table == "calendar" {
                Ok(Command::SelectCalendar { year, month, vehicle_id })
            } else {
                Ok(Command::SelectMonthTotals { year, month, vehicle_id })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = literal` terms joined by AND.
fn eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, Literal)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Literal)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, literal(right)?));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Literals ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Text(String),
    Number(String),
    Bool(bool),
}

fn literal(expr: &Expr) -> Result<Literal, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(Literal::Null),
            Value::Boolean(b) => Ok(Literal::Bool(*b)),
            Value::Number(n, _) => Ok(Literal::Number(n.clone())),
            Value::SingleQuotedString(s) | Value::EscapedStringLiteral(s) => Ok(Literal::Text(s.clone())),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Number(n) => Ok(Literal::Number(format!("-{n}"))),
            other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
        },
        Expr::Nested(inner) => literal(inner),
        _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn invalid(column: &str, reason: impl Into<String>) -> SqlError {
    SqlError::InvalidValue {
        column: column.to_string(),
        reason: reason.into(),
    }
}

impl Literal {
    fn as_i64(&self, col: &str) -> Result<i64, SqlError> {
        match self {
            Literal::Number(s) | Literal::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| invalid(col, format!("expected an integer, got '{s}'"))),
            other => Err(invalid(col, format!("expected an integer, got {other:?}"))),
        }
    }

    fn as_optional_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        match self {
            Literal::Null => Ok(None),
            _ => self.as_i64(col).map(Some),
        }
    }

    fn as_bool(&self, col: &str) -> Result<bool, SqlError> {
        match self {
            Literal::Bool(b) => Ok(*b),
            Literal::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "on" => Ok(true),
                "false" | "f" | "0" | "no" | "off" | "" => Ok(false),
                _ => Err(invalid(col, format!("bad bool: {s}"))),
            },
            Literal::Number(n) => Ok(n != "0"),
            Literal::Null => Err(invalid(col, "expected a bool, got NULL")),
        }
    }

    fn as_iso_date(&self, col: &str) -> Result<NaiveDate, SqlError> {
        match self {
            Literal::Text(s) => parse_iso_date(s).ok_or_else(|| invalid(col, format!("expected YYYY-MM-DD, got '{s}'"))),
            other => Err(invalid(col, format!("expected a date, got {other:?}"))),
        }
    }

    fn as_lenient_date(&self, col: &str) -> Result<NaiveDate, SqlError> {
        match self {
            Literal::Text(s) => parse_lenient_date(s)
                .ok_or_else(|| invalid(col, format!("expected YYYY-MM-DD or DD-MM-YYYY, got '{s}'"))),
            other => Err(invalid(col, format!("expected a date, got {other:?}"))),
        }
    }

    fn as_kind(&self, col: &str) -> Result<BookingKind, SqlError> {
        match self {
            Literal::Text(s) => BookingKind::parse(s).ok_or_else(|| {
                invalid(col, format!("expected reservation, maintenance or block, got '{s}'"))
            }),
            other => Err(invalid(col, format!("expected a booking kind, got {other:?}"))),
        }
    }

    /// Amounts keep only their digits; NULL or a value without digits clears.
    fn as_amount(&self, col: &str) -> Result<Option<Amount>, SqlError> {
        match self {
            Literal::Null => Ok(None),
            Literal::Number(s) | Literal::Text(s) => parse_amount(s).map_err(|e| invalid(col, e.to_string())),
            Literal::Bool(_) => Err(invalid(col, "expected an amount, got a bool")),
        }
    }

    fn into_text(self) -> String {
        match self {
            Literal::Null => String::new(),
            Literal::Text(s) | Literal::Number(s) => s,
            Literal::Bool(b) => b.to_string(),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    /// Well-formed SQL carrying a value the column cannot take.
    #[error("invalid {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}
