use std::collections::HashMap;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
///
/// Every command names its acting user explicitly; the request layer in front
/// of this server is trusted to have authenticated them.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterUser {
        user: User,
    },
    SetExternalId {
        faculty_id: Ulid,
        external_id: Option<String>,
    },
    SetAccepting {
        faculty_id: Ulid,
        accepting: bool,
    },
    PutProfile {
        student_id: Ulid,
        profile: StudentProfile,
    },
    InsertSlot {
        id: Ulid,
        faculty_id: Ulid,
        subject: String,
        start: Ms,
        end: Ms,
    },
    InsertSlotRun {
        faculty_id: Ulid,
        subject: String,
        start: Ms,
        end: Ms,
        slot_minutes: i64,
        break_minutes: i64,
    },
    DeleteSlot {
        id: Ulid,
        faculty_id: Ulid,
    },
    DeleteSlotsBetween {
        faculty_id: Ulid,
        start: Ms,
        end: Ms,
    },
    /// `team_id` None means "ask the profile resolver".
    InsertBooking {
        slot_id: Ulid,
        student_id: Ulid,
        team_id: Option<String>,
    },
    CancelBooking {
        booking_id: Ulid,
        actor_id: Ulid,
        reason: String,
    },
    StudentCancel {
        booking_id: Ulid,
        student_id: Ulid,
    },
    MarkAbsent {
        booking_id: Ulid,
        faculty_id: Ulid,
    },
    MarkCompleted {
        booking_id: Ulid,
        faculty_id: Ulid,
    },
    GrantPermission {
        faculty_id: Ulid,
        student_id: Ulid,
        subject: String,
    },
    GrantForBooking {
        faculty_id: Ulid,
        booking_id: Ulid,
    },
    SelectSlot {
        id: Ulid,
    },
    SelectFacultySlots {
        faculty_id: Ulid,
    },
    SelectVisibleSlots {
        student_id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectStudentBookings {
        student_id: Ulid,
        status: Option<BookingStatus>,
    },
    SelectFacultyBookings {
        faculty_id: Ulid,
        status: Option<BookingStatus>,
    },
    SelectBlockedSubjects {
        student_id: Ulid,
    },
    SelectAbsentStudents {
        faculty_id: Ulid,
    },
}

impl Command {
    /// Whether the command returns rows rather than a bare tag.
    pub fn returns_rows(&self) -> bool {
        !matches!(
            self,
            Command::RegisterUser { .. }
                | Command::SetExternalId { .. }
                | Command::SetAccepting { .. }
                | Command::PutProfile { .. }
                | Command::InsertSlot { .. }
                | Command::InsertSlotRun { .. }
                | Command::DeleteSlot { .. }
                | Command::DeleteSlotsBetween { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            arity("users", &values, 3)?;
            let id = parse_ulid(&values[0])?;
            let name = parse_string(&values[1])?;
            let external_id = match values.get(3) {
                Some(v) => parse_string_or_null(v)?,
                None => None,
            };
            let user = match parse_string(&values[2])?.to_lowercase().as_str() {
                "student" => User::student(id, name),
                "faculty" => User::faculty(id, name, external_id),
                other => return Err(SqlError::Parse(format!("unknown role: {other}"))),
            };
            Ok(Command::RegisterUser { user })
        }
        "faculty_external_ids" => {
            arity("faculty_external_ids", &values, 2)?;
            Ok(Command::SetExternalId {
                faculty_id: parse_ulid(&values[0])?,
                external_id: parse_string_or_null(&values[1])?,
            })
        }
        "faculty_availability" => {
            arity("faculty_availability", &values, 2)?;
            Ok(Command::SetAccepting {
                faculty_id: parse_ulid(&values[0])?,
                accepting: parse_bool(&values[1])?,
            })
        }
        "profiles" => {
            arity("profiles", &values, 2)?;
            let mentor_external_ids = match values.get(2) {
                Some(v) => parse_string_or_null(v)?
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|m| !m.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            Ok(Command::PutProfile {
                student_id: parse_ulid(&values[0])?,
                profile: StudentProfile {
                    team_id: parse_string_or_null(&values[1])?.unwrap_or_default(),
                    mentor_external_ids,
                },
            })
        }
        "slots" => {
            arity("slots", &values, 5)?;
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                faculty_id: parse_ulid(&values[1])?,
                subject: parse_string(&values[2])?,
                start: parse_i64(&values[3])?,
                end: parse_i64(&values[4])?,
            })
        }
        "slot_runs" => {
            arity("slot_runs", &values, 6)?;
            Ok(Command::InsertSlotRun {
                faculty_id: parse_ulid(&values[0])?,
                subject: parse_string(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                slot_minutes: parse_i64(&values[4])?,
                break_minutes: parse_i64(&values[5])?,
            })
        }
        "bookings" => {
            arity("bookings", &values, 2)?;
            let team_id = match values.get(2) {
                Some(v) => parse_string_or_null(v)?,
                None => None,
            };
            Ok(Command::InsertBooking {
                slot_id: parse_ulid(&values[0])?,
                student_id: parse_ulid(&values[1])?,
                team_id,
            })
        }
        "cancellations" => {
            arity("cancellations", &values, 2)?;
            let reason = match values.get(2) {
                Some(v) => parse_string_or_null(v)?.unwrap_or_default(),
                None => String::new(),
            };
            Ok(Command::CancelBooking {
                booking_id: parse_ulid(&values[0])?,
                actor_id: parse_ulid(&values[1])?,
                reason,
            })
        }
        "absences" => {
            arity("absences", &values, 2)?;
            Ok(Command::MarkAbsent {
                booking_id: parse_ulid(&values[0])?,
                faculty_id: parse_ulid(&values[1])?,
            })
        }
        "completions" => {
            arity("completions", &values, 2)?;
            Ok(Command::MarkCompleted {
                booking_id: parse_ulid(&values[0])?,
                faculty_id: parse_ulid(&values[1])?,
            })
        }
        "rebooking_permissions" => {
            arity("rebooking_permissions", &values, 2)?;
            let faculty_id = parse_ulid(&values[0])?;
            if values.len() >= 3 {
                Ok(Command::GrantPermission {
                    faculty_id,
                    student_id: parse_ulid(&values[1])?,
                    subject: parse_string(&values[2])?,
                })
            } else {
                Ok(Command::GrantForBooking {
                    faculty_id,
                    booking_id: parse_ulid(&values[1])?,
                })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "slots" => {
            let faculty_id = filters.required_ulid("faculty_id")?;
            if let Some(id) = filters.ulid("id")? {
                return Ok(Command::DeleteSlot { id, faculty_id });
            }
            Ok(Command::DeleteSlotsBetween {
                faculty_id,
                start: filters.lower_bound("start")?,
                end: filters.upper_bound("end")?,
            })
        }
        "bookings" => Ok(Command::StudentCancel {
            booking_id: filters.required_ulid("id")?,
            student_id: filters.required_ulid("student_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "slots" => {
            if let Some(id) = filters.ulid("id")? {
                return Ok(Command::SelectSlot { id });
            }
            Ok(Command::SelectFacultySlots {
                faculty_id: filters.required_ulid("faculty_id")?,
            })
        }
        "visible_slots" => Ok(Command::SelectVisibleSlots {
            student_id: filters.required_ulid("student_id")?,
        }),
        "bookings" => {
            if let Some(id) = filters.ulid("id")? {
                return Ok(Command::SelectBooking { id });
            }
            let status = filters.status()?;
            if let Some(student_id) = filters.ulid("student_id")? {
                return Ok(Command::SelectStudentBookings { student_id, status });
            }
            if let Some(faculty_id) = filters.ulid("faculty_id")? {
                return Ok(Command::SelectFacultyBookings { faculty_id, status });
            }
            Err(SqlError::MissingFilter("student_id or faculty_id"))
        }
        "blocked_subjects" => Ok(Command::SelectBlockedSubjects {
            student_id: filters.required_ulid("student_id")?,
        }),
        "absent_students" => Ok(Command::SelectAbsentStudents {
            faculty_id: filters.required_ulid("faculty_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = v`, `col >= v` and `col <= v` terms of an AND-only WHERE clause.
#[derive(Default)]
struct Filters {
    eq: HashMap<String, Expr>,
    ge: HashMap<String, Expr>,
    le: HashMap<String, Expr>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Self::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let target = match op {
                    ast::BinaryOperator::And => {
                        self.collect(left)?;
                        return self.collect(right);
                    }
                    ast::BinaryOperator::Eq => &mut self.eq,
                    ast::BinaryOperator::GtEq => &mut self.ge,
                    ast::BinaryOperator::LtEq => &mut self.le,
                    other => return Err(SqlError::Unsupported(format!("operator {other}"))),
                };
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                target.insert(col, (**right).clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.eq.get(col).map(parse_ulid).transpose()
    }

    fn required_ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        self.ulid(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn lower_bound(&self, col: &'static str) -> Result<Ms, SqlError> {
        self.ge.get(col).map(parse_i64).transpose()?.ok_or(SqlError::MissingFilter(col))
    }

    fn upper_bound(&self, col: &'static str) -> Result<Ms, SqlError> {
        self.le.get(col).map(parse_i64).transpose()?.ok_or(SqlError::MissingFilter(col))
    }

    fn status(&self) -> Result<Option<BookingStatus>, SqlError> {
        let Some(expr) = self.eq.get("status") else { return Ok(None) };
        let raw = parse_string(expr)?;
        BookingStatus::parse(&raw)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("unknown status: {raw}")))
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

/// First VALUES row. Multi-row inserts are not supported by any table.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_register_faculty_with_external_id() {
        let sql = format!("INSERT INTO users (id, name, role, external_id) VALUES ('{A}', 'Dr. Rao', 'faculty', 'T-42')");
        match parse_sql(&sql).unwrap() {
            Command::RegisterUser { user } => {
                assert_eq!(user.id, ulid(A));
                assert_eq!(user.external_id(), Some("T-42"));
                assert!(user.role.is_faculty());
            }
            cmd => panic!("expected RegisterUser, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_register_rejects_unknown_role() {
        let sql = format!("INSERT INTO users (id, name, role) VALUES ('{A}', 'x', 'admin')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_booking_team_is_optional() {
        let with_team = format!("INSERT INTO bookings (slot_id, student_id, team_id) VALUES ('{A}', '{B}', 'G-12')");
        let without = format!("INSERT INTO bookings (slot_id, student_id) VALUES ('{A}', '{B}')");
        let null_team = format!("INSERT INTO bookings (slot_id, student_id, team_id) VALUES ('{A}', '{B}', NULL)");

        assert_eq!(
            parse_sql(&with_team).unwrap(),
            Command::InsertBooking { slot_id: ulid(A), student_id: ulid(B), team_id: Some("G-12".into()) }
        );
        for sql in [without, null_team] {
            assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertBooking { team_id: None, .. }));
        }
    }

    #[test]
    fn parse_slot_run() {
        let sql = format!(
            r#"INSERT INTO slot_runs (faculty_id, subject, start, "end", slot_minutes, break_minutes) VALUES ('{A}', 'Web Development', 1000, 2000, 15, 5)"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSlotRun {
                faculty_id: ulid(A),
                subject: "Web Development".into(),
                start: 1000,
                end: 2000,
                slot_minutes: 15,
                break_minutes: 5,
            }
        );
    }

    #[test]
    fn parse_permission_by_subject_or_booking() {
        let by_subject = format!("INSERT INTO rebooking_permissions VALUES ('{A}', '{B}', 'Compiler Design')");
        let by_booking = format!("INSERT INTO rebooking_permissions VALUES ('{A}', '{B}')");
        assert!(matches!(parse_sql(&by_subject).unwrap(), Command::GrantPermission { .. }));
        assert_eq!(
            parse_sql(&by_booking).unwrap(),
            Command::GrantForBooking { faculty_id: ulid(A), booking_id: ulid(B) }
        );
    }

    #[test]
    fn parse_profile_splits_mentors() {
        let sql = format!("INSERT INTO profiles VALUES ('{A}', 'G-3', 'T-1, T-2,,')");
        match parse_sql(&sql).unwrap() {
            Command::PutProfile { profile, .. } => {
                assert_eq!(profile.team_id, "G-3");
                assert_eq!(profile.mentor_external_ids, vec!["T-1", "T-2"]);
            }
            cmd => panic!("expected PutProfile, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_slot_deletes() {
        let one = format!("DELETE FROM slots WHERE id = '{A}' AND faculty_id = '{B}'");
        let range = format!(r#"DELETE FROM slots WHERE faculty_id = '{B}' AND start >= 1000 AND "end" <= 5000"#);
        assert_eq!(
            parse_sql(&one).unwrap(),
            Command::DeleteSlot { id: ulid(A), faculty_id: ulid(B) }
        );
        assert_eq!(
            parse_sql(&range).unwrap(),
            Command::DeleteSlotsBetween { faculty_id: ulid(B), start: 1000, end: 5000 }
        );
        let unscoped = format!("DELETE FROM slots WHERE id = '{A}'");
        assert!(matches!(parse_sql(&unscoped), Err(SqlError::MissingFilter("faculty_id"))));
    }

    #[test]
    fn parse_student_cancel() {
        let sql = format!("DELETE FROM bookings WHERE id = '{A}' AND student_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::StudentCancel { booking_id: ulid(A), student_id: ulid(B) }
        );
    }

    #[test]
    fn parse_booking_selects() {
        let by_student = format!("SELECT * FROM bookings WHERE student_id = '{A}' AND status = 'canceled'");
        assert_eq!(
            parse_sql(&by_student).unwrap(),
            Command::SelectStudentBookings {
                student_id: ulid(A),
                status: Some(BookingStatus::Cancelled),
            }
        );
        let by_faculty = format!("SELECT * FROM bookings WHERE faculty_id = '{A}'");
        assert!(matches!(
            parse_sql(&by_faculty).unwrap(),
            Command::SelectFacultyBookings { status: None, .. }
        ));
        let bad_status = format!("SELECT * FROM bookings WHERE student_id = '{A}' AND status = 'pending'");
        assert!(parse_sql(&bad_status).is_err());
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_views() {
        let blocked = format!("SELECT * FROM blocked_subjects WHERE student_id = '{A}'");
        let roster = format!("SELECT * FROM absent_students WHERE faculty_id = '{A}'");
        let visible = format!("SELECT * FROM visible_slots WHERE student_id = '{A}'");
        assert!(matches!(parse_sql(&blocked).unwrap(), Command::SelectBlockedSubjects { .. }));
        assert!(matches!(parse_sql(&roster).unwrap(), Command::SelectAbsentStudents { .. }));
        assert!(matches!(parse_sql(&visible).unwrap(), Command::SelectVisibleSlots { .. }));
    }

    #[test]
    fn parse_rejects_or_filters() {
        let sql = format!("SELECT * FROM slots WHERE id = '{A}' OR id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
