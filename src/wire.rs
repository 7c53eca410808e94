use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{CONTENTION_BACKOFF_BASE_MS, CONTENTION_RETRIES};
use crate::model::*;
use crate::observability::{self, CONTENTION_RETRIES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::profile::{ProfileError, ProfileResolver, StaticProfiles};
use crate::sql::{self, Command};

// ── Result shapes ────────────────────────────────────────────────

/// Row shape of a statement's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    None,
    Slot,
    Booking,
    Permission,
    Blocked,
    Absent,
}

impl RowKind {
    fn of(cmd: &Command) -> Self {
        match cmd {
            Command::SelectSlot { .. }
            | Command::SelectFacultySlots { .. }
            | Command::SelectVisibleSlots { .. } => RowKind::Slot,
            Command::InsertBooking { .. }
            | Command::CancelBooking { .. }
            | Command::StudentCancel { .. }
            | Command::MarkAbsent { .. }
            | Command::MarkCompleted { .. }
            | Command::SelectBooking { .. }
            | Command::SelectStudentBookings { .. }
            | Command::SelectFacultyBookings { .. } => RowKind::Booking,
            Command::GrantPermission { .. } | Command::GrantForBooking { .. } => RowKind::Permission,
            Command::SelectBlockedSubjects { .. } => RowKind::Blocked,
            Command::SelectAbsentStudents { .. } => RowKind::Absent,
            _ => RowKind::None,
        }
    }

    /// Row shape from raw SQL, for describing statements whose parameters
    /// are not bound yet. Keyed on the target table, which every command
    /// names right after `INTO` or `FROM`.
    fn guess(sql: &str) -> Self {
        let lower = sql.to_lowercase();
        let is_select = lower.trim_start().starts_with("select");
        let table = lower
            .split_whitespace()
            .skip_while(|w| *w != "into" && *w != "from")
            .nth(1)
            .and_then(|t| t.split(['(', ';']).next())
            .unwrap_or("");
        match table {
            "blocked_subjects" => RowKind::Blocked,
            "absent_students" => RowKind::Absent,
            "rebooking_permissions" => RowKind::Permission,
            "bookings" | "cancellations" | "absences" | "completions" => RowKind::Booking,
            "slots" | "visible_slots" if is_select => RowKind::Slot,
            _ => RowKind::None,
        }
    }

    fn schema(self, format: Option<&Format>) -> Vec<FieldInfo> {
        let columns: &[(&str, Type)] = match self {
            RowKind::None => &[],
            RowKind::Slot => &[
                ("id", Type::VARCHAR),
                ("faculty_id", Type::VARCHAR),
                ("subject", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("is_available", Type::BOOL),
                ("booking_id", Type::VARCHAR),
                ("booking_status", Type::VARCHAR),
            ],
            RowKind::Booking => &[
                ("id", Type::VARCHAR),
                ("slot_id", Type::VARCHAR),
                ("student_id", Type::VARCHAR),
                ("team_id", Type::VARCHAR),
                ("status", Type::VARCHAR),
                ("faculty_id", Type::VARCHAR),
                ("subject", Type::VARCHAR),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("cancelled_at", Type::INT8),
                ("cancellation_reason", Type::VARCHAR),
                ("absent_at", Type::INT8),
                ("created_at", Type::INT8),
                ("updated_at", Type::INT8),
            ],
            RowKind::Permission => &[
                ("student_id", Type::VARCHAR),
                ("subject", Type::VARCHAR),
                ("teacher_external_id", Type::VARCHAR),
                ("created_at", Type::INT8),
                ("updated_at", Type::INT8),
            ],
            RowKind::Blocked => &[
                ("subject", Type::VARCHAR),
                ("booking_id", Type::VARCHAR),
                ("faculty_id", Type::VARCHAR),
                ("absent_at", Type::INT8),
            ],
            RowKind::Absent => &[
                ("student_id", Type::VARCHAR),
                ("student_name", Type::VARCHAR),
                ("subject", Type::VARCHAR),
                ("booking_id", Type::VARCHAR),
                ("slot_id", Type::VARCHAR),
                ("absent_at", Type::INT8),
                ("start", Type::INT8),
                ("end", Type::INT8),
            ],
        };
        columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(i));
                FieldInfo::new((*name).into(), None, None, ty.clone(), field_format)
            })
            .collect()
    }
}

fn encode_slot(encoder: &mut DataRowEncoder, slot: &SlotInfo) -> PgWireResult<()> {
    encoder.encode_field(&slot.id.to_string())?;
    encoder.encode_field(&slot.faculty_id.to_string())?;
    encoder.encode_field(&slot.subject)?;
    encoder.encode_field(&slot.start)?;
    encoder.encode_field(&slot.end)?;
    encoder.encode_field(&slot.is_available)?;
    encoder.encode_field(&slot.booking_id.map(|id| id.to_string()))?;
    encoder.encode_field(&slot.booking_status.map(|s| s.as_str().to_string()))?;
    Ok(())
}

fn encode_booking(encoder: &mut DataRowEncoder, info: &BookingInfo) -> PgWireResult<()> {
    let b = &info.booking;
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.slot_id.to_string())?;
    encoder.encode_field(&b.student_id.to_string())?;
    encoder.encode_field(&b.team_id)?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&info.faculty_id.to_string())?;
    encoder.encode_field(&info.subject)?;
    encoder.encode_field(&info.start)?;
    encoder.encode_field(&info.end)?;
    encoder.encode_field(&b.cancelled_at)?;
    encoder.encode_field(&b.cancellation_reason)?;
    encoder.encode_field(&b.absent_at)?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&b.updated_at)?;
    Ok(())
}

fn encode_permission(encoder: &mut DataRowEncoder, p: &RebookingPermission) -> PgWireResult<()> {
    encoder.encode_field(&p.student_id.to_string())?;
    encoder.encode_field(&p.subject)?;
    encoder.encode_field(&p.teacher_external_id)?;
    encoder.encode_field(&p.created_at)?;
    encoder.encode_field(&p.updated_at)?;
    Ok(())
}

fn encode_blocked(encoder: &mut DataRowEncoder, b: &BlockedSubject) -> PgWireResult<()> {
    encoder.encode_field(&b.subject)?;
    encoder.encode_field(&b.booking_id.to_string())?;
    encoder.encode_field(&b.faculty_id.to_string())?;
    encoder.encode_field(&b.absent_at)?;
    Ok(())
}

fn encode_absent(encoder: &mut DataRowEncoder, a: &AbsentEntry) -> PgWireResult<()> {
    encoder.encode_field(&a.student_id.to_string())?;
    encoder.encode_field(&a.student_name)?;
    encoder.encode_field(&a.subject)?;
    encoder.encode_field(&a.booking_id.to_string())?;
    encoder.encode_field(&a.slot_id.to_string())?;
    encoder.encode_field(&a.absent_at)?;
    encoder.encode_field(&a.start)?;
    encoder.encode_field(&a.end)?;
    Ok(())
}

fn rows<T>(
    schema: Arc<Vec<FieldInfo>>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Execution ────────────────────────────────────────────────────

/// What a command produced, before it is encoded for the wire.
enum Outcome {
    Tag(&'static str, usize),
    Slots(Vec<SlotInfo>),
    Bookings(Vec<BookingInfo>),
    Permission(RebookingPermission),
    Blocked(Vec<BlockedSubject>),
    Absent(Vec<AbsentEntry>),
}

#[derive(Debug)]
enum ExecError {
    Engine(EngineError),
    Profile(ProfileError),
}

impl From<EngineError> for ExecError {
    fn from(e: EngineError) -> Self {
        ExecError::Engine(e)
    }
}

pub struct SlotbookHandler {
    engine: Arc<Engine>,
    profiles: Arc<StaticProfiles>,
    resolver: Arc<dyn ProfileResolver>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        let profiles = Arc::new(StaticProfiles::new());
        Self {
            engine,
            resolver: profiles.clone(),
            profiles,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    /// Resolve profiles through an external roster instead of the `profiles` table.
    pub fn with_resolver(mut self, resolver: Arc<dyn ProfileResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// A student missing from the roster has no team and no mentors.
    async fn profile_for(&self, student_id: Ulid) -> Result<StudentProfile, ExecError> {
        match self.resolver.resolve(student_id).await {
            Ok(profile) => Ok(profile),
            Err(ProfileError::Unknown(_)) => Ok(StudentProfile::default()),
            Err(e) => Err(ExecError::Profile(e)),
        }
    }

    async fn execute(&self, cmd: &Command) -> Result<Outcome, ExecError> {
        let engine = &self.engine;
        let outcome = match cmd {
            Command::RegisterUser { user } => {
                engine.register_user(user.clone()).await?;
                Outcome::Tag("INSERT", 1)
            }
            Command::SetExternalId { faculty_id, external_id } => {
                engine.set_faculty_external_id(*faculty_id, external_id.clone()).await?;
                Outcome::Tag("INSERT", 1)
            }
            Command::SetAccepting { faculty_id, accepting } => {
                engine.set_faculty_accepting(*faculty_id, *accepting).await?;
                Outcome::Tag("INSERT", 1)
            }
            Command::PutProfile { student_id, profile } => {
                self.profiles.put(*student_id, profile.clone());
                Outcome::Tag("INSERT", 1)
            }
            Command::InsertSlot { id, faculty_id, subject, start, end } => {
                engine
                    .create_slot(*id, *faculty_id, subject, Span { start: *start, end: *end })
                    .await?;
                Outcome::Tag("INSERT", 1)
            }
            Command::InsertSlotRun { faculty_id, subject, start, end, slot_minutes, break_minutes } => {
                let created = engine
                    .bulk_create_slots(
                        *faculty_id,
                        subject,
                        Span { start: *start, end: *end },
                        *slot_minutes,
                        *break_minutes,
                    )
                    .await?;
                Outcome::Tag("INSERT", created.len())
            }
            Command::DeleteSlot { id, faculty_id } => {
                engine.delete_slot(*faculty_id, *id).await?;
                Outcome::Tag("DELETE", 1)
            }
            Command::DeleteSlotsBetween { faculty_id, start, end } => {
                let (deleted, _skipped) = engine
                    .delete_slots_between(*faculty_id, Span { start: *start, end: *end })
                    .await?;
                Outcome::Tag("DELETE", deleted)
            }
            Command::InsertBooking { slot_id, student_id, team_id } => {
                let profile = self.profile_for(*student_id).await?;
                let booking = engine
                    .create_booking_for_profile(*slot_id, *student_id, team_id.as_deref(), &profile)
                    .await?;
                Outcome::Bookings(vec![engine.describe_booking(booking).await?])
            }
            Command::CancelBooking { booking_id, actor_id, reason } => {
                let actor = engine.actor_for(*actor_id).await?;
                let booking = engine.cancel_as(actor, *booking_id, reason).await?;
                Outcome::Bookings(vec![engine.describe_booking(booking).await?])
            }
            Command::StudentCancel { booking_id, student_id } => {
                let actor = engine.actor_for(*student_id).await?;
                if !matches!(actor, crate::engine::Actor::Student(_)) {
                    return Err(EngineError::WrongRole { id: *student_id, expected: "student" }.into());
                }
                let booking = engine.cancel_as(actor, *booking_id, "").await?;
                Outcome::Bookings(vec![engine.describe_booking(booking).await?])
            }
            Command::MarkAbsent { booking_id, faculty_id } => {
                let booking = engine.mark_absent_as_faculty(*faculty_id, *booking_id).await?;
                Outcome::Bookings(vec![engine.describe_booking(booking).await?])
            }
            Command::MarkCompleted { booking_id, faculty_id } => {
                let booking = engine.mark_completed_as_faculty(*faculty_id, *booking_id).await?;
                Outcome::Bookings(vec![engine.describe_booking(booking).await?])
            }
            Command::GrantPermission { faculty_id, student_id, subject } => {
                Outcome::Permission(engine.grant_permission(*faculty_id, *student_id, subject).await?)
            }
            Command::GrantForBooking { faculty_id, booking_id } => Outcome::Permission(
                engine.grant_permission_for_booking(*faculty_id, *booking_id).await?,
            ),
            Command::SelectSlot { id } => Outcome::Slots(vec![engine.get_slot(*id).await?]),
            Command::SelectFacultySlots { faculty_id } => {
                Outcome::Slots(engine.faculty_slots(*faculty_id).await?)
            }
            Command::SelectVisibleSlots { student_id } => {
                let profile = self.profile_for(*student_id).await?;
                Outcome::Slots(engine.visible_slots(*student_id, &profile).await?)
            }
            Command::SelectBooking { id } => Outcome::Bookings(vec![engine.get_booking(*id).await?]),
            Command::SelectStudentBookings { student_id, status } => {
                let bookings = match status {
                    Some(BookingStatus::Confirmed) => engine.current_bookings(*student_id).await?,
                    _ => engine.student_bookings(*student_id, *status).await?,
                };
                Outcome::Bookings(bookings)
            }
            Command::SelectFacultyBookings { faculty_id, status } => {
                Outcome::Bookings(engine.faculty_bookings(*faculty_id, *status).await?)
            }
            Command::SelectBlockedSubjects { student_id } => {
                Outcome::Blocked(engine.blocked_subjects(*student_id).await?)
            }
            Command::SelectAbsentStudents { faculty_id } => {
                Outcome::Absent(engine.absent_roster(*faculty_id).await?)
            }
        };
        Ok(outcome)
    }

    /// Run a command, retrying lock contention with exponential backoff.
    async fn execute_with_retry(&self, cmd: &Command) -> Result<Outcome, ExecError> {
        let mut attempt = 0;
        loop {
            match self.execute(cmd).await {
                Err(ExecError::Engine(e)) if e.is_retryable() && attempt < CONTENTION_RETRIES => {
                    let backoff = Duration::from_millis(CONTENTION_BACKOFF_BASE_MS << attempt);
                    tracing::debug!("{e}; retry {} in {backoff:?}", attempt + 1);
                    metrics::counter!(CONTENTION_RETRIES_TOTAL, "command" => observability::command_label(cmd))
                        .increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn run(&self, cmd: Command, format: Option<&Format>) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_with_retry(&cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        let outcome = result.map_err(exec_err)?;
        let schema = Arc::new(RowKind::of(&cmd).schema(format));
        Ok(match outcome {
            Outcome::Tag(tag, n) => Response::Execution(Tag::new(tag).with_rows(n)),
            Outcome::Slots(items) => rows(schema, &items, encode_slot),
            Outcome::Bookings(items) => rows(schema, &items, encode_booking),
            Outcome::Permission(p) => rows(schema, &[p], encode_permission),
            Outcome::Blocked(items) => rows(schema, &items, encode_blocked),
            Outcome::Absent(items) => rows(schema, &items, encode_absent),
        })
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(RowKind::guess(stmt).schema(column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd, Some(&portal.result_column_format)).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            RowKind::guess(&target.statement).schema(None),
        ))
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
        let kind = RowKind::guess(&target.statement.statement);
        Ok(DescribePortalResponse::new(
            kind.schema(Some(&target.result_column_format)),
        ))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&placeholder, &value);
    }
    sql
}

// ── Auth & factory ───────────────────────────────────────────────

/// One shared password for every login.
#[derive(Debug)]
pub struct SharedPassword(String);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("login attempt by {:?}", login.user());
        Ok(Password::new(None, self.0.as_bytes().to_vec()))
    }
}

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(handler: Arc<SlotbookHandler>, password: String) -> Self {
        Self {
            handler,
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
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
    handler: Arc<SlotbookHandler>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotbookFactory::new(handler, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::SlotUnavailable(_) | EngineError::TeamConflict { .. } | EngineError::Overlap(_) => {
            "23P01"
        }
        EngineError::SlotInPast(_)
        | EngineError::InvalidSlot(_)
        | EngineError::MissingTeam
        | EngineError::TeamMismatch(_) => "22023",
        EngineError::AbsenceLocked { .. }
        | EngineError::InvalidState { .. }
        | EngineError::CancellationWindowViolation { .. }
        | EngineError::ExternalIdMissing(_)
        | EngineError::HasHistory(_)
        | EngineError::ConfirmedBookings(_) => "55000",
        EngineError::WrongRole { .. } | EngineError::NotOwner { .. } | EngineError::NotMentor(_) => {
            "42501"
        }
        EngineError::Contention(_) => "55P03",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn exec_err(e: ExecError) -> PgWireError {
    let (code, message) = match e {
        ExecError::Engine(e) => (sqlstate(&e), e.to_string()),
        ExecError::Profile(e) => ("58000", e.to_string()),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
