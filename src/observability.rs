use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: statement latency in seconds, retries included. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

/// Counter: statements re-run after lock contention. Labels: command.
pub const CONTENTION_RETRIES_TOTAL: &str = "slotbook_contention_retries_total";

// ── Booking engine ──────────────────────────────────────────────

/// Counter: booking transitions by result. Labels: op, outcome (`ok` or error kind).
pub const BOOKING_OUTCOMES_TOTAL: &str = "slotbook_booking_outcomes_total";

/// Histogram: time spent inside a booking transition, lock waits included. Labels: op.
pub const BOOKING_DURATION_SECONDS: &str = "slotbook_booking_duration_seconds";

/// Counter: rebooking permissions granted or refreshed.
pub const PERMISSIONS_GRANTED_TOTAL: &str = "slotbook_permissions_granted_total";

/// Counter: row lock waits that hit the lock timeout. Labels: row.
pub const LOCK_TIMEOUTS_TOTAL: &str = "slotbook_lock_timeouts_total";

// ── Resources ───────────────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: events per WAL group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterUser { .. } => "register_user",
        Command::SetExternalId { .. } => "set_external_id",
        Command::SetAccepting { .. } => "set_accepting",
        Command::PutProfile { .. } => "put_profile",
        Command::InsertSlot { .. } => "insert_slot",
        Command::InsertSlotRun { .. } => "insert_slot_run",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::DeleteSlotsBetween { .. } => "delete_slots_between",
        Command::InsertBooking { .. } => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::StudentCancel { .. } => "student_cancel",
        Command::MarkAbsent { .. } => "mark_absent",
        Command::MarkCompleted { .. } => "mark_completed",
        Command::GrantPermission { .. } => "grant_permission",
        Command::GrantForBooking { .. } => "grant_for_booking",
        Command::SelectSlot { .. } => "select_slot",
        Command::SelectFacultySlots { .. } => "select_faculty_slots",
        Command::SelectVisibleSlots { .. } => "select_visible_slots",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectStudentBookings { .. } => "select_student_bookings",
        Command::SelectFacultyBookings { .. } => "select_faculty_bookings",
        Command::SelectBlockedSubjects { .. } => "select_blocked_subjects",
        Command::SelectAbsentStudents { .. } => "select_absent_students",
    }
}
