use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    SlotUnavailable(Ulid),
    SlotInPast(Ulid),
    TeamConflict {
        team_id: String,
        subject: String,
    },
    AbsenceLocked {
        subject: String,
        absent_at: Ms,
    },
    InvalidState {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    CancellationWindowViolation {
        deadline: Ms,
    },
    /// A row lock could not be acquired within the lock timeout.
    Contention(&'static str),
    MissingTeam,
    /// The caller's team id differs from the one on the student's roster.
    TeamMismatch(String),
    /// The slot's faculty is not one of the student's mentors.
    NotMentor(Ulid),
    WrongRole {
        id: Ulid,
        expected: &'static str,
    },
    NotOwner {
        faculty_id: Ulid,
        slot_id: Ulid,
    },
    ExternalIdMissing(Ulid),
    InvalidSlot(&'static str),
    Overlap(Ulid),
    HasHistory(Ulid),
    ConfirmedBookings(usize),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Only lock contention is worth retrying; everything else is a verdict.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Contention(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::SlotInPast(_) => "slot_in_past",
            EngineError::TeamConflict { .. } => "team_conflict",
            EngineError::AbsenceLocked { .. } => "absence_locked",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::CancellationWindowViolation { .. } => "cancellation_window",
            EngineError::Contention(_) => "contention",
            EngineError::MissingTeam => "missing_team",
            EngineError::TeamMismatch(_) => "team_mismatch",
            EngineError::NotMentor(_) => "not_mentor",
            EngineError::WrongRole { .. } => "wrong_role",
            EngineError::NotOwner { .. } => "not_owner",
            EngineError::ExternalIdMissing(_) => "external_id_missing",
            EngineError::InvalidSlot(_) => "invalid_slot",
            EngineError::Overlap(_) => "overlap",
            EngineError::HasHistory(_) => "has_history",
            EngineError::ConfirmedBookings(_) => "confirmed_bookings",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => write!(f, "slot {id} is no longer available"),
            EngineError::SlotInPast(id) => write!(f, "cannot book slot {id}: it has already started"),
            EngineError::TeamConflict { team_id, subject } => {
                write!(f, "team {team_id} already has a booking for {subject}")
            }
            EngineError::AbsenceLocked { subject, .. } => write!(
                f,
                "booking for {subject} is blocked because the student was marked absent; \
                 faculty must allow rebooking first"
            ),
            EngineError::InvalidState { id, status, action } => {
                write!(f, "cannot {action} booking {id}: status is {status}")
            }
            EngineError::CancellationWindowViolation { deadline } => write!(
                f,
                "cancellation is not allowed within 8 hours of the slot (deadline was {deadline})"
            ),
            EngineError::Contention(what) => write!(f, "lock timeout on {what}, retry later"),
            EngineError::MissingTeam => write!(f, "team id is required"),
            EngineError::TeamMismatch(team) => {
                write!(f, "team {team} is not this student's team")
            }
            EngineError::NotMentor(slot_id) => write!(
                f,
                "not authorized to book slot {slot_id}: its faculty is not one of the student's mentors"
            ),
            EngineError::WrongRole { id, expected } => write!(f, "user {id} is not a {expected}"),
            EngineError::NotOwner { faculty_id, slot_id } => {
                write!(f, "faculty {faculty_id} does not own slot {slot_id}")
            }
            EngineError::ExternalIdMissing(id) => {
                write!(f, "faculty {id} has no external id configured")
            }
            EngineError::InvalidSlot(msg) => write!(f, "invalid slot: {msg}"),
            EngineError::Overlap(id) => write!(f, "slot overlaps existing slot {id}"),
            EngineError::HasHistory(id) => {
                write!(f, "cannot delete slot {id}: it has booking history")
            }
            EngineError::ConfirmedBookings(n) => {
                write!(f, "{n} confirmed booking(s) in range; cancel them first")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
