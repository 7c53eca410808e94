use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Subjects are compared after trimming surrounding whitespace.
pub fn normalize_subject(value: &str) -> String {
    value.trim().to_string()
}

// ── Users ───────────────────────────────────────────────────────

/// Closed set of roles, checked before any engine operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Student,
    Faculty {
        /// Identifier of this faculty member in the external roster system.
        external_id: Option<String>,
        /// False while the faculty member has marked themselves busy.
        accepting: bool,
    },
}

impl Role {
    pub fn is_student(&self) -> bool {
        matches!(self, Role::Student)
    }

    pub fn is_faculty(&self) -> bool {
        matches!(self, Role::Faculty { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty { .. } => "faculty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
}

impl User {
    pub fn student(id: Ulid, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), role: Role::Student }
    }

    pub fn faculty(id: Ulid, name: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: Role::Faculty { external_id, accepting: true },
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match &self.role {
            Role::Faculty { external_id, .. } => external_id.as_deref(),
            Role::Student => None,
        }
    }
}

/// One absence on a student's record. Derived from Absent bookings and kept on
/// the student row so the absence check never has to touch other slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsenceMark {
    pub booking_id: Ulid,
    pub slot_id: Ulid,
    pub faculty_id: Ulid,
    pub subject: String,
    pub absent_at: Ms,
}

/// A user row. Students additionally carry their absence history.
#[derive(Debug, Clone)]
pub struct UserState {
    pub user: User,
    pub absences: Vec<AbsenceMark>,
}

impl UserState {
    pub fn new(user: User) -> Self {
        Self { user, absences: Vec::new() }
    }

    /// Most recent absence for `(subject, faculty)`, if any.
    pub fn latest_absence(&self, subject: &str, faculty_id: Ulid) -> Option<&AbsenceMark> {
        self.absences
            .iter()
            .filter(|a| a.subject == subject && a.faculty_id == faculty_id)
            .max_by_key(|a| a.absent_at)
    }

    pub fn record_absence(&mut self, mark: AbsenceMark) {
        if let Some(existing) = self.absences.iter_mut().find(|a| a.booking_id == mark.booking_id) {
            *existing = mark;
        } else {
            self.absences.push(mark);
        }
    }
}

// ── Slots & bookings ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub faculty_id: Ulid,
    pub subject: String,
    pub span: Span,
    pub is_available: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
    Absent,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            "absent" => Some(BookingStatus::Absent),
            _ => None,
        }
    }

    /// Statuses a slot keeps as history: the slot cannot be deleted.
    pub fn is_history(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub student_id: Ulid,
    pub team_id: String,
    pub status: BookingStatus,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: String,
    pub absent_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A slot row plus the single booking row it owns (if any).
///
/// The booking row outlives cancellation so it can be reused when the same
/// slot is booked again.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: Slot,
    pub booking: Option<Booking>,
}

impl SlotState {
    pub fn new(slot: Slot) -> Self {
        Self { slot, booking: None }
    }

    pub fn active_booking(&self) -> Option<&Booking> {
        self.booking
            .as_ref()
            .filter(|b| b.status == BookingStatus::Confirmed)
    }

    pub fn has_history(&self) -> bool {
        self.booking.as_ref().is_some_and(|b| b.status.is_history())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebookingPermission {
    pub student_id: Ulid,
    pub subject: String,
    pub teacher_external_id: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// What the external roster service knows about a student.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentProfile {
    pub team_id: String,
    pub mentor_external_ids: Vec<String>,
}

/// WAL record format. One variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    FacultyExternalIdSet {
        id: Ulid,
        external_id: Option<String>,
    },
    FacultyAcceptingSet {
        id: Ulid,
        accepting: bool,
    },
    SlotCreated {
        slot: Slot,
    },
    SlotDeleted {
        id: Ulid,
    },
    /// Carries the full row: a fresh insert or a reused cancelled row.
    BookingConfirmed {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        slot_id: Ulid,
        reason: String,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        slot_id: Ulid,
        at: Ms,
    },
    BookingMarkedAbsent {
        id: Ulid,
        slot_id: Ulid,
        at: Ms,
    },
    AbsenceBackfilled {
        id: Ulid,
        slot_id: Ulid,
        absent_at: Ms,
    },
    PermissionGranted {
        permission: RebookingPermission,
    },
    /// Compaction snapshot of a booking row in any status.
    BookingRestored {
        booking: Booking,
    },
    /// A generated run, committed as one record.
    SlotsCreated {
        slots: Vec<Slot>,
    },
    /// A range delete, committed as one record.
    SlotsDeleted {
        ids: Vec<Ulid>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub faculty_id: Ulid,
    pub subject: String,
    pub start: Ms,
    pub end: Ms,
    pub is_available: bool,
    pub booking_id: Option<Ulid>,
    pub booking_status: Option<BookingStatus>,
}

impl SlotInfo {
    pub fn from_state(rs: &SlotState) -> Self {
        Self {
            id: rs.slot.id,
            faculty_id: rs.slot.faculty_id,
            subject: rs.slot.subject.clone(),
            start: rs.slot.span.start,
            end: rs.slot.span.end,
            is_available: rs.slot.is_available,
            booking_id: rs.booking.as_ref().map(|b| b.id),
            booking_status: rs.booking.as_ref().map(|b| b.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub booking: Booking,
    pub faculty_id: Ulid,
    pub subject: String,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedSubject {
    pub subject: String,
    pub booking_id: Ulid,
    pub faculty_id: Ulid,
    pub absent_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsentEntry {
    pub student_id: Ulid,
    pub student_name: String,
    pub subject: String,
    pub booking_id: Ulid,
    pub slot_id: Ulid,
    pub absent_at: Ms,
    pub start: Ms,
    pub end: Ms,
}
