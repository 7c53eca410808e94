use std::time::Instant;

use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability::{BOOKING_DURATION_SECONDS, BOOKING_OUTCOMES_TOTAL};

use super::rules::{
    absence_time, check_cancellation_window, permission_lifts_absence, validate_subject,
    validate_team,
};
use super::{Engine, EngineError, SlotStore};

/// Who asked for a transition, as established by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Trusted caller; no ownership checks.
    System,
    /// Must be the booking's student. Cancellation honours the 8h window.
    Student(Ulid),
    /// Must own the booking's slot. Cancellation bypasses the window.
    Faculty(Ulid),
}

impl Actor {
    fn authorize(&self, rs: &SlotState, booking: &Booking) -> Result<(), EngineError> {
        match *self {
            Actor::System => Ok(()),
            Actor::Student(id) if id == booking.student_id => Ok(()),
            // Other students' bookings are invisible to them.
            Actor::Student(_) => Err(EngineError::NotFound(booking.id)),
            Actor::Faculty(id) if id == rs.slot.faculty_id => Ok(()),
            Actor::Faculty(id) => Err(EngineError::NotOwner {
                faculty_id: id,
                slot_id: rs.slot.id,
            }),
        }
    }
}

// ── Row transitions (shared by live operations and WAL replay) ──────

pub(super) fn apply_confirmed(rs: &mut SlotState, booking: Booking) {
    rs.booking = Some(booking);
    SlotStore::set_availability(rs, false);
}

pub(super) fn apply_cancelled(rs: &mut SlotState, reason: &str, at: Ms) {
    if let Some(b) = rs.booking.as_mut() {
        b.status = BookingStatus::Cancelled;
        b.cancelled_at = Some(at);
        b.cancellation_reason = reason.to_string();
        b.updated_at = at;
    }
    SlotStore::set_availability(rs, true);
}

/// The slot stays unavailable: a completed session is history, not a vacancy.
pub(super) fn apply_completed(rs: &mut SlotState, at: Ms) {
    if let Some(b) = rs.booking.as_mut() {
        b.status = BookingStatus::Completed;
        b.updated_at = at;
    }
}

/// The slot stays unavailable: an absence is a record, not a cancellation.
pub(super) fn apply_absent(rs: &mut SlotState, at: Ms) {
    if let Some(b) = rs.booking.as_mut() {
        b.status = BookingStatus::Absent;
        b.absent_at = Some(at);
        b.updated_at = at;
    }
}

pub(super) fn apply_backfill(rs: &mut SlotState, absent_at: Ms) {
    if let Some(b) = rs.booking.as_mut() {
        b.absent_at = Some(absent_at);
    }
}

/// The student-side absence record for an Absent booking on this slot.
pub(super) fn absence_mark(rs: &SlotState) -> Option<AbsenceMark> {
    let booking = rs.booking.as_ref()?;
    if booking.status != BookingStatus::Absent {
        return None;
    }
    Some(AbsenceMark {
        booking_id: booking.id,
        slot_id: rs.slot.id,
        faculty_id: rs.slot.faculty_id,
        subject: rs.slot.subject.clone(),
        absent_at: absence_time(booking),
    })
}

fn record_outcome(op: &'static str, started: Instant, result: &Result<Booking, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(BOOKING_OUTCOMES_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}

impl Engine {
    /// The actor a registered user acts as.
    pub async fn actor_for(&self, user_id: Ulid) -> Result<Actor, EngineError> {
        let user = self.read_user(user_id).await?;
        Ok(match user.user.role {
            Role::Student => Actor::Student(user_id),
            Role::Faculty { .. } => Actor::Faculty(user_id),
        })
    }

    /// Book `slot_id` for `student_id` on behalf of team `team_id`.
    ///
    /// Locks Slot → Student → Faculty (read) → Team ledger, then checks, in
    /// order: slot availability, slot start, team/subject exclusivity and the
    /// student's latest absence with this faculty in this subject. A cancelled
    /// booking row already on the slot is reused instead of inserting a new one.
    pub async fn create_booking(
        &self,
        slot_id: Ulid,
        student_id: Ulid,
        team_id: &str,
    ) -> Result<Booking, EngineError> {
        self.book(slot_id, student_id, team_id, None).await
    }

    /// Book for a student as described by their roster `profile`. A team id
    /// supplied by the caller must equal the roster's, and the slot's faculty
    /// must be one of the student's mentors.
    pub async fn create_booking_for_profile(
        &self,
        slot_id: Ulid,
        student_id: Ulid,
        team_id: Option<&str>,
        profile: &StudentProfile,
    ) -> Result<Booking, EngineError> {
        let roster_team = profile.team_id.trim();
        if let Some(given) = team_id.map(str::trim) {
            if given != roster_team {
                return Err(EngineError::TeamMismatch(given.to_string()));
            }
        }
        self.book(slot_id, student_id, roster_team, Some(profile.mentor_external_ids.as_slice()))
            .await
    }

    async fn book(
        &self,
        slot_id: Ulid,
        student_id: Ulid,
        team_id: &str,
        mentors: Option<&[String]>,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = {
            let _gate = self.enter().await;
            self.create_booking_locked(slot_id, student_id, team_id, mentors).await
        };
        record_outcome("create", started, &result);
        match &result {
            Ok(b) => tracing::info!(
                booking = %b.id, slot = %slot_id, student = %student_id, team = %b.team_id,
                "booking confirmed"
            ),
            Err(e) => tracing::debug!(slot = %slot_id, student = %student_id, "booking rejected: {e}"),
        }
        result
    }

    async fn create_booking_locked(
        &self,
        slot_id: Ulid,
        student_id: Ulid,
        team_id: &str,
        mentors: Option<&[String]>,
    ) -> Result<Booking, EngineError> {
        let team_id = validate_team(team_id)?;

        let mut slot = self.slots.lock_slot(slot_id, self.lock_timeout).await?;
        let student = self.lock_student(student_id).await?;
        let now = self.tick();

        if !slot.slot.is_available || slot.active_booking().is_some() {
            return Err(EngineError::SlotUnavailable(slot_id));
        }
        if slot.slot.span.start <= now {
            return Err(EngineError::SlotInPast(slot_id));
        }

        let subject = slot.slot.subject.clone();
        let faculty_id = slot.slot.faculty_id;
        let faculty_external_id = {
            let faculty = self.read_user(faculty_id).await?;
            faculty.user.external_id().map(str::to_string)
        };
        if let Some(mentors) = mentors {
            let ext = faculty_external_id.as_deref();
            if !mentors.iter().any(|m| Some(m.as_str()) == ext) {
                return Err(EngineError::NotMentor(slot_id));
            }
        }

        let key = (team_id.clone(), subject.clone());
        let mut team = self.lock_team(&key).await?;
        if !team.confirmed.is_empty() {
            return Err(EngineError::TeamConflict { team_id, subject });
        }

        if let Some(absence) = student.latest_absence(&subject, faculty_id) {
            let permission = self.permissions.get(student_id, &subject);
            if !permission_lifts_absence(
                permission.as_ref(),
                faculty_external_id.as_deref(),
                absence.absent_at,
            ) {
                return Err(EngineError::AbsenceLocked {
                    subject,
                    absent_at: absence.absent_at,
                });
            }
        }

        let booking = match &slot.booking {
            Some(previous) if previous.status == BookingStatus::Cancelled => Booking {
                student_id,
                team_id,
                status: BookingStatus::Confirmed,
                cancelled_at: None,
                cancellation_reason: String::new(),
                updated_at: now,
                ..previous.clone()
            },
            // Completed/Absent rows are history; the slot is not bookable again.
            Some(_) => return Err(EngineError::SlotUnavailable(slot_id)),
            None => Booking {
                id: Ulid::new(),
                slot_id,
                student_id,
                team_id,
                status: BookingStatus::Confirmed,
                cancelled_at: None,
                cancellation_reason: String::new(),
                absent_at: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.wal_append(&Event::BookingConfirmed { booking: booking.clone() })
            .await?;
        apply_confirmed(&mut slot, booking.clone());
        team.confirmed.insert(booking.id);
        self.slots.map_booking(booking.id, slot_id);
        Ok(booking)
    }

    /// Cancel a confirmed booking and free its slot. Without `force` the
    /// request must arrive before `start - 8h`.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: &str,
        force: bool,
    ) -> Result<Booking, EngineError> {
        self.cancel(Actor::System, booking_id, reason, force).await
    }

    /// Cancel on behalf of `actor`; faculty cancellations are always forced.
    pub async fn cancel_as(&self, actor: Actor, booking_id: Ulid, reason: &str) -> Result<Booking, EngineError> {
        let force = matches!(actor, Actor::Faculty(_));
        self.cancel(actor, booking_id, reason, force).await
    }

    pub async fn cancel_as_faculty(
        &self,
        faculty_id: Ulid,
        booking_id: Ulid,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        self.cancel_as(Actor::Faculty(faculty_id), booking_id, reason).await
    }

    async fn cancel(
        &self,
        actor: Actor,
        booking_id: Ulid,
        reason: &str,
        force: bool,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = {
            let _gate = self.enter().await;
            self.cancel_locked(actor, booking_id, reason, force).await
        };
        record_outcome("cancel", started, &result);
        if result.is_ok() {
            tracing::info!(booking = %booking_id, force, "booking cancelled");
        }
        result
    }

    async fn cancel_locked(
        &self,
        actor: Actor,
        booking_id: Ulid,
        reason: &str,
        force: bool,
    ) -> Result<Booking, EngineError> {
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut slot = self.slots.lock_booking_slot(booking_id, self.lock_timeout).await?;
        let booking = slot.booking.clone().ok_or(EngineError::NotFound(booking_id))?;
        actor.authorize(&slot, &booking)?;

        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
                action: "cancel",
            });
        }
        let now = self.tick();
        check_cancellation_window(slot.slot.span.start, now, force)?;

        let key = (booking.team_id.clone(), slot.slot.subject.clone());
        let mut team = self.lock_team(&key).await?;

        self.wal_append(&Event::BookingCancelled {
            id: booking_id,
            slot_id: slot.slot.id,
            reason: reason.to_string(),
            at: now,
        })
        .await?;
        apply_cancelled(&mut slot, reason, now);
        team.confirmed.remove(&booking_id);
        slot.booking.clone().ok_or(EngineError::NotFound(booking_id))
    }

    /// Mark the student absent. Idempotent: a second call only backfills a
    /// missing `absent_at`. The slot is not freed.
    pub async fn mark_absent(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.mark_absent_as(Actor::System, booking_id).await
    }

    pub async fn mark_absent_as(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = {
            let _gate = self.enter().await;
            self.mark_absent_locked(actor, booking_id).await
        };
        record_outcome("mark_absent", started, &result);
        if let Ok(b) = &result {
            tracing::info!(booking = %booking_id, student = %b.student_id, "booking marked absent");
        }
        result
    }

    pub async fn mark_absent_as_faculty(&self, faculty_id: Ulid, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.mark_absent_as(Actor::Faculty(faculty_id), booking_id).await
    }

    async fn mark_absent_locked(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut slot = self.slots.lock_booking_slot(booking_id, self.lock_timeout).await?;
        let booking = slot.booking.clone().ok_or(EngineError::NotFound(booking_id))?;
        actor.authorize(&slot, &booking)?;

        if booking.status == BookingStatus::Absent {
            if booking.absent_at.is_none() {
                let absent_at = booking.updated_at;
                self.wal_append(&Event::AbsenceBackfilled {
                    id: booking_id,
                    slot_id: slot.slot.id,
                    absent_at,
                })
                .await?;
                apply_backfill(&mut slot, absent_at);
            }
            return slot.booking.clone().ok_or(EngineError::NotFound(booking_id));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
                action: "mark absent",
            });
        }

        let mut student = self.lock_user(booking.student_id).await?;
        let key = (booking.team_id.clone(), slot.slot.subject.clone());
        let mut team = self.lock_team(&key).await?;
        let now = self.tick();

        self.wal_append(&Event::BookingMarkedAbsent {
            id: booking_id,
            slot_id: slot.slot.id,
            at: now,
        })
        .await?;
        apply_absent(&mut slot, now);
        if let Some(mark) = absence_mark(&slot) {
            student.record_absence(mark);
        }
        team.confirmed.remove(&booking_id);
        slot.booking.clone().ok_or(EngineError::NotFound(booking_id))
    }

    /// Mark the session held. Idempotent; the slot stays unavailable.
    pub async fn mark_completed(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.mark_completed_as(Actor::System, booking_id).await
    }

    pub async fn mark_completed_as(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = {
            let _gate = self.enter().await;
            self.mark_completed_locked(actor, booking_id).await
        };
        record_outcome("mark_completed", started, &result);
        if result.is_ok() {
            tracing::info!(booking = %booking_id, "booking completed");
        }
        result
    }

    pub async fn mark_completed_as_faculty(&self, faculty_id: Ulid, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.mark_completed_as(Actor::Faculty(faculty_id), booking_id).await
    }

    async fn mark_completed_locked(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut slot = self.slots.lock_booking_slot(booking_id, self.lock_timeout).await?;
        let booking = slot.booking.clone().ok_or(EngineError::NotFound(booking_id))?;
        actor.authorize(&slot, &booking)?;

        match booking.status {
            BookingStatus::Completed => return Ok(booking),
            BookingStatus::Confirmed => {}
            status => {
                return Err(EngineError::InvalidState {
                    id: booking_id,
                    status,
                    action: "complete",
                });
            }
        }

        let key = (booking.team_id.clone(), slot.slot.subject.clone());
        let mut team = self.lock_team(&key).await?;
        let now = self.tick();

        self.wal_append(&Event::BookingCompleted {
            id: booking_id,
            slot_id: slot.slot.id,
            at: now,
        })
        .await?;
        apply_completed(&mut slot, now);
        team.confirmed.remove(&booking_id);
        slot.booking.clone().ok_or(EngineError::NotFound(booking_id))
    }

    /// Allow `student_id` to book `subject` again despite an absence. Upserts
    /// the single permission row for (student, subject), stamping it with the
    /// faculty's external id and the current time.
    pub async fn grant_permission(
        &self,
        faculty_id: Ulid,
        student_id: Ulid,
        subject: &str,
    ) -> Result<RebookingPermission, EngineError> {
        let subject = validate_subject(subject)?;
        let _gate = self.enter().await;
        self.grant_locked(faculty_id, student_id, subject).await
    }

    async fn grant_locked(
        &self,
        faculty_id: Ulid,
        student_id: Ulid,
        subject: String,
    ) -> Result<RebookingPermission, EngineError> {
        let _student = self.lock_student(student_id).await?;
        let faculty = self.read_faculty(faculty_id).await?;
        let external_id = faculty
            .user
            .external_id()
            .ok_or(EngineError::ExternalIdMissing(faculty_id))?
            .to_string();

        let permission = self
            .permissions
            .prepare_grant(student_id, &subject, &external_id, self.tick());
        self.wal_append(&Event::PermissionGranted { permission: permission.clone() })
            .await?;
        self.permissions.put(permission.clone());

        metrics::counter!(crate::observability::PERMISSIONS_GRANTED_TOTAL).increment(1);
        tracing::info!(student = %student_id, faculty = %faculty_id, subject = %subject, "rebooking allowed");
        Ok(permission)
    }

    /// Grant from an Absent booking on one of the faculty's own slots.
    pub async fn grant_permission_for_booking(
        &self,
        faculty_id: Ulid,
        booking_id: Ulid,
    ) -> Result<RebookingPermission, EngineError> {
        let _gate = self.enter().await;
        let slot_id = self
            .slots
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        // Held across the grant so the booking cannot change underneath it.
        let slot = self.slots.read_slot(slot_id, self.lock_timeout).await?;
        let booking = slot
            .booking
            .as_ref()
            .filter(|b| b.id == booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Actor::Faculty(faculty_id).authorize(&slot, booking)?;
        if booking.status != BookingStatus::Absent {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
                action: "allow rebooking for",
            });
        }
        self.grant_locked(faculty_id, booking.student_id, slot.slot.subject.clone())
            .await
    }
}
