use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

use super::rules::{absence_time, now_ms, permission_lifts_absence};
use super::{timed_read, Engine, EngineError, SharedSlot};

/// Filter applied to a booking listing.
fn status_matches(booking: &Booking, status: Option<BookingStatus>) -> bool {
    status.is_none_or(|s| booking.status == s)
}

impl Engine {
    async fn read_slots(&self, ids: impl IntoIterator<Item = Ulid>) -> Result<Vec<SlotState>, EngineError> {
        let rows: Vec<SharedSlot> = ids.into_iter().filter_map(|id| self.slots.get(&id)).collect();
        let mut states = Vec::with_capacity(rows.len());
        for row in rows {
            let guard = timed_read(row, self.lock_timeout, "slot").await?;
            states.push(guard.clone());
        }
        Ok(states)
    }

    async fn faculty_external_id(&self, faculty_id: Ulid) -> Result<Option<String>, EngineError> {
        let faculty = self.read_user(faculty_id).await?;
        Ok(faculty.user.external_id().map(str::to_string))
    }

    fn booking_info(rs: &SlotState) -> Option<BookingInfo> {
        let booking = rs.booking.clone()?;
        Some(BookingInfo {
            booking,
            faculty_id: rs.slot.faculty_id,
            subject: rs.slot.subject.clone(),
            start: rs.slot.span.start,
            end: rs.slot.span.end,
        })
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<SlotInfo, EngineError> {
        let guard = self.slots.read_slot(id, self.lock_timeout).await?;
        Ok(SlotInfo::from_state(&guard))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<BookingInfo, EngineError> {
        let slot_id = self
            .slots
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = self.slots.read_slot(slot_id, self.lock_timeout).await?;
        Self::booking_info(&guard)
            .filter(|info| info.booking.id == booking_id)
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Attach slot details to a booking returned by a transition. Only the
    /// slot's immutable fields are read.
    pub async fn describe_booking(&self, booking: Booking) -> Result<BookingInfo, EngineError> {
        let slot = self.slots.read_slot(booking.slot_id, self.lock_timeout).await?;
        Ok(BookingInfo {
            faculty_id: slot.slot.faculty_id,
            subject: slot.slot.subject.clone(),
            start: slot.slot.span.start,
            end: slot.slot.span.end,
            booking,
        })
    }

    /// Subjects the student cannot currently book because of an absence that
    /// no valid permission has lifted. One entry per subject, carrying the
    /// most recent unresolved absence.
    pub async fn blocked_subjects(&self, student_id: Ulid) -> Result<Vec<BlockedSubject>, EngineError> {
        let absences = {
            let student = self.read_user(student_id).await?;
            if !student.user.role.is_student() {
                return Err(EngineError::WrongRole { id: student_id, expected: "student" });
            }
            student.absences.clone()
        };

        let mut external_ids: HashMap<Ulid, Option<String>> = HashMap::new();
        let mut blocked: HashMap<String, BlockedSubject> = HashMap::new();
        for mark in absences {
            if !external_ids.contains_key(&mark.faculty_id) {
                let ext = match self.faculty_external_id(mark.faculty_id).await {
                    Ok(ext) => ext,
                    // A deleted faculty can never grant; the absence stays.
                    Err(EngineError::NotFound(_)) => None,
                    Err(e) => return Err(e),
                };
                external_ids.insert(mark.faculty_id, ext);
            }
            let ext = external_ids.get(&mark.faculty_id).cloned().flatten();
            let permission = self.permissions.get(student_id, &mark.subject);
            if permission_lifts_absence(permission.as_ref(), ext.as_deref(), mark.absent_at) {
                continue;
            }
            let newer = blocked
                .get(&mark.subject)
                .is_none_or(|existing| mark.absent_at > existing.absent_at);
            if newer {
                blocked.insert(
                    mark.subject.clone(),
                    BlockedSubject {
                        subject: mark.subject,
                        booking_id: mark.booking_id,
                        faculty_id: mark.faculty_id,
                        absent_at: mark.absent_at,
                    },
                );
            }
        }

        let mut out: Vec<BlockedSubject> = blocked.into_values().collect();
        out.sort_by(|a, b| b.absent_at.cmp(&a.absent_at));
        Ok(out)
    }

    /// Absent bookings on the faculty's own slots that are still unresolved.
    pub async fn absent_roster(&self, faculty_id: Ulid) -> Result<Vec<AbsentEntry>, EngineError> {
        // Read and released before any slot lock.
        let external_id = {
            let faculty = self.read_faculty(faculty_id).await?;
            faculty.user.external_id().map(str::to_string)
        };

        let ids = self.slots.faculty_slots(&faculty_id).into_iter().map(|(id, _)| id);
        let mut absent = Vec::new();
        for rs in self.read_slots(ids).await? {
            let Some(booking) = rs.booking.as_ref() else { continue };
            if booking.status != BookingStatus::Absent {
                continue;
            }
            let absent_at = absence_time(booking);
            let permission = self.permissions.get(booking.student_id, &rs.slot.subject);
            if permission_lifts_absence(permission.as_ref(), external_id.as_deref(), absent_at) {
                continue;
            }
            absent.push((booking.clone(), rs.slot.clone(), absent_at));
        }

        let mut roster = Vec::with_capacity(absent.len());
        for (booking, slot, absent_at) in absent {
            let student_name = match self.read_user(booking.student_id).await {
                Ok(student) => student.user.name.clone(),
                Err(EngineError::NotFound(_)) => String::new(),
                Err(e) => return Err(e),
            };
            roster.push(AbsentEntry {
                student_id: booking.student_id,
                student_name,
                subject: slot.subject,
                booking_id: booking.id,
                slot_id: slot.id,
                absent_at,
                start: slot.span.start,
                end: slot.span.end,
            });
        }
        roster.sort_by(|a, b| b.absent_at.cmp(&a.absent_at));
        Ok(roster)
    }

    /// Open future slots offered by the student's mentors, restricted to
    /// faculty currently accepting bookings.
    pub async fn visible_slots(
        &self,
        student_id: Ulid,
        profile: &StudentProfile,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        {
            let student = self.read_user(student_id).await?;
            if !student.user.role.is_student() {
                return Err(EngineError::WrongRole { id: student_id, expected: "student" });
            }
        }
        if profile.mentor_external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mentors: HashSet<&str> = profile.mentor_external_ids.iter().map(String::as_str).collect();

        let user_rows: Vec<_> = self.users.iter().map(|e| e.value().clone()).collect();
        let mut faculty_ids = Vec::new();
        for row in user_rows {
            let user = timed_read(row, self.lock_timeout, "user").await?;
            if let Role::Faculty { external_id: Some(ext), accepting: true } = &user.user.role
                && mentors.contains(ext.as_str())
            {
                faculty_ids.push(user.user.id);
            }
        }

        let now = now_ms();
        let ids: Vec<Ulid> = faculty_ids
            .iter()
            .flat_map(|f| self.slots.faculty_slots(f))
            .filter(|(_, span)| span.start > now)
            .map(|(id, _)| id)
            .collect();
        let mut out: Vec<SlotInfo> = self
            .read_slots(ids)
            .await?
            .iter()
            .filter(|rs| rs.slot.is_available && rs.active_booking().is_none())
            .map(SlotInfo::from_state)
            .collect();
        out.sort_by_key(|s| (s.start, s.id));
        Ok(out)
    }

    /// Every booking row the student holds, newest slot first.
    pub async fn student_bookings(
        &self,
        student_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let mut out = Vec::new();
        for rs in self.read_slots(self.slots.booked_slot_ids()).await? {
            if let Some(info) = Self::booking_info(&rs)
                && info.booking.student_id == student_id
                && status_matches(&info.booking, status)
            {
                out.push(info);
            }
        }
        out.sort_by(|a, b| b.start.cmp(&a.start));
        Ok(out)
    }

    /// The student's confirmed bookings, soonest first.
    pub async fn current_bookings(&self, student_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let mut out = self
            .student_bookings(student_id, Some(BookingStatus::Confirmed))
            .await?;
        out.sort_by_key(|b| b.start);
        Ok(out)
    }

    pub async fn faculty_bookings(
        &self,
        faculty_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let ids = self.slots.faculty_slots(&faculty_id).into_iter().map(|(id, _)| id);
        let mut out: Vec<BookingInfo> = self
            .read_slots(ids)
            .await?
            .iter()
            .filter_map(Self::booking_info)
            .filter(|info| status_matches(&info.booking, status))
            .collect();
        out.sort_by(|a, b| b.start.cmp(&a.start));
        Ok(out)
    }

    pub async fn faculty_slots(&self, faculty_id: Ulid) -> Result<Vec<SlotInfo>, EngineError> {
        let ids = self.slots.faculty_slots(&faculty_id).into_iter().map(|(id, _)| id);
        let mut out: Vec<SlotInfo> = self
            .read_slots(ids)
            .await?
            .iter()
            .map(SlotInfo::from_state)
            .collect();
        out.sort_by_key(|s| (s.start, s.id));
        Ok(out)
    }
}
