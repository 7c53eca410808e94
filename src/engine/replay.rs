use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::booking::{
    absence_mark, apply_backfill, apply_cancelled, apply_completed, apply_confirmed, apply_absent,
};
use super::{Engine, TeamKey, TeamLedger};

/// Plain-map state rebuilt from the WAL before the engine goes live.
///
/// Events are applied without locks or validation; they were validated when
/// first written. Unknown ids are skipped so a truncated log still loads.
#[derive(Default)]
pub(super) struct ReplayState {
    pub users: HashMap<Ulid, UserState>,
    pub slots: HashMap<Ulid, SlotState>,
    pub permissions: HashMap<(Ulid, String), RebookingPermission>,
    pub teams: HashMap<TeamKey, TeamLedger>,
}

impl ReplayState {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::UserRegistered { user } => {
                self.users.insert(user.id, UserState::new(user.clone()));
            }
            Event::FacultyExternalIdSet { id, external_id } => {
                if let Some(Role::Faculty { external_id: current, .. }) =
                    self.users.get_mut(id).map(|u| &mut u.user.role)
                {
                    *current = external_id.clone();
                }
            }
            Event::FacultyAcceptingSet { id, accepting } => {
                if let Some(Role::Faculty { accepting: current, .. }) =
                    self.users.get_mut(id).map(|u| &mut u.user.role)
                {
                    *current = *accepting;
                }
            }
            Event::SlotCreated { slot } => {
                self.slots.insert(slot.id, SlotState::new(slot.clone()));
            }
            Event::SlotDeleted { id } => {
                self.slots.remove(id);
            }
            Event::SlotsCreated { slots } => {
                for slot in slots {
                    self.slots.insert(slot.id, SlotState::new(slot.clone()));
                }
            }
            Event::SlotsDeleted { ids } => {
                for id in ids {
                    self.slots.remove(id);
                }
            }
            Event::BookingConfirmed { booking } => {
                let Some(rs) = self.slots.get_mut(&booking.slot_id) else { return };
                apply_confirmed(rs, booking.clone());
                let key = (booking.team_id.clone(), rs.slot.subject.clone());
                self.teams.entry(key).or_default().confirmed.insert(booking.id);
            }
            Event::BookingCancelled { id, slot_id, reason, at } => {
                self.release_team(*slot_id, *id);
                if let Some(rs) = self.slots.get_mut(slot_id) {
                    apply_cancelled(rs, reason, *at);
                }
            }
            Event::BookingCompleted { id, slot_id, at } => {
                self.release_team(*slot_id, *id);
                if let Some(rs) = self.slots.get_mut(slot_id) {
                    apply_completed(rs, *at);
                }
            }
            Event::BookingMarkedAbsent { id, slot_id, at } => {
                self.release_team(*slot_id, *id);
                if let Some(rs) = self.slots.get_mut(slot_id) {
                    apply_absent(rs, *at);
                }
                self.record_absence(*slot_id);
            }
            Event::AbsenceBackfilled { slot_id, absent_at, .. } => {
                if let Some(rs) = self.slots.get_mut(slot_id) {
                    apply_backfill(rs, *absent_at);
                }
                self.record_absence(*slot_id);
            }
            Event::PermissionGranted { permission } => {
                self.permissions.insert(
                    (permission.student_id, permission.subject.clone()),
                    permission.clone(),
                );
            }
            Event::BookingRestored { booking } => {
                let Some(rs) = self.slots.get_mut(&booking.slot_id) else { return };
                // Availability was captured on the slot itself.
                rs.booking = Some(booking.clone());
                if booking.status == BookingStatus::Confirmed {
                    let key = (booking.team_id.clone(), rs.slot.subject.clone());
                    self.teams.entry(key).or_default().confirmed.insert(booking.id);
                }
                self.record_absence(booking.slot_id);
            }
        }
    }

    fn release_team(&mut self, slot_id: Ulid, booking_id: Ulid) {
        let Some(rs) = self.slots.get(&slot_id) else { return };
        let Some(booking) = rs.booking.as_ref().filter(|b| b.id == booking_id) else { return };
        let key = (booking.team_id.clone(), rs.slot.subject.clone());
        if let Some(ledger) = self.teams.get_mut(&key) {
            ledger.confirmed.remove(&booking_id);
        }
    }

    fn record_absence(&mut self, slot_id: Ulid) {
        let Some(rs) = self.slots.get(&slot_id) else { return };
        let (Some(mark), Some(booking)) = (absence_mark(rs), rs.booking.as_ref()) else { return };
        if let Some(student) = self.users.get_mut(&booking.student_id) {
            student.record_absence(mark);
        }
    }

    /// Latest booking or permission stamp in the log.
    fn latest_ms(&self) -> Ms {
        let bookings = self.slots.values().filter_map(|rs| rs.booking.as_ref()).flat_map(|b| {
            [Some(b.created_at), Some(b.updated_at), b.cancelled_at, b.absent_at]
                .into_iter()
                .flatten()
        });
        let permissions = self.permissions.values().map(|p| p.updated_at);
        bookings.chain(permissions).max().unwrap_or(0)
    }

    /// Move the rebuilt rows into a freshly constructed engine.
    pub fn install(self, engine: &Engine) {
        engine.clock.observe(self.latest_ms());
        for (id, user) in self.users {
            engine.users.insert(id, Arc::new(RwLock::new(user)));
        }
        for (_, slot) in self.slots {
            engine.slots.insert(slot);
        }
        for (_, permission) in self.permissions {
            engine.permissions.put(permission);
        }
        for (key, ledger) in self.teams {
            if !ledger.confirmed.is_empty() {
                engine.teams.insert(key, Arc::new(RwLock::new(ledger)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (ReplayState, Ulid, Ulid, Ulid) {
        let mut state = ReplayState::default();
        let faculty = Ulid::new();
        let student = Ulid::new();
        let slot_id = Ulid::new();
        state.apply(&Event::UserRegistered {
            user: User::faculty(faculty, "Dr. Rao", Some("T-9".into())),
        });
        state.apply(&Event::UserRegistered { user: User::student(student, "Asha") });
        state.apply(&Event::SlotCreated {
            slot: Slot {
                id: slot_id,
                faculty_id: faculty,
                subject: "Web Development".into(),
                span: Span::new(1_000, 2_000),
                is_available: true,
                created_at: 1,
            },
        });
        (state, faculty, student, slot_id)
    }

    fn booking(id: Ulid, slot_id: Ulid, student_id: Ulid) -> Booking {
        Booking {
            id,
            slot_id,
            student_id,
            team_id: "G-1".into(),
            status: BookingStatus::Confirmed,
            cancelled_at: None,
            cancellation_reason: String::new(),
            absent_at: None,
            created_at: 10,
            updated_at: 10,
        }
    }

    #[test]
    fn absent_event_lands_on_student_and_frees_team() {
        let (mut state, faculty, student, slot_id) = fixture();
        let id = Ulid::new();
        state.apply(&Event::BookingConfirmed { booking: booking(id, slot_id, student) });
        let key = ("G-1".to_string(), "Web Development".to_string());
        assert!(state.teams[&key].confirmed.contains(&id));
        assert!(!state.slots[&slot_id].slot.is_available);

        state.apply(&Event::BookingMarkedAbsent { id, slot_id, at: 500 });
        assert!(state.teams[&key].confirmed.is_empty());
        assert!(!state.slots[&slot_id].slot.is_available);
        let mark = state.users[&student].latest_absence("Web Development", faculty).unwrap();
        assert_eq!(mark.absent_at, 500);
    }

    #[test]
    fn cancel_then_restore_keeps_availability_from_slot() {
        let (mut state, _, student, slot_id) = fixture();
        let id = Ulid::new();
        state.apply(&Event::BookingConfirmed { booking: booking(id, slot_id, student) });
        state.apply(&Event::BookingCancelled {
            id,
            slot_id,
            reason: "clash".into(),
            at: 20,
        });
        let rs = &state.slots[&slot_id];
        assert!(rs.slot.is_available);
        assert_eq!(rs.booking.as_ref().unwrap().cancellation_reason, "clash");

        let mut restored = booking(id, slot_id, student);
        restored.status = BookingStatus::Cancelled;
        state.apply(&Event::BookingRestored { booking: restored });
        assert!(state.slots[&slot_id].slot.is_available);
    }

    #[test]
    fn slot_batches_apply_as_a_unit() {
        let (mut state, faculty, _, kept) = fixture();
        let run: Vec<Slot> = (0..3)
            .map(|i| Slot {
                id: Ulid::new(),
                faculty_id: faculty,
                subject: "Web Development".into(),
                span: Span::new(10_000 + i * 1_000, 10_500 + i * 1_000),
                is_available: true,
                created_at: 2,
            })
            .collect();
        let ids: Vec<Ulid> = run.iter().map(|s| s.id).collect();

        state.apply(&Event::SlotsCreated { slots: run });
        assert_eq!(state.slots.len(), 4);
        assert!(ids.iter().all(|id| state.slots[id].slot.is_available));

        state.apply(&Event::SlotsDeleted { ids: vec![ids[0], ids[2], kept] });
        assert_eq!(state.slots.keys().collect::<Vec<_>>(), vec![&ids[1]]);
    }

    #[test]
    fn latest_stamp_covers_bookings_and_permissions() {
        let (mut state, _, student, slot_id) = fixture();
        let id = Ulid::new();
        state.apply(&Event::BookingConfirmed { booking: booking(id, slot_id, student) });
        state.apply(&Event::BookingMarkedAbsent { id, slot_id, at: 700 });
        assert_eq!(state.latest_ms(), 700);

        state.apply(&Event::PermissionGranted {
            permission: RebookingPermission {
                student_id: student,
                subject: "Web Development".into(),
                teacher_external_id: "T-9".into(),
                created_at: 900,
                updated_at: 900,
            },
        });
        assert_eq!(state.latest_ms(), 900);
    }

    #[test]
    fn events_for_unknown_rows_are_skipped() {
        let mut state = ReplayState::default();
        state.apply(&Event::BookingCompleted {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            at: 5,
        });
        state.apply(&Event::FacultyAcceptingSet { id: Ulid::new(), accepting: false });
        assert!(state.slots.is_empty());
        assert!(state.users.is_empty());
    }
}
