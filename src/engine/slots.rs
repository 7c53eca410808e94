use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::{timed_read, timed_write, EngineError, SharedSlot};

/// Slot rows plus the two lookup indexes the engine needs without touching
/// row locks: booking → slot, and faculty → (slot, span).
///
/// Slot spans never change after creation, so the faculty index can answer
/// overlap questions without locking any slot.
pub struct SlotStore {
    rows: DashMap<Ulid, SharedSlot>,
    by_booking: DashMap<Ulid, Ulid>,
    by_faculty: DashMap<Ulid, Vec<(Ulid, Span)>>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            by_booking: DashMap::new(),
            by_faculty: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedSlot> {
        self.rows.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.rows.contains_key(id)
    }

    pub fn ids(&self) -> Vec<Ulid> {
        self.rows.iter().map(|e| *e.key()).collect()
    }

    pub fn insert(&self, state: SlotState) {
        let id = state.slot.id;
        self.by_faculty
            .entry(state.slot.faculty_id)
            .or_default()
            .push((id, state.slot.span));
        if let Some(booking) = &state.booking {
            self.by_booking.insert(booking.id, id);
        }
        self.rows.insert(id, Arc::new(RwLock::new(state)));
    }

    /// Drop a slot and its index entries. The caller holds the slot's write lock.
    pub fn remove(&self, state: &SlotState) {
        let id = state.slot.id;
        if let Some(mut spans) = self.by_faculty.get_mut(&state.slot.faculty_id) {
            spans.retain(|(sid, _)| *sid != id);
        }
        if let Some(booking) = &state.booking {
            self.by_booking.remove(&booking.id);
        }
        self.rows.remove(&id);
    }

    pub fn slot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.by_booking.get(booking_id).map(|e| *e.value())
    }

    /// Slots that carry a booking row, in any status.
    pub fn booked_slot_ids(&self) -> Vec<Ulid> {
        self.by_booking.iter().map(|e| *e.value()).collect()
    }

    pub fn map_booking(&self, booking_id: Ulid, slot_id: Ulid) {
        self.by_booking.insert(booking_id, slot_id);
    }

    pub fn faculty_slots(&self, faculty_id: &Ulid) -> Vec<(Ulid, Span)> {
        self.by_faculty
            .get(faculty_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn faculty_slot_count(&self, faculty_id: &Ulid) -> usize {
        self.by_faculty.get(faculty_id).map_or(0, |e| e.len())
    }

    /// First slot of `faculty_id` intersecting `span`, ignoring `exclude`.
    pub fn has_overlap(&self, faculty_id: &Ulid, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
        let spans = self.by_faculty.get(faculty_id)?;
        spans
            .iter()
            .find(|(id, existing)| Some(*id) != exclude && existing.overlaps(span))
            .map(|(id, _)| *id)
    }

    /// Exclusive lock on a slot row for the rest of the caller's operation.
    pub async fn lock_slot(
        &self,
        id: Ulid,
        timeout: Duration,
    ) -> Result<OwnedRwLockWriteGuard<SlotState>, EngineError> {
        let row = self.get(&id).ok_or(EngineError::NotFound(id))?;
        let guard = timed_write(row, timeout, "slot").await?;
        // The row may have been deleted while we waited.
        if !self.contains(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub async fn read_slot(
        &self,
        id: Ulid,
        timeout: Duration,
    ) -> Result<OwnedRwLockReadGuard<SlotState>, EngineError> {
        let row = self.get(&id).ok_or(EngineError::NotFound(id))?;
        timed_read(row, timeout, "slot").await
    }

    /// Lock the slot that owns `booking_id`.
    pub async fn lock_booking_slot(
        &self,
        booking_id: Ulid,
        timeout: Duration,
    ) -> Result<OwnedRwLockWriteGuard<SlotState>, EngineError> {
        let slot_id = self
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = self.lock_slot(slot_id, timeout).await?;
        if guard.booking.as_ref().map(|b| b.id) != Some(booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(guard)
    }

    /// Idempotent; always paired with a booking transition under the same lock.
    pub fn set_availability(state: &mut SlotState, available: bool) {
        state.slot.is_available = available;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(faculty_id: Ulid, start: Ms, end: Ms) -> SlotState {
        SlotState::new(Slot {
            id: Ulid::new(),
            faculty_id,
            subject: "Web Development".into(),
            span: Span::new(start, end),
            is_available: true,
            created_at: 0,
        })
    }

    #[test]
    fn overlap_is_per_faculty() {
        let store = SlotStore::new();
        let f1 = Ulid::new();
        let f2 = Ulid::new();
        let s = slot(f1, 1_000, 2_000);
        let sid = s.slot.id;
        store.insert(s);

        assert_eq!(store.has_overlap(&f1, &Span::new(1_500, 2_500), None), Some(sid));
        assert_eq!(store.has_overlap(&f1, &Span::new(2_000, 3_000), None), None);
        assert_eq!(store.has_overlap(&f2, &Span::new(1_500, 2_500), None), None);
        assert_eq!(store.has_overlap(&f1, &Span::new(1_500, 2_500), Some(sid)), None);
    }

    #[test]
    fn remove_clears_indexes() {
        let store = SlotStore::new();
        let faculty = Ulid::new();
        let mut s = slot(faculty, 1_000, 2_000);
        let booking_id = Ulid::new();
        s.booking = Some(Booking {
            id: booking_id,
            slot_id: s.slot.id,
            student_id: Ulid::new(),
            team_id: "T1".into(),
            status: BookingStatus::Cancelled,
            cancelled_at: Some(5),
            cancellation_reason: String::new(),
            absent_at: None,
            created_at: 1,
            updated_at: 5,
        });
        store.insert(s.clone());
        assert_eq!(store.slot_for_booking(&booking_id), Some(s.slot.id));
        assert_eq!(store.faculty_slot_count(&faculty), 1);

        store.remove(&s);
        assert!(store.is_empty());
        assert_eq!(store.slot_for_booking(&booking_id), None);
        assert_eq!(store.faculty_slot_count(&faculty), 0);
    }

    #[tokio::test]
    async fn lock_slot_missing_is_not_found() {
        let store = SlotStore::new();
        let id = Ulid::new();
        let result = store.lock_slot(id, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(EngineError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn lock_slot_times_out_as_contention() {
        let store = SlotStore::new();
        let s = slot(Ulid::new(), 1_000, 2_000);
        let id = s.slot.id;
        store.insert(s);

        let _held = store.lock_slot(id, Duration::from_millis(50)).await.unwrap();
        let second = store.lock_slot(id, Duration::from_millis(20)).await;
        assert!(matches!(second, Err(EngineError::Contention("slot"))));
    }

    #[test]
    fn set_availability_is_idempotent() {
        let mut s = slot(Ulid::new(), 1_000, 2_000);
        SlotStore::set_availability(&mut s, false);
        SlotStore::set_availability(&mut s, false);
        assert!(!s.slot.is_available);
        SlotStore::set_availability(&mut s, true);
        assert!(s.slot.is_available);
    }
}
