use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{generate_run, now_ms, validate_span, validate_subject};
use super::{Engine, EngineError};

fn check_external_id(external_id: Option<&str>) -> Result<(), EngineError> {
    if external_id.is_some_and(|e| e.len() > MAX_EXTERNAL_ID_LEN) {
        return Err(EngineError::LimitExceeded("external id too long"));
    }
    Ok(())
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(&self, user: User) -> Result<(), EngineError> {
        if user.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        check_external_id(user.external_id())?;
        let _gate = self.enter().await;
        if self.users.contains_key(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }

        self.wal_append(&Event::UserRegistered { user: user.clone() })
            .await?;
        tracing::info!(user = %user.id, role = user.role.as_str(), "user registered");
        self.users
            .insert(user.id, std::sync::Arc::new(tokio::sync::RwLock::new(UserState::new(user))));
        Ok(())
    }

    /// Change the external roster id used to validate rebooking permissions.
    /// Permissions granted under the old id stop counting.
    pub async fn set_faculty_external_id(
        &self,
        id: Ulid,
        external_id: Option<String>,
    ) -> Result<(), EngineError> {
        check_external_id(external_id.as_deref())?;
        let _gate = self.enter().await;
        let mut faculty = self.lock_faculty(id).await?;

        self.wal_append(&Event::FacultyExternalIdSet { id, external_id: external_id.clone() })
            .await?;
        if let Role::Faculty { external_id: current, .. } = &mut faculty.user.role {
            *current = external_id;
        }
        Ok(())
    }

    pub async fn set_faculty_accepting(&self, id: Ulid, accepting: bool) -> Result<(), EngineError> {
        let _gate = self.enter().await;
        let mut faculty = self.lock_faculty(id).await?;

        self.wal_append(&Event::FacultyAcceptingSet { id, accepting }).await?;
        if let Role::Faculty { accepting: current, .. } = &mut faculty.user.role {
            *current = accepting;
        }
        tracing::info!(faculty = %id, accepting, "faculty availability changed");
        Ok(())
    }

    // ── Slots ────────────────────────────────────────────────

    /// Open a slot. The faculty row lock serialises slot creation per faculty,
    /// so the overlap check cannot race another create.
    pub async fn create_slot(
        &self,
        id: Ulid,
        faculty_id: Ulid,
        subject: &str,
        span: Span,
    ) -> Result<Slot, EngineError> {
        let subject = validate_subject(subject)?;
        validate_span(&span)?;
        let now = now_ms();
        if span.start <= now {
            return Err(EngineError::InvalidSlot("start time must be in the future"));
        }

        let _gate = self.enter().await;
        let _faculty = self.lock_faculty(faculty_id).await?;
        if self.slots.contains(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.slots.faculty_slot_count(&faculty_id) >= MAX_SLOTS_PER_FACULTY {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if let Some(existing) = self.slots.has_overlap(&faculty_id, &span, None) {
            return Err(EngineError::Overlap(existing));
        }

        let slot = Slot {
            id,
            faculty_id,
            subject,
            span,
            is_available: true,
            created_at: now,
        };
        self.wal_append(&Event::SlotCreated { slot: slot.clone() }).await?;
        self.slots.insert(SlotState::new(slot.clone()));
        tracing::debug!(slot = %id, faculty = %faculty_id, "slot created");
        Ok(slot)
    }

    /// Fill `window` with back-to-back slots separated by breaks, skipping
    /// positions that overlap existing slots or have already started.
    pub async fn bulk_create_slots(
        &self,
        faculty_id: Ulid,
        subject: &str,
        window: Span,
        slot_minutes: i64,
        break_minutes: i64,
    ) -> Result<Vec<Slot>, EngineError> {
        if !ALLOWED_SLOT_MINUTES.contains(&slot_minutes) {
            return Err(EngineError::InvalidSlot("slot duration must be 5, 10 or 15 minutes"));
        }
        if !ALLOWED_BREAK_MINUTES.contains(&break_minutes) {
            return Err(EngineError::InvalidSlot("break must be 0, 5, 10 or 15 minutes"));
        }
        let subject = validate_subject(subject)?;
        validate_span(&window)?;
        if window.duration_ms() > MAX_BULK_WINDOW_MS {
            return Err(EngineError::LimitExceeded("bulk window too long"));
        }

        let _gate = self.enter().await;
        let _faculty = self.lock_faculty(faculty_id).await?;
        let now = now_ms();

        let mut accepted: Vec<Span> = Vec::new();
        for span in generate_run(&window, slot_minutes * MINUTE_MS, break_minutes * MINUTE_MS) {
            if span.start <= now || self.slots.has_overlap(&faculty_id, &span, None).is_some() {
                continue;
            }
            accepted.push(span);
        }
        if accepted.is_empty() {
            return Err(EngineError::InvalidSlot("no slots could be generated in that window"));
        }
        if self.slots.faculty_slot_count(&faculty_id) + accepted.len() > MAX_SLOTS_PER_FACULTY {
            return Err(EngineError::LimitExceeded("too many slots"));
        }

        let created: Vec<Slot> = accepted
            .into_iter()
            .map(|span| Slot {
                id: Ulid::new(),
                faculty_id,
                subject: subject.clone(),
                span,
                is_available: true,
                created_at: now,
            })
            .collect();
        // One event for the whole run: either every slot is durable or none is.
        self.wal_append(&Event::SlotsCreated { slots: created.clone() }).await?;
        for slot in &created {
            self.slots.insert(SlotState::new(slot.clone()));
        }
        tracing::info!(faculty = %faculty_id, count = created.len(), "slot run created");
        Ok(created)
    }

    /// Remove one of the faculty's own slots. Slots whose booking is, or was,
    /// held stay as history.
    pub async fn delete_slot(&self, faculty_id: Ulid, slot_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.enter().await;
        let slot = self.slots.lock_slot(slot_id, self.lock_timeout).await?;
        if slot.slot.faculty_id != faculty_id {
            return Err(EngineError::NotOwner { faculty_id, slot_id });
        }
        if slot.has_history() {
            return Err(EngineError::HasHistory(slot_id));
        }

        self.wal_append(&Event::SlotDeleted { id: slot_id }).await?;
        self.slots.remove(&slot);
        Ok(())
    }

    /// Delete the faculty's slots lying inside `window`. Refuses outright if
    /// any of them has a confirmed booking; completed and absent slots are
    /// skipped. Returns `(deleted, skipped)`.
    pub async fn delete_slots_between(
        &self,
        faculty_id: Ulid,
        window: Span,
    ) -> Result<(usize, usize), EngineError> {
        if window.start >= window.end {
            return Err(EngineError::InvalidSlot("end time must be after start time"));
        }
        let _gate = self.enter().await;

        let mut ids: Vec<Ulid> = self
            .slots
            .faculty_slots(&faculty_id)
            .into_iter()
            .filter(|(_, span)| span.start >= window.start && span.end <= window.end)
            .map(|(id, _)| id)
            .collect();
        // Multi-slot locking happens only here; a fixed order keeps it deadlock-free.
        ids.sort();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            match self.slots.lock_slot(id, self.lock_timeout).await {
                Ok(guard) => guards.push(guard),
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let confirmed = guards.iter().filter(|g| g.active_booking().is_some()).count();
        if confirmed > 0 {
            return Err(EngineError::ConfirmedBookings(confirmed));
        }

        let (history, doomed): (Vec<_>, Vec<_>) = guards.iter().partition(|g| g.has_history());
        let (deleted, skipped) = (doomed.len(), history.len());
        if !doomed.is_empty() {
            let ids = doomed.iter().map(|g| g.slot.id).collect();
            self.wal_append(&Event::SlotsDeleted { ids }).await?;
            for guard in doomed {
                self.slots.remove(guard);
            }
        }
        tracing::info!(faculty = %faculty_id, deleted, skipped, "slots cleared");
        Ok((deleted, skipped))
    }
}
