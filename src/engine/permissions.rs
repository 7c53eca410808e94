use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Ms, RebookingPermission};

/// Rebooking grants keyed by `(student, subject)`.
///
/// Writes happen only while the student's row lock is held, which serialises
/// them against the absence check in booking creation.
pub struct PermissionStore {
    rows: DashMap<(Ulid, String), RebookingPermission>,
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionStore {
    pub fn new() -> Self {
        Self { rows: DashMap::new() }
    }

    pub fn get(&self, student_id: Ulid, subject: &str) -> Option<RebookingPermission> {
        self.rows
            .get(&(student_id, subject.to_string()))
            .map(|e| e.value().clone())
    }

    /// The permission row that would be written by a grant at `now`.
    /// Keeps the original `created_at` when the row already exists.
    pub fn prepare_grant(
        &self,
        student_id: Ulid,
        subject: &str,
        teacher_external_id: &str,
        now: Ms,
    ) -> RebookingPermission {
        let created_at = self
            .get(student_id, subject)
            .map_or(now, |existing| existing.created_at);
        RebookingPermission {
            student_id,
            subject: subject.to_string(),
            teacher_external_id: teacher_external_id.to_string(),
            created_at,
            updated_at: now,
        }
    }

    pub fn put(&self, permission: RebookingPermission) {
        self.rows
            .insert((permission.student_id, permission.subject.clone()), permission);
    }

    pub fn all(&self) -> Vec<RebookingPermission> {
        self.rows.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regrant_overwrites_teacher_and_bumps_updated_at() {
        let store = PermissionStore::new();
        let student = Ulid::new();

        store.put(store.prepare_grant(student, "Web Development", "T-1", 100));
        store.put(store.prepare_grant(student, "Web Development", "T-2", 250));

        let p = store.get(student, "Web Development").unwrap();
        assert_eq!(p.teacher_external_id, "T-2");
        assert_eq!(p.created_at, 100);
        assert_eq!(p.updated_at, 250);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn permissions_are_per_subject() {
        let store = PermissionStore::new();
        let student = Ulid::new();
        store.put(store.prepare_grant(student, "Web Development", "T-1", 100));
        assert!(store.get(student, "Compiler Design").is_none());
        assert!(store.get(Ulid::new(), "Web Development").is_none());
    }
}
