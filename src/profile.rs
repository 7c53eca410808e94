//! Student profile lookup. The engine never calls this itself: the request
//! layer resolves a profile and passes the team id and mentor list in.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::StudentProfile;

#[derive(Debug)]
pub enum ProfileError {
    /// The roster has no entry for this student.
    Unknown(Ulid),
    /// The roster could not be reached.
    Unavailable(String),
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::Unknown(id) => write!(f, "no roster profile for student {id}"),
            ProfileError::Unavailable(msg) => write!(f, "roster unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ProfileError {}

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, student_id: Ulid) -> Result<StudentProfile, ProfileError>;
}

/// Profiles held in memory, written through the `profiles` table.
#[derive(Default)]
pub struct StaticProfiles {
    profiles: DashMap<Ulid, StudentProfile>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, student_id: Ulid, mut profile: StudentProfile) {
        profile.team_id = profile.team_id.trim().to_string();
        self.profiles.insert(student_id, profile);
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn resolve(&self, student_id: Ulid) -> Result<StudentProfile, ProfileError> {
        self.profiles
            .get(&student_id)
            .map(|e| e.value().clone())
            .ok_or(ProfileError::Unknown(student_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_replaces_and_trims() {
        let profiles = StaticProfiles::new();
        let student = Ulid::new();
        assert!(matches!(
            profiles.resolve(student).await,
            Err(ProfileError::Unknown(id)) if id == student
        ));

        profiles.put(student, StudentProfile { team_id: " G-1 ".into(), mentor_external_ids: vec![] });
        profiles.put(
            student,
            StudentProfile { team_id: "G-2".into(), mentor_external_ids: vec!["T-1".into()] },
        );
        let p = profiles.resolve(student).await.unwrap();
        assert_eq!(p.team_id, "G-2");
        assert_eq!(p.mentor_external_ids, vec!["T-1".to_string()]);
    }
}
