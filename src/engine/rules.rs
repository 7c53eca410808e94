use std::sync::atomic::{AtomicI64, Ordering};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Wall clock that never repeats a reading. Absence and permission stamps are
/// compared with `>=`, so two writes in one millisecond must still order.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    last: AtomicI64,
}

impl Clock {
    /// `max(now, last + 1)`.
    pub fn tick(&self) -> Ms {
        let now = now_ms();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Never hand out a stamp at or before `ms`.
    pub fn observe(&self, ms: Ms) {
        self.last.fetch_max(ms, Ordering::AcqRel);
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidSlot("end time must be after start time"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("slot too long"));
    }
    Ok(())
}

pub(crate) fn validate_subject(raw: &str) -> Result<String, EngineError> {
    let subject = normalize_subject(raw);
    if subject.is_empty() {
        return Err(EngineError::InvalidSlot("subject is required"));
    }
    if subject.len() > MAX_SUBJECT_LEN {
        return Err(EngineError::LimitExceeded("subject too long"));
    }
    Ok(subject)
}

pub(crate) fn validate_team(team_id: &str) -> Result<String, EngineError> {
    let team = team_id.trim();
    if team.is_empty() {
        return Err(EngineError::MissingTeam);
    }
    if team.len() > MAX_TEAM_ID_LEN {
        return Err(EngineError::LimitExceeded("team id too long"));
    }
    Ok(team.to_string())
}

/// Students may cancel strictly before `start - 8h`.
pub(crate) fn cancellation_deadline(slot_start: Ms) -> Ms {
    slot_start - STUDENT_CANCELLATION_WINDOW_MS
}

pub(crate) fn check_cancellation_window(slot_start: Ms, now: Ms, force: bool) -> Result<(), EngineError> {
    if force {
        return Ok(());
    }
    let deadline = cancellation_deadline(slot_start);
    if now >= deadline {
        return Err(EngineError::CancellationWindowViolation { deadline });
    }
    Ok(())
}

/// Whether `permission` lifts an absence recorded at `absent_at` on a slot of
/// the faculty identified by `faculty_external_id`.
///
/// The grant must come from that same faculty and must not predate the
/// absence; a grant left over from an earlier absence does not carry over.
pub(crate) fn permission_lifts_absence(
    permission: Option<&RebookingPermission>,
    faculty_external_id: Option<&str>,
    absent_at: Ms,
) -> bool {
    let (Some(permission), Some(external_id)) = (permission, faculty_external_id) else {
        return false;
    };
    permission.teacher_external_id == external_id && permission.updated_at >= absent_at
}

/// The timestamp an absence counts from: `absent_at`, else the row's last update.
pub(crate) fn absence_time(booking: &Booking) -> Ms {
    booking.absent_at.unwrap_or(booking.updated_at)
}

/// Slot start times for a run of `slot_ms` slots separated by `break_ms`,
/// fitting entirely inside `window`.
pub(crate) fn generate_run(window: &Span, slot_ms: Ms, break_ms: Ms) -> Vec<Span> {
    let mut spans = Vec::new();
    if slot_ms <= 0 || break_ms < 0 {
        return spans;
    }
    let mut start = window.start;
    while start + slot_ms <= window.end {
        spans.push(Span::new(start, start + slot_ms));
        start += slot_ms + break_ms;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn permission(teacher: &str, updated_at: Ms) -> RebookingPermission {
        RebookingPermission {
            student_id: Ulid::new(),
            subject: "Compiler Design".into(),
            teacher_external_id: teacher.into(),
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn permission_must_be_newer_than_absence() {
        let p = permission("T-9", 1_000);
        assert!(permission_lifts_absence(Some(&p), Some("T-9"), 1_000));
        assert!(permission_lifts_absence(Some(&p), Some("T-9"), 999));
        assert!(!permission_lifts_absence(Some(&p), Some("T-9"), 1_001));
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = Clock::default();
        let mut last = clock.tick();
        for _ in 0..1_000 {
            let next = clock.tick();
            assert!(next > last, "{next} <= {last}");
            last = next;
        }
    }

    #[test]
    fn clock_stays_ahead_of_replayed_stamps() {
        let clock = Clock::default();
        let future = now_ms() + HOUR_MS;
        clock.observe(future);
        assert_eq!(clock.tick(), future + 1);
        clock.observe(0);
        assert_eq!(clock.tick(), future + 2);
    }

    #[test]
    fn permission_from_other_faculty_does_not_count() {
        let p = permission("T-9", 5_000);
        assert!(!permission_lifts_absence(Some(&p), Some("T-3"), 1_000));
    }

    #[test]
    fn missing_permission_or_external_id_blocks() {
        let p = permission("T-9", 5_000);
        assert!(!permission_lifts_absence(None, Some("T-9"), 1_000));
        assert!(!permission_lifts_absence(Some(&p), None, 1_000));
    }

    #[test]
    fn absence_time_falls_back_to_updated_at() {
        let mut b = Booking {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            student_id: Ulid::new(),
            team_id: "T1".into(),
            status: BookingStatus::Absent,
            cancelled_at: None,
            cancellation_reason: String::new(),
            absent_at: None,
            created_at: 10,
            updated_at: 70,
        };
        assert_eq!(absence_time(&b), 70);
        b.absent_at = Some(40);
        assert_eq!(absence_time(&b), 40);
    }

    #[test]
    fn cancellation_window_boundary() {
        let start = 100 * HOUR_MS;
        let deadline = start - 8 * HOUR_MS;
        assert!(check_cancellation_window(start, deadline - 1, false).is_ok());
        assert!(matches!(
            check_cancellation_window(start, deadline, false),
            Err(EngineError::CancellationWindowViolation { deadline: d }) if d == deadline
        ));
        assert!(check_cancellation_window(start, start + 1, true).is_ok());
    }

    #[test]
    fn validate_span_rejects_inverted_and_out_of_range() {
        let base = MIN_VALID_TIMESTAMP_MS + HOUR_MS;
        assert!(validate_span(&Span { start: base, end: base }).is_err());
        assert!(validate_span(&Span { start: base + 10, end: base }).is_err());
        assert!(validate_span(&Span { start: 0, end: 10 }).is_err());
        assert!(validate_span(&Span { start: base, end: base + 25 * HOUR_MS }).is_err());
        assert!(validate_span(&Span::new(base, base + HOUR_MS)).is_ok());
    }

    #[test]
    fn team_and_subject_are_trimmed_and_required() {
        assert!(matches!(validate_team("   "), Err(EngineError::MissingTeam)));
        assert_eq!(validate_team(" G-12 ").unwrap(), "G-12");
        assert!(validate_subject("").is_err());
        assert_eq!(validate_subject(" Web Development ").unwrap(), "Web Development");
    }

    #[test]
    fn run_generation_fits_window() {
        let window = Span::new(0, 60 * MINUTE_MS);
        let run = generate_run(&window, 15 * MINUTE_MS, 5 * MINUTE_MS);
        let starts: Vec<Ms> = run.iter().map(|s| s.start / MINUTE_MS).collect();
        assert_eq!(starts, vec![0, 20, 40]);
        assert!(run.iter().all(|s| s.end <= window.end));

        let tight = generate_run(&Span::new(0, 10 * MINUTE_MS), 15 * MINUTE_MS, 0);
        assert!(tight.is_empty());
    }
}
