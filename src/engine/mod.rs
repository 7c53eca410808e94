//! The booking engine: slot/user/team row locks, invariant checks and the
//! write-ahead log behind them.
//!
//! Every mutating operation follows the same shape: acquire row locks in the
//! fixed order Slot → Student → Faculty → Team ledger, validate, append one
//! event to the WAL, then apply it to the locked rows. Validation failures and
//! WAL failures both return before any row is touched.

mod booking;
mod error;
mod mutations;
mod permissions;
mod queries;
mod replay;
mod rules;
mod slots;

pub use booking::Actor;
pub use error::EngineError;
pub use permissions::PermissionStore;
pub use rules::now_ms;
pub use slots::SlotStore;

use std::collections::HashSet;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use rules::Clock;

pub type SharedSlot = Arc<RwLock<SlotState>>;
pub type SharedUser = Arc<RwLock<UserState>>;
pub type SharedTeam = Arc<RwLock<TeamLedger>>;

/// `(team id, normalised subject)`
pub type TeamKey = (String, String);

/// Confirmed bookings of one team in one subject. Holding this row's write
/// lock is the "lock every booking matching (team, subject)" step.
#[derive(Debug, Default)]
pub struct TeamLedger {
    pub confirmed: HashSet<Ulid>,
}

/// Write guard on a team ledger row. On drop, an empty row that nobody else
/// holds or waits on is removed from the map.
pub(super) struct TeamGuard<'a> {
    guard: OwnedRwLockWriteGuard<TeamLedger>,
    row: SharedTeam,
    key: TeamKey,
    teams: &'a DashMap<TeamKey, SharedTeam>,
}

impl Deref for TeamGuard<'_> {
    type Target = TeamLedger;

    fn deref(&self) -> &TeamLedger {
        &self.guard
    }
}

impl DerefMut for TeamGuard<'_> {
    fn deref_mut(&mut self) -> &mut TeamLedger {
        &mut self.guard
    }
}

impl Drop for TeamGuard<'_> {
    fn drop(&mut self) {
        if !self.guard.confirmed.is_empty() {
            return;
        }
        // Map entry, the guard and `row`. Clones are only taken under the
        // shard lock, so a higher count is another caller queued on the row.
        let row = &self.row;
        self.teams
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, row) && Arc::strong_count(current) == 3);
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one arrives
/// share a single fsync; any other command ends the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            run_maintenance(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut trailing = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    trailing = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = trailing {
            run_maintenance(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut failure = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Flush even after a failed append so stray bytes are not attributed to the next batch.
    if let Err(e) = wal.flush_sync() {
        failure.get_or_insert(e);
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Some(e) = &failure {
        tracing::error!("wal batch of {} failed: {e}", batch.len());
    }
    for (_, response) in batch {
        let outcome = match &failure {
            None => Ok(()),
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(outcome);
    }
}

fn run_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let outcome =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(outcome);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Timed row locks ──────────────────────────────────────

async fn timed_write<T>(
    lock: Arc<RwLock<T>>,
    timeout: Duration,
    what: &'static str,
) -> Result<OwnedRwLockWriteGuard<T>, EngineError> {
    match tokio::time::timeout(timeout, lock.write_owned()).await {
        Ok(guard) => Ok(guard),
        Err(_) => Err(lock_timed_out(what, timeout)),
    }
}

async fn timed_read<T>(
    lock: Arc<RwLock<T>>,
    timeout: Duration,
    what: &'static str,
) -> Result<OwnedRwLockReadGuard<T>, EngineError> {
    match tokio::time::timeout(timeout, lock.read_owned()).await {
        Ok(guard) => Ok(guard),
        Err(_) => Err(lock_timed_out(what, timeout)),
    }
}

fn lock_timed_out(what: &'static str, timeout: Duration) -> EngineError {
    metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL, "row" => what).increment(1);
    tracing::warn!("lock wait on {what} row exceeded {timeout:?}");
    EngineError::Contention(what)
}

pub struct Engine {
    pub slots: SlotStore,
    pub permissions: PermissionStore,
    pub(super) users: DashMap<Ulid, SharedUser>,
    pub(super) teams: DashMap<TeamKey, SharedTeam>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) lock_timeout: Duration,
    /// Mutations hold this shared for their whole run; compaction takes it
    /// exclusively so the snapshot cannot miss an in-flight event.
    pub(super) gate: RwLock<()>,
    pub(super) clock: Clock,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = replay::ReplayState::default();
        for event in &events {
            state.apply(event);
        }
        tracing::info!(
            "replayed {} events from {}: {} users, {} slots",
            events.len(),
            wal_path.display(),
            state.users.len(),
            state.slots.len()
        );

        let engine = Self {
            slots: SlotStore::new(),
            permissions: PermissionStore::new(),
            users: DashMap::new(),
            teams: DashMap::new(),
            wal_tx,
            lock_timeout,
            gate: RwLock::new(()),
            clock: Clock::default(),
        };
        state.install(&engine);
        Ok(engine)
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Entered first by every mutation, ahead of any row lock.
    pub(super) async fn enter(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Write an event to the WAL via the group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<SharedUser> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub(super) async fn lock_user(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UserState>, EngineError> {
        let row = self.get_user(&id).ok_or(EngineError::NotFound(id))?;
        timed_write(row, self.lock_timeout, "user").await
    }

    pub(super) async fn read_user(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<UserState>, EngineError> {
        let row = self.get_user(&id).ok_or(EngineError::NotFound(id))?;
        timed_read(row, self.lock_timeout, "user").await
    }

    /// Lock the student row, rejecting anyone who is not a student.
    pub(super) async fn lock_student(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UserState>, EngineError> {
        let guard = self.lock_user(id).await?;
        if !guard.user.role.is_student() {
            return Err(EngineError::WrongRole { id, expected: "student" });
        }
        Ok(guard)
    }

    /// Read a faculty row, rejecting anyone who is not faculty.
    pub(super) async fn read_faculty(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<UserState>, EngineError> {
        let guard = self.read_user(id).await?;
        if !guard.user.role.is_faculty() {
            return Err(EngineError::WrongRole { id, expected: "faculty" });
        }
        Ok(guard)
    }

    pub(super) async fn lock_faculty(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UserState>, EngineError> {
        let guard = self.lock_user(id).await?;
        if !guard.user.role.is_faculty() {
            return Err(EngineError::WrongRole { id, expected: "faculty" });
        }
        Ok(guard)
    }

    pub(super) fn team_row(&self, key: &TeamKey) -> SharedTeam {
        if let Some(row) = self.teams.get(key) {
            return row.value().clone();
        }
        self.teams.entry(key.clone()).or_default().value().clone()
    }

    pub(super) async fn lock_team(&self, key: &TeamKey) -> Result<TeamGuard<'_>, EngineError> {
        let row = self.team_row(key);
        let guard = timed_write(row.clone(), self.lock_timeout, "team").await?;
        Ok(TeamGuard {
            guard,
            row,
            key: key.clone(),
            teams: &self.teams,
        })
    }

    /// Timestamp for a state transition; strictly later than every earlier one.
    pub(super) fn tick(&self) -> Ms {
        self.clock.tick()
    }

    /// Compact the WAL into the minimal event set that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let events = self.snapshot_events().await?;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn snapshot_events(&self) -> Result<Vec<Event>, EngineError> {
        let mut events = Vec::new();

        let user_rows: Vec<SharedUser> = self.users.iter().map(|e| e.value().clone()).collect();
        for row in user_rows {
            let guard = timed_read(row, self.lock_timeout, "user").await?;
            events.push(Event::UserRegistered { user: guard.user.clone() });
        }

        for slot_id in self.slots.ids() {
            let Some(row) = self.slots.get(&slot_id) else { continue };
            let guard = timed_read(row, self.lock_timeout, "slot").await?;
            events.push(Event::SlotCreated { slot: guard.slot.clone() });
            if let Some(booking) = &guard.booking {
                events.push(Event::BookingRestored { booking: booking.clone() });
            }
        }

        for permission in self.permissions.all() {
            events.push(Event::PermissionGranted { permission });
        }
        Ok(events)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
