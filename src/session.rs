use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::LimitsConfig;

/// Lifecycle state of a session.
///
/// `active → idle → active` on renewed activity; `→ expired` via the sweep
/// or a lazy check on lookup; `active → terminated` via explicit destroy.
/// Once `expired` or `terminated` a session is removed (or about to be)
/// and cannot be resurrected under the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Expired,
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Expired => "expired",
            SessionStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One appended line of session output.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub at: DateTime<Utc>,
    pub text: String,
}

struct TranscriptInner {
    entries: VecDeque<TranscriptEntry>,
    cap: usize,
    dropped: u64,
}

/// Ordered, append-only log of command/output lines for one session.
///
/// Bounded to `cap` entries; the oldest entries are dropped once the cap is
/// reached (the drop count is retained for diagnostics). Appends are
/// synchronized per transcript, so interleaved executions on one session
/// never corrupt ordering, while different sessions proceed in parallel.
/// Subscribers (e.g. a GUI front-end) receive every appended entry over a
/// broadcast channel.
#[derive(Clone)]
pub struct Transcript {
    inner: Arc<Mutex<TranscriptInner>>,
    updates_tx: broadcast::Sender<TranscriptEntry>,
}

impl Transcript {
    fn new(cap: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(TranscriptInner {
                entries: VecDeque::new(),
                cap: cap.max(1),
                dropped: 0,
            })),
            updates_tx,
        }
    }

    /// Append one entry, trimming the oldest entries past the cap.
    pub fn append(&self, text: impl Into<String>) {
        let entry = TranscriptEntry {
            at: Utc::now(),
            text: text.into(),
        };
        {
            let mut inner = self.inner.lock();
            inner.entries.push_back(entry.clone());
            while inner.entries.len() > inner.cap {
                inner.entries.pop_front();
                inner.dropped += 1;
            }
        }
        // Ignore the error if there are no subscribers.
        let _ = self.updates_tx.send(entry);
    }

    /// The full retained output, entries joined with newlines.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries discarded so far to stay under the cap.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Subscribe to appended entries.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEntry> {
        self.updates_tx.subscribe()
    }
}

/// Mutable bookkeeping behind the session's own lock.
struct Activity {
    status: SessionStatus,
    last_used: Instant,
    last_used_at: DateTime<Utc>,
    command_count: u64,
    total_execution: Duration,
    last_command: Option<String>,
    last_result: Option<String>,
}

/// One logical shell context.
///
/// `Session` is a cheap handle; all mutable state sits behind shared
/// interior locks. The registry owns the authoritative id→session map and
/// is the only component that creates or removes sessions; everything
/// else resolves a handle by id per call.
#[derive(Clone)]
pub struct Session {
    /// Opaque unique token; the sole external handle.
    pub id: Uuid,
    /// Creation time, immutable.
    pub created_at: DateTime<Utc>,
    /// Absolute path bound at creation; immutable for the session's life.
    /// A per-command directory override does not mutate this.
    pub working_directory: PathBuf,
    transcript: Transcript,
    state: Arc<RwLock<Activity>>,
    result_cap: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("working_directory", &self.working_directory)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(working_directory: PathBuf, transcript_cap: usize, result_cap: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            working_directory,
            transcript: Transcript::new(transcript_cap),
            state: Arc::new(RwLock::new(Activity {
                status: SessionStatus::Active,
                last_used: Instant::now(),
                last_used_at: Utc::now(),
                command_count: 0,
                total_execution: Duration::ZERO,
                last_command: None,
                last_result: None,
            })),
            result_cap,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().status
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn last_command(&self) -> Option<String> {
        self.state.read().last_command.clone()
    }

    /// Time since the last dispatched command (or creation).
    pub fn idle_for(&self) -> Duration {
        self.state.read().last_used.elapsed()
    }

    /// Reconcile this session's status against the clock.
    ///
    /// Flips `active → idle` past `idle_after` and anything non-terminal to
    /// `expired` past `session_timeout`. Status is only reconciled here
    /// (on lookup, list, and sweep ticks), so between those points it may
    /// lag reality by up to one sweep interval. That staleness bound is
    /// deliberate; see the capacity-check notes on [`SessionRegistry`].
    fn reconcile(&self, idle_after: Duration, session_timeout: Duration) -> SessionStatus {
        let mut state = self.state.write();
        match state.status {
            SessionStatus::Expired | SessionStatus::Terminated => state.status,
            current => {
                let idle = state.last_used.elapsed();
                if idle > session_timeout {
                    state.status = SessionStatus::Expired;
                } else if idle > idle_after && current == SessionStatus::Active {
                    state.status = SessionStatus::Idle;
                }
                state.status
            }
        }
    }

    fn is_expired(&self, session_timeout: Duration) -> bool {
        let state = self.state.read();
        match state.status {
            SessionStatus::Expired | SessionStatus::Terminated => true,
            _ => state.last_used.elapsed() > session_timeout,
        }
    }

    fn mark(&self, status: SessionStatus) {
        self.state.write().status = status;
    }

    fn record_activity(&self, command: &str, execution_time: Duration, result: Option<&str>) {
        let mut state = self.state.write();
        state.last_used = Instant::now();
        state.last_used_at = Utc::now();
        state.command_count += 1;
        state.total_execution += execution_time;
        state.last_command = Some(command.to_string());
        if let Some(result) = result {
            state.last_result = Some(result.chars().take(self.result_cap).collect());
        }
        if state.status == SessionStatus::Idle {
            state.status = SessionStatus::Active;
        }
    }

    /// Point-in-time copy for listing and tool output.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            last_used_at: state.last_used_at,
            status: state.status,
            working_directory: self.working_directory.display().to_string(),
            command_count: state.command_count,
            total_execution_secs: state.total_execution.as_secs_f64(),
            last_command: state.last_command.clone(),
            last_result: state.last_result.clone(),
            transcript_len: self.transcript.len(),
        }
    }
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub working_directory: String,
    pub command_count: u64,
    pub total_execution_secs: f64,
    pub last_command: Option<String>,
    pub last_result: Option<String>,
    pub transcript_len: usize,
}

/// Registry-level session lifecycle events.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { id: Uuid },
    Destroyed { id: Uuid },
    Expired { id: Uuid },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("maximum number of active sessions reached ({0})")]
    CapacityExceeded(usize),
}

/// Aggregate counters across the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub idle_sessions: usize,
    pub expired_sessions: usize,
    pub max_sessions: usize,
    pub session_timeout_secs: u64,
    pub total_commands: u64,
    pub total_execution_secs: f64,
    pub average_execution_secs: f64,
}

struct SweepHandle {
    cancel: tokio_util::sync::CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Owns the id→session map and every session lifecycle transition.
///
/// All map mutations go through a single exclusive lock, so concurrent
/// creates cannot overshoot the capacity ceiling and destroy/update on the
/// same id cannot race. The background sweep is started explicitly via
/// [`start_sweep`](Self::start_sweep) and cancelled by
/// [`shutdown`](Self::shutdown), never implicitly.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
    limits: Arc<LimitsConfig>,
    events_tx: broadcast::Sender<SessionEvent>,
    sweep: Arc<SweepHandle>,
}

impl SessionRegistry {
    pub fn new(limits: LimitsConfig) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            limits: Arc::new(limits),
            events_tx,
            sweep: Arc::new(SweepHandle {
                cancel: tokio_util::sync::CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Create a new session bound to `working_directory`.
    ///
    /// Expired sessions are opportunistically reaped first; if the active
    /// count is still at the ceiling the call fails fast with
    /// [`RegistryError::CapacityExceeded`]; there is no queueing.
    pub fn create_session(
        &self,
        working_directory: impl AsRef<Path>,
    ) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();

        let reaped = self.reap_expired_locked(&mut inner);
        if !reaped.is_empty() {
            tracing::debug!(count = reaped.len(), "reaped expired sessions before create");
        }

        let active = inner
            .values()
            .filter(|s| {
                s.reconcile(self.limits.idle_after(), self.limits.session_timeout())
                    == SessionStatus::Active
            })
            .count();
        if active >= self.limits.max_sessions {
            return Err(RegistryError::CapacityExceeded(self.limits.max_sessions));
        }

        let session = Session::new(
            working_directory.as_ref().to_path_buf(),
            self.limits.transcript_cap,
            self.limits.result_cap,
        );
        inner.insert(session.id, session.clone());
        let _ = self.events_tx.send(SessionEvent::Created { id: session.id });
        tracing::info!(session = %session.id, dir = %session.working_directory.display(), "session created");
        Ok(session)
    }

    /// Destroy a session by id. Returns false (and changes nothing) for an
    /// unknown id; a second destroy of the same id therefore returns false.
    pub fn destroy_session(&self, id: Uuid) -> bool {
        let removed = self.inner.write().remove(&id);
        match removed {
            Some(session) => {
                session.mark(SessionStatus::Terminated);
                let _ = self.events_tx.send(SessionEvent::Destroyed { id });
                tracing::info!(session = %id, "session destroyed");
                true
            }
            None => {
                tracing::warn!(session = %id, "destroy of unknown session");
                false
            }
        }
    }

    /// Look up a session by id.
    ///
    /// Lazily marks the session expired if its idle interval has elapsed,
    /// but does not remove it here; removal happens on explicit destroy
    /// or the next sweep.
    pub fn get_session(&self, id: Uuid) -> Option<Session> {
        let session = self.inner.read().get(&id).cloned()?;
        session.reconcile(self.limits.idle_after(), self.limits.session_timeout());
        Some(session)
    }

    /// Record a dispatched command against a session: advances the
    /// last-used clock, bumps counters, stores the (truncated) last result,
    /// and reactivates a session previously marked idle. Returns false for
    /// an unknown id.
    pub fn update_activity(
        &self,
        id: Uuid,
        command: &str,
        execution_time: Duration,
        result: Option<&str>,
    ) -> bool {
        let Some(session) = self.inner.read().get(&id).cloned() else {
            return false;
        };
        session.record_activity(command, execution_time, result);
        true
    }

    /// Snapshots of all sessions. Re-evaluates each session's status as a
    /// side effect, so recently-lapsed sessions show up as expired here
    /// even before the sweep removes them.
    pub fn list_sessions(&self, include_expired: bool) -> Vec<SessionSnapshot> {
        let sessions: Vec<Session> = self.inner.read().values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            let status =
                session.reconcile(self.limits.idle_after(), self.limits.session_timeout());
            if !include_expired
                && matches!(status, SessionStatus::Expired | SessionStatus::Terminated)
            {
                continue;
            }
            out.push(session.snapshot());
        }
        out
    }

    pub fn stats(&self) -> RegistryStats {
        let sessions: Vec<Session> = self.inner.read().values().cloned().collect();
        let mut stats = RegistryStats {
            total_sessions: sessions.len(),
            active_sessions: 0,
            idle_sessions: 0,
            expired_sessions: 0,
            max_sessions: self.limits.max_sessions,
            session_timeout_secs: self.limits.session_timeout_secs,
            total_commands: 0,
            total_execution_secs: 0.0,
            average_execution_secs: 0.0,
        };
        for session in &sessions {
            let snap = session.snapshot();
            match snap.status {
                SessionStatus::Active => stats.active_sessions += 1,
                SessionStatus::Idle => stats.idle_sessions += 1,
                SessionStatus::Expired => stats.expired_sessions += 1,
                SessionStatus::Terminated => {}
            }
            stats.total_commands += snap.command_count;
            stats.total_execution_secs += snap.total_execution_secs;
        }
        stats.average_execution_secs =
            stats.total_execution_secs / stats.total_commands.max(1) as f64;
        stats
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// One sweep pass: reconcile every session and remove the expired ones.
    /// Returns the number removed. This is the only place removal happens
    /// without caller action.
    pub fn sweep_once(&self) -> usize {
        let mut inner = self.inner.write();
        let removed = self.reap_expired_locked(&mut inner);
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "sweep removed expired sessions");
        }
        removed.len()
    }

    fn reap_expired_locked(&self, inner: &mut HashMap<Uuid, Session>) -> Vec<Uuid> {
        let timeout = self.limits.session_timeout();
        let idle_after = self.limits.idle_after();
        let expired: Vec<Uuid> = inner
            .values()
            .filter(|s| {
                s.reconcile(idle_after, timeout);
                s.is_expired(timeout)
            })
            .map(|s| s.id)
            .collect();
        for id in &expired {
            if let Some(session) = inner.remove(id) {
                session.mark(SessionStatus::Expired);
                let _ = self.events_tx.send(SessionEvent::Expired { id: *id });
            }
        }
        expired
    }

    /// Start the periodic background sweep. Idempotent; the task runs until
    /// [`shutdown`](Self::shutdown).
    pub fn start_sweep(&self) {
        let mut slot = self.sweep.task.lock();
        if slot.is_some() {
            return;
        }
        let registry = self.clone();
        let cancel = self.sweep.cancel.clone();
        let interval = self.limits.sweep_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh registry
            // isn't swept at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // A bad iteration must not kill the scheduler.
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            registry.sweep_once()
                        }));
                        if let Err(e) = result {
                            tracing::error!("session sweep iteration panicked: {e:?}");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("session sweep stopped");
        }));
    }

    /// Cancel the sweep and mark every remaining live session terminated.
    ///
    /// Session records stay in the map until the process exits; nothing is
    /// persisted.
    pub async fn shutdown(&self) {
        self.sweep.cancel.cancel();
        let task = self.sweep.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("sweep task did not shut down cleanly: {e}");
            }
        }
        for session in self.inner.read().values() {
            if matches!(
                session.status(),
                SessionStatus::Active | SessionStatus::Idle
            ) {
                session.mark(SessionStatus::Terminated);
            }
        }
        tracing::info!("session registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_sessions: usize, timeout_secs: u64) -> LimitsConfig {
        LimitsConfig {
            max_sessions,
            session_timeout_secs: timeout_secs,
            idle_after_secs: timeout_secs.div_ceil(2),
            sweep_interval_secs: 60,
            ..LimitsConfig::default()
        }
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let registry = SessionRegistry::new(limits(5, 300));
        let session = registry.create_session("/tmp/work").unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.working_directory, PathBuf::from("/tmp/work"));

        let looked_up = registry.get_session(session.id).expect("session should exist");
        assert_eq!(looked_up.id, session.id);
    }

    #[tokio::test]
    async fn destroy_unknown_is_false_and_idempotent() {
        let registry = SessionRegistry::new(limits(5, 300));
        assert!(!registry.destroy_session(Uuid::new_v4()));

        let session = registry.create_session("/tmp").unwrap();
        assert!(registry.destroy_session(session.id));
        assert!(!registry.destroy_session(session.id), "second destroy must return false");
        assert!(registry.get_session(session.id).is_none());
    }

    #[tokio::test]
    async fn capacity_ceiling_fails_fast() {
        let registry = SessionRegistry::new(limits(5, 300));
        for _ in 0..5 {
            registry.create_session("/tmp").unwrap();
        }
        let err = registry.create_session("/tmp").unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded(5)), "got: {err:?}");
    }

    #[tokio::test]
    async fn destroy_frees_capacity() {
        let registry = SessionRegistry::new(limits(2, 300));
        let a = registry.create_session("/tmp").unwrap();
        registry.create_session("/tmp").unwrap();
        assert!(registry.create_session("/tmp").is_err());

        registry.destroy_session(a.id);
        assert!(registry.create_session("/tmp").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_never_overshoot() {
        let registry = SessionRegistry::new(limits(5, 300));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.create_session("/tmp").is_ok()
            }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 5, "exactly max_sessions creates should succeed");
        assert_eq!(registry.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn get_lazily_marks_expired_without_removing() {
        let registry = SessionRegistry::new(limits(5, 300));
        let session = registry.create_session("/tmp").unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;

        let looked_up = registry.get_session(session.id).expect("still in the map");
        assert_eq!(looked_up.status(), SessionStatus::Expired);
        // Not removed by the lazy check.
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_reactivates_idle_session() {
        let registry = SessionRegistry::new(limits(5, 300));
        let session = registry.create_session("/tmp").unwrap();

        // Past the idle threshold but not yet expired.
        tokio::time::advance(Duration::from_secs(200)).await;
        let looked_up = registry.get_session(session.id).unwrap();
        assert_eq!(looked_up.status(), SessionStatus::Idle);

        assert!(registry.update_activity(session.id, "echo hi", Duration::from_millis(10), Some("hi")));
        assert_eq!(session.status(), SessionStatus::Active);

        let snap = session.snapshot();
        assert_eq!(snap.command_count, 1);
        assert_eq!(snap.last_command.as_deref(), Some("echo hi"));
        assert_eq!(snap.last_result.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn update_activity_truncates_result() {
        let registry = SessionRegistry::new(limits(5, 300));
        let session = registry.create_session("/tmp").unwrap();

        let long = "x".repeat(2000);
        registry.update_activity(session.id, "cmd", Duration::ZERO, Some(&long));
        let snap = session.snapshot();
        assert_eq!(snap.last_result.unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn update_activity_unknown_session() {
        let registry = SessionRegistry::new(limits(5, 300));
        assert!(!registry.update_activity(Uuid::new_v4(), "cmd", Duration::ZERO, None));
    }

    #[tokio::test(start_paused = true)]
    async fn list_flips_expired_and_filters() {
        let registry = SessionRegistry::new(limits(5, 300));
        let stale = registry.create_session("/tmp").unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        let fresh = registry.create_session("/tmp").unwrap();

        let listed = registry.list_sessions(false);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);
        // The side effect of listing marked the stale session expired.
        assert_eq!(stale.status(), SessionStatus::Expired);

        let all = registry.list_sessions(true);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_stale_sessions() {
        let registry = SessionRegistry::new(limits(5, 300));
        let stale = registry.create_session("/tmp").unwrap();
        let fresh = registry.create_session("/tmp").unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        registry.update_activity(fresh.id, "keepalive", Duration::ZERO, None);
        tokio::time::advance(Duration::from_secs(150)).await;

        // stale: 350s idle (> 300); fresh: 150s idle.
        let removed = registry.sweep_once();
        assert_eq!(removed, 1);
        assert!(registry.get_session(stale.id).is_none());
        assert!(registry.get_session(fresh.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_reaped_on_create() {
        let registry = SessionRegistry::new(limits(1, 300));
        let old = registry.create_session("/tmp").unwrap();
        assert!(registry.create_session("/tmp").is_err());

        tokio::time::advance(Duration::from_secs(301)).await;

        // The opportunistic reap inside create frees the slot.
        let new = registry.create_session("/tmp").unwrap();
        assert_ne!(new.id, old.id);
        assert!(registry.get_session(old.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_runs_on_interval() {
        let registry = SessionRegistry::new(LimitsConfig {
            max_sessions: 5,
            session_timeout_secs: 300,
            idle_after_secs: 60,
            sweep_interval_secs: 60,
            ..LimitsConfig::default()
        });
        registry.start_sweep();
        let session = registry.create_session("/tmp").unwrap();

        // Let the paused clock run far past expiry; the sweep task's
        // interval ticks fire as time auto-advances.
        tokio::time::sleep(Duration::from_secs(400)).await;
        for _ in 0..50 {
            if registry.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.get_session(session.id).is_none(), "sweep should have removed the session");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_terminates_remaining_sessions() {
        let registry = SessionRegistry::new(limits(5, 300));
        registry.start_sweep();
        let session = registry.create_session("/tmp").unwrap();

        registry.shutdown().await;
        assert_eq!(session.status(), SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn registry_emits_events() {
        let registry = SessionRegistry::new(limits(5, 300));
        let mut rx = registry.subscribe_events();

        let session = registry.create_session("/tmp").unwrap();
        registry.destroy_session(session.id);

        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, SessionEvent::Created { id } if id == session.id), "got: {ev:?}");
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, SessionEvent::Destroyed { id } if id == session.id), "got: {ev:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_emits_expired_event() {
        let registry = SessionRegistry::new(limits(5, 300));
        let session = registry.create_session("/tmp").unwrap();
        let mut rx = registry.subscribe_events();

        tokio::time::advance(Duration::from_secs(301)).await;
        registry.sweep_once();

        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, SessionEvent::Expired { id } if id == session.id), "got: {ev:?}");
    }

    #[tokio::test]
    async fn stats_aggregate_counts() {
        let registry = SessionRegistry::new(limits(5, 300));
        let a = registry.create_session("/tmp").unwrap();
        registry.create_session("/tmp").unwrap();
        registry.update_activity(a.id, "one", Duration::from_secs(2), None);
        registry.update_activity(a.id, "two", Duration::from_secs(4), None);

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.total_commands, 2);
        assert!((stats.total_execution_secs - 6.0).abs() < 1e-9);
        assert!((stats.average_execution_secs - 3.0).abs() < 1e-9);
    }

    // ---- Transcript tests ----

    #[tokio::test]
    async fn transcript_appends_in_order() {
        let t = Transcript::new(100);
        t.append("$ echo one\none");
        t.append("$ echo two\ntwo");
        let rendered = t.render();
        let first = rendered.find("one").unwrap();
        let second = rendered.find("two").unwrap();
        assert!(first < second);
        assert_eq!(t.len(), 2);
    }

    #[tokio::test]
    async fn transcript_cap_drops_oldest() {
        let t = Transcript::new(3);
        for i in 0..5 {
            t.append(format!("line {i}"));
        }
        assert_eq!(t.len(), 3);
        assert_eq!(t.dropped(), 2);
        let entries = t.entries();
        assert_eq!(entries[0].text, "line 2");
        assert_eq!(entries[2].text, "line 4");
    }

    #[tokio::test]
    async fn transcript_notifies_subscribers() {
        let t = Transcript::new(10);
        let mut rx = t.subscribe();
        t.append("hello");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.text, "hello");
    }
}
