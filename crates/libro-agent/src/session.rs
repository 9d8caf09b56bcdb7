//! Session memory: per-session transcripts and reader preferences, in memory only

use crate::machine::AgentState;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use libro_core::{ReaderPreferences, Turn, TranscriptRecord};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use libro_core::SessionKey;

#[derive(Default)]
struct Transcript {
    turns: Vec<Turn>,
    /// Bumped by `clear`; commits carrying an older generation are dropped.
    generation: u64,
    preferences: ReaderPreferences,
}

impl Transcript {
    fn push(&mut self, mut turn: Turn) {
        if let Some(last) = self.turns.last() {
            if turn.timestamp <= last.timestamp {
                turn.timestamp = last.timestamp + ChronoDuration::microseconds(1);
            }
        }
        self.turns.push(turn);
    }
}

/// One session's state. Only the store hands these out.
pub struct SessionEntry {
    key: SessionKey,
    transcript: RwLock<Transcript>,
    created_at: DateTime<Utc>,
    last_active_micros: AtomicI64,
    turn_lock: Mutex<()>,
    state: watch::Sender<AgentState>,
}

impl SessionEntry {
    fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        let (state, _) = watch::channel(AgentState::AwaitingUserInput);
        Self {
            key,
            transcript: RwLock::new(Transcript::default()),
            created_at: now,
            last_active_micros: AtomicI64::new(now.timestamp_micros()),
            turn_lock: Mutex::new(()),
            state,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        let micros = self.last_active_micros.load(Ordering::Relaxed);
        Utc.timestamp_micros(micros).single().unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_active_micros
            .store(Utc::now().timestamp_micros(), Ordering::Relaxed);
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        self.state.send_replace(state);
    }

    /// Whether a turn currently holds this session.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    pub(crate) fn try_begin_turn(&self) -> Option<MutexGuard<'_, ()>> {
        self.turn_lock.try_lock().ok()
    }

    pub(crate) async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    /// Append one turn and return the generation it landed in.
    pub async fn append(&self, turn: Turn) -> u64 {
        let mut transcript = self.transcript.write().await;
        transcript.push(turn);
        self.touch();
        transcript.generation
    }

    /// Append `turns` together, but only if the transcript has not been
    /// cleared since `generation`. Returns whether they were committed.
    pub async fn commit(&self, generation: u64, turns: Vec<Turn>) -> bool {
        self.commit_with(generation, turns, None).await
    }

    /// `commit`, also merging `learned` into the reader's preferences under
    /// the same generation check.
    pub async fn commit_with(
        &self,
        generation: u64,
        turns: Vec<Turn>,
        learned: Option<&ReaderPreferences>,
    ) -> bool {
        let mut transcript = self.transcript.write().await;
        if transcript.generation != generation {
            debug!(
                "Session {} cleared mid-turn, dropping {} turns",
                self.key,
                turns.len()
            );
            return false;
        }
        for turn in turns {
            transcript.push(turn);
        }
        if let Some(learned) = learned {
            if transcript.preferences.merge(learned) {
                info!("Session {} preferences: {:?}", self.key, transcript.preferences);
            }
        }
        self.touch();
        true
    }

    pub async fn generation(&self) -> u64 {
        self.transcript.read().await.generation
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.transcript.read().await.turns.clone()
    }

    pub async fn turn_count(&self) -> usize {
        self.transcript.read().await.turns.len()
    }

    pub async fn preferences(&self) -> ReaderPreferences {
        self.transcript.read().await.preferences.clone()
    }

    /// Forget the transcript and the reader's preferences.
    pub async fn clear(&self) {
        let mut transcript = self.transcript.write().await;
        transcript.turns.clear();
        transcript.preferences = ReaderPreferences::default();
        transcript.generation += 1;
        self.touch();
    }
}

/// Listing row for `SessionStore::list`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub state: AgentState,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionKey, Arc<SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: &SessionKey) -> Arc<SessionEntry> {
        let entry = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Session {} created", key);
                Arc::new(SessionEntry::new(key.clone()))
            })
            .clone();
        entry.touch();
        entry
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<SessionEntry>> {
        self.sessions.get(key).map(|e| e.clone())
    }

    pub async fn append_turn(&self, key: &SessionKey, turn: Turn) {
        self.get_or_create(key).append(turn).await;
    }

    /// Snapshot of the transcript. Empty for unknown sessions.
    pub async fn get_history(&self, key: &SessionKey) -> Vec<Turn> {
        match self.get(key) {
            Some(entry) => entry.history().await,
            None => Vec::new(),
        }
    }

    /// Empty for unknown sessions.
    pub async fn get_preferences(&self, key: &SessionKey) -> ReaderPreferences {
        match self.get(key) {
            Some(entry) => entry.preferences().await,
            None => ReaderPreferences::default(),
        }
    }

    pub async fn export(&self, key: &SessionKey) -> Vec<TranscriptRecord> {
        self.get_history(key)
            .await
            .iter()
            .map(Turn::to_record)
            .collect()
    }

    pub async fn clear(&self, key: &SessionKey) {
        if let Some(entry) = self.get(key) {
            entry.clear().await;
            info!("Session {} cleared", key);
        }
    }

    pub fn remove(&self, key: &SessionKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    pub fn state(&self, key: &SessionKey) -> Option<AgentState> {
        self.get(key).map(|e| e.state())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let entries: Vec<Arc<SessionEntry>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(SessionInfo {
                key: entry.key.clone(),
                turns: entry.turn_count().await,
                created_at: entry.created_at,
                last_active_at: entry.last_active_at(),
                state: entry.state(),
            });
        }
        out.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        out
    }

    /// Drop sessions idle for longer than `ttl`. Sessions running a turn are
    /// kept regardless. Returns how many were evicted.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            let idle = (now - entry.last_active_at()).to_std().unwrap_or_default();
            entry.is_busy() || idle <= ttl
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    /// Run `evict_idle` every `interval` until `cancel` fires.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.evict_idle(ttl);
                    }
                }
            }
            debug!("Idle session sweeper stopped");
        })
    }
}
