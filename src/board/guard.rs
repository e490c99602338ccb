//! Board access guard: optional per-board passwords and per-session unlocks.
//!
//! A board without a password is writable by everyone. A board with one is
//! read-only for a session until that session presents the password. Unlocks
//! live with the session, so two browser tabs hold independent state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{Board, BoardId};
use crate::errors::{BoardError, BoardResult};

/// Hex-encoded SHA-256 of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Set or clear a board's password. An empty password removes protection.
pub fn set_password(board: &mut Board, password: &str) {
    board.password_hash = if password.is_empty() {
        None
    } else {
        Some(hash_password(password))
    };
}

/// True if the board has no password or `candidate` matches it.
pub fn verify(board: &Board, candidate: &str) -> bool {
    match &board.password_hash {
        None => true,
        Some(hash) => *hash == hash_password(candidate),
    }
}

/// Per-client session: which protected boards this client has unlocked.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    unlocked: HashSet<BoardId>,
    pub created_at: DateTime<Utc>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            unlocked: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_unlocked(&self, board_id: BoardId) -> bool {
        self.unlocked.contains(&board_id)
    }

    /// Record that this session may write to `board_id`.
    pub fn grant(&mut self, board_id: BoardId) {
        self.unlocked.insert(board_id);
    }

    /// Try the password for `board`. A wrong password leaves the session as it was.
    pub fn request_unlock(&mut self, board: &Board, password: &str) -> BoardResult<()> {
        if !verify(board, password) {
            warn!(board_id = board.id, session = %self.id, "unlock rejected");
            return Err(BoardError::AuthFailure { board_id: board.id });
        }
        self.grant(board.id);
        Ok(())
    }

    pub fn ensure_writable(&self, board: &Board) -> BoardResult<()> {
        if board.has_password() && !self.has_unlocked(board.id) {
            return Err(BoardError::ReadOnly { board_id: board.id });
        }
        Ok(())
    }

    pub fn is_read_only(&self, board: &Board) -> bool {
        self.ensure_writable(board).is_err()
    }
}

/// Sessions unused for this long are forgotten.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

struct SessionEntry {
    context: SessionContext,
    last_seen: Instant,
}

type Sessions = HashMap<Uuid, SessionEntry>;

/// Server-side table of live sessions keyed by id.
pub struct SessionRegistry {
    sessions: Mutex<Sessions>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE)
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_locked(&self, sessions: &mut Sessions) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_ttl);
        before - sessions.len()
    }

    /// Drop every session idle for longer than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let removed = self.sweep_locked(&mut self.sessions());
        if removed > 0 {
            debug!(removed, "expired idle sessions");
        }
        removed
    }

    pub fn create(&self) -> SessionContext {
        self.sweep();
        let session = SessionContext::new();
        self.sessions().insert(
            session.id,
            SessionEntry {
                context: session.clone(),
                last_seen: Instant::now(),
            },
        );
        session
    }

    /// Current state of a session, or a fresh anonymous one if the id is
    /// missing, unknown or expired. Anonymous sessions are not stored.
    pub fn resolve(&self, id: Option<Uuid>) -> SessionContext {
        let Some(id) = id else {
            return SessionContext::new();
        };
        let mut sessions = self.sessions();
        match sessions.get_mut(&id) {
            Some(entry) if entry.last_seen.elapsed() < self.idle_ttl => {
                entry.last_seen = Instant::now();
                entry.context.clone()
            }
            Some(_) => {
                sessions.remove(&id);
                SessionContext::new()
            }
            None => SessionContext::new(),
        }
    }

    /// Record an unlock on the stored session in place. Returns false when
    /// the session is unknown or expired.
    pub fn grant(&self, id: Uuid, board_id: BoardId) -> bool {
        let mut sessions = self.sessions();
        match sessions.get_mut(&id) {
            Some(entry) if entry.last_seen.elapsed() < self.idle_ttl => {
                entry.context.grant(board_id);
                entry.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Secret that authorizes board deletion.
#[derive(Clone)]
pub struct AdminSecret {
    hash: Arc<str>,
}

impl std::fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSecret").finish_non_exhaustive()
    }
}

impl AdminSecret {
    pub fn new(password: &str) -> Self {
        Self {
            hash: hash_password(password).into(),
        }
    }

    /// Use the configured password, or generate one and log it once.
    pub fn from_config(password: Option<&str>) -> Self {
        match password.filter(|p| !p.is_empty()) {
            Some(p) => Self::new(p),
            None => {
                let generated = Uuid::new_v4().simple().to_string();
                info!(admin_password = %generated, "No admin password configured; generated one for this run");
                Self::new(&generated)
            }
        }
    }

    pub fn check(&self, candidate: &str) -> BoardResult<()> {
        if *self.hash == hash_password(candidate) {
            Ok(())
        } else {
            Err(BoardError::AdminAuthFailure)
        }
    }
}
