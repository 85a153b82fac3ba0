use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use rustc_hash::FxHashMap;

use crate::session::{Session, SessionId};

/// The set of live sessions, keyed by session id.
///
/// This is a plain owned value. It gets injected into whichever dispatch
/// shell is active, and the shell decides how access is serialized (see the
/// dispatch module); the table itself does no locking.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: FxHashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable { sessions: FxHashMap::default() }
    }

    /// Looks up a session, creating it in `HelloWait` if absent; the flag
    /// says whether this call created it. Only the HELLO handling path may
    /// call this, all other inbound traffic routes through [get_mut](SessionTable::get_mut).
    pub fn get_or_create(&mut self, session_id: SessionId, peer_addr: SocketAddr, now: Instant) -> (&mut Session, bool) {
        let mut created = false;
        let session = self.sessions.entry(session_id)
            .or_insert_with(|| {
                created = true;
                Session::new(session_id, peer_addr, now)
            });
        (session, created)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn remove(&mut self, session_id: SessionId) -> Option<Session> {
        self.sessions.remove(&session_id)
    }

    /// Evicts every session that has been idle for longer than `timeout` and
    /// returns them, so the caller can notify the peers and log the closes.
    pub fn sweep_expired(&mut self, now: Instant, timeout: Duration) -> Vec<Session> {
        let expired: Vec<SessionId> = self.sessions.values()
            .filter(|s| s.is_expired(now, timeout))
            .map(|s| s.session_id)
            .collect();

        expired.iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
