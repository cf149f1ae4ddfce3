//! In-memory escrow session store.
//!
//! Sessions live in a `parking_lot::Mutex<HashMap>` and expire lazily:
//! every lookup first drops whatever has passed its `expires_at_ms`. There
//! is no background sweeper and no persistence. Restarting the node
//! forgets every session, which is fine because the wallet holds the real
//! multisig state.
//!
//! ## Updates
//!
//! [`EscrowStore::update`] runs a closure on a *copy* of the session and
//! commits it only if the closure succeeds. A failed transition leaves the
//! stored session byte-for-byte untouched, including its expiry.
//!
//! ## Size observer
//!
//! [`EscrowStore::observe_size`] registers a callback that receives the
//! live session count whenever a create, prune or remove changes it. The
//! node uses it to drive its active-session gauge. It runs under the
//! store lock, so it must be cheap and must not call back into the store.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngCore;

use dstream_protocol::clock::{Clock, SharedClock};
use dstream_protocol::config::{DEFAULT_ESCROW_SESSION_TTL_SECS, ESCROW_SESSION_ID_BYTES};

use crate::error::EscrowError;
use crate::session::{EscrowSession, NewEscrowSession};

type SizeObserver = Box<dyn Fn(usize) + Send + Sync>;

pub struct EscrowStore {
    sessions: Mutex<HashMap<String, EscrowSession>>,
    clock: SharedClock,
    ttl: Duration,
    on_size: Option<SizeObserver>,
}

impl EscrowStore {
    pub fn new(clock: SharedClock, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            ttl,
            on_size: None,
        }
    }

    /// Calls `f` with the session count after every change to it.
    pub fn observe_size(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_size = Some(Box::new(f));
        self
    }

    fn notify_size(&self, len: usize) {
        if let Some(f) = &self.on_size {
            f(len);
        }
    }

    fn prune_locked(&self, sessions: &mut HashMap<String, EscrowSession>, now_ms: u64) -> usize {
        let dropped = prune(sessions, now_ms);
        if dropped > 0 {
            self.notify_size(sessions.len());
        }
        dropped
    }

    /// Store with the default one-hour TTL.
    pub fn with_default_ttl(clock: SharedClock) -> Self {
        Self::new(clock, Duration::from_secs(DEFAULT_ESCROW_SESSION_TTL_SECS))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Inserts a new session under a fresh random id.
    pub fn create(&self, new: NewEscrowSession) -> EscrowSession {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        self.prune_locked(&mut sessions, now);

        let id = loop {
            let id = new_session_id();
            if !sessions.contains_key(&id) {
                break id;
            }
        };
        let session = EscrowSession::from_new(id.clone(), new, now, self.ttl_ms());
        sessions.insert(id, session.clone());
        self.notify_size(sessions.len());
        tracing::debug!(
            session_id = %session.id,
            participants = session.participant_pubkeys.len(),
            threshold = session.threshold,
            "escrow session created"
        );
        session
    }

    /// Snapshot of a live session. Does not extend its lifetime.
    pub fn get(&self, id: &str) -> Result<EscrowSession, EscrowError> {
        let mut sessions = self.sessions.lock();
        self.prune_locked(&mut sessions, self.clock.now_ms());
        sessions.get(id).cloned().ok_or(EscrowError::NotFound)
    }

    /// Extends a session's lifetime and returns the refreshed snapshot.
    pub fn touch(&self, id: &str) -> Result<EscrowSession, EscrowError> {
        self.update(id, |_| Ok(())).map(|(_, s)| s)
    }

    /// Applies `f` to a copy of the session; on success the copy replaces
    /// the stored session and is touched.
    pub fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut EscrowSession) -> Result<T, EscrowError>,
    ) -> Result<(T, EscrowSession), EscrowError> {
        let now = self.clock.now_ms();
        let mut sessions = self.sessions.lock();
        self.prune_locked(&mut sessions, now);

        let stored = sessions.get_mut(id).ok_or(EscrowError::NotFound)?;
        let mut draft = stored.clone();
        let out = f(&mut draft)?;
        draft.updated_at_ms = now;
        draft.expires_at_ms = now.saturating_add(self.ttl_ms());
        *stored = draft.clone();
        Ok((out, draft))
    }

    pub fn remove(&self, id: &str) -> Option<EscrowSession> {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(id);
        if removed.is_some() {
            self.notify_size(sessions.len());
        }
        removed
    }

    /// Drops expired sessions now. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        self.prune_locked(&mut sessions, self.clock.now_ms())
    }

    /// Live session count (expired-but-unpruned sessions included).
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(sessions: &mut HashMap<String, EscrowSession>, now_ms: u64) -> usize {
    let before = sessions.len();
    sessions.retain(|_, s| s.expires_at_ms > now_ms);
    let dropped = before - sessions.len();
    if dropped > 0 {
        tracing::debug!(dropped, "pruned expired escrow sessions");
    }
    dropped
}

fn new_session_id() -> String {
    let mut bytes = [0u8; ESCROW_SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dstream_protocol::clock::ManualClock;
    use dstream_protocol::nostr::StreamIdentity;

    use super::*;
    use crate::session::{ContributionRound, EscrowPhase};

    fn new_session() -> NewEscrowSession {
        NewEscrowSession {
            stream: StreamIdentity::parse(&"c".repeat(64), "s").unwrap(),
            coordinator_pubkey: "c".repeat(64),
            participant_pubkeys: vec!["p1".into()],
            threshold: 2,
            coordinator_prepare_info: "coord".into(),
        }
    }

    fn store(clock: Arc<ManualClock>) -> EscrowStore {
        EscrowStore::new(clock, Duration::from_secs(10))
    }

    #[test]
    fn ids_are_random_hex() {
        let s = store(Arc::new(ManualClock::new(0)));
        let a = s.create(new_session());
        let b = s.create(new_session());
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id, b.id);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn expires_lazily_and_touch_extends() {
        let clock = Arc::new(ManualClock::new(1_000));
        let s = store(clock.clone());
        let id = s.create(new_session()).id;

        clock.set_ms(9_000);
        let touched = s.touch(&id).unwrap();
        assert_eq!(touched.updated_at_ms, 9_000);
        assert_eq!(touched.expires_at_ms, 19_000);

        clock.set_ms(18_999);
        assert!(s.get(&id).is_ok());
        clock.set_ms(19_000);
        assert!(matches!(s.get(&id), Err(EscrowError::NotFound)));
        assert!(s.is_empty());
    }

    #[test]
    fn failed_update_commits_nothing() {
        let clock = Arc::new(ManualClock::new(1_000));
        let s = store(clock.clone());
        let id = s.create(new_session()).id;
        clock.set_ms(2_000);

        let err = s
            .update(&id, |sess| {
                sess.record_contribution("p1", ContributionRound::Prepare, "i".into())?;
                sess.apply_import(1)
            })
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidPhase { .. }));

        let stored = s.get(&id).unwrap();
        assert_eq!(stored.phase, EscrowPhase::CollectingPrepare);
        assert!(stored.participant_prepare_infos.is_empty());
        assert_eq!(stored.updated_at_ms, 1_000);
    }

    #[test]
    fn unknown_session() {
        let s = store(Arc::new(ManualClock::new(0)));
        assert!(matches!(s.touch("nope"), Err(EscrowError::NotFound)));
        assert!(s.remove("nope").is_none());
        assert_eq!(s.prune_expired(), 0);
    }

    #[test]
    fn size_observer_sees_creates_and_prunes_only() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let clock = Arc::new(ManualClock::new(0));
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let calls = Arc::new(AtomicUsize::new(0));
        let s = store(clock.clone()).observe_size({
            let (seen, calls) = (seen.clone(), calls.clone());
            move |n| {
                seen.store(n, Ordering::SeqCst);
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        let a = s.create(new_session()).id;
        clock.set_ms(5_000);
        let b = s.create(new_session()).id;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        // Reads and updates leave the count alone.
        s.get(&a).unwrap();
        s.touch(&b).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // `a` expires at 10s; the next read prunes it.
        clock.set_ms(12_000);
        assert!(s.get(&b).is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(s.remove(&b).is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
