// SPDX-License-Identifier: MIT
//
// In-memory scan session store -- the single source of truth shared by the
// desktop (polling) and mobile (capturing) clients, which never talk to
// each other directly.
//
// The store is constructed once at process start and passed by reference
// (Arc) to request handlers and the expiry sweeper; there is no ambient
// global state. A single store-wide mutex guards the session map: expected
// concurrency is one mobile client per session plus a polling desktop, all
// mutations are in-memory appends/removes with no I/O inside the critical
// section, so lock hold times are sub-microsecond and finer-grained
// per-session locking would buy nothing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use scanbridge_core::error::{Result, ScanbridgeError};
use scanbridge_core::types::{SessionId, SessionSnapshot};

/// A live scan session. Owned exclusively by the store; clients only ever
/// hold the id.
struct ScanSession {
    /// Ordered image payloads. Insertion order is capture order and
    /// determines the final page order of the assembled PDF.
    images: Vec<String>,
    created_at: DateTime<Utc>,
    /// Refreshed on every read or write; drives expiry. A polling read
    /// counts as activity because the mobile device may be the only client
    /// keeping the session alive.
    last_activity: Instant,
}

impl ScanSession {
    fn new() -> Self {
        Self {
            images: Vec::new(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }
}

/// Limits applied to the store, derived from [`scanbridge_core::AppConfig`].
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_sessions: usize,
    pub max_images_per_session: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            max_images_per_session: 100,
        }
    }
}

/// In-memory session store with inactivity-based expiry.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, ScanSession>>,
    /// Sessions inactive for longer than this are removed by the sweep.
    timeout: Duration,
    limits: StoreLimits,
}

impl SessionStore {
    /// Create a store with the given inactivity timeout and limits.
    pub fn new(timeout: Duration, limits: StoreLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
            limits,
        }
    }

    /// Create a store with default limits (useful for tests).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, StoreLimits::default())
    }

    /// The configured inactivity timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Allocate a new session with a fresh unique id and an empty image
    /// list. Fails only when the live-session cap is reached.
    pub fn create(&self) -> Result<SessionId> {
        let mut sessions = self.lock();

        if sessions.len() >= self.limits.max_sessions {
            return Err(ScanbridgeError::SessionLimit(self.limits.max_sessions));
        }

        // Check-and-insert under the lock. A v4 UUID collision is not a
        // realistic event, but the loop makes the uniqueness invariant
        // explicit rather than probabilistic.
        let id = loop {
            let candidate = SessionId::new();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        sessions.insert(id, ScanSession::new());
        info!(session_id = %id, live = sessions.len(), "scan session created");
        Ok(id)
    }

    /// Return a consistent snapshot of the session and refresh its
    /// activity timestamp.
    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or(ScanbridgeError::SessionNotFound(*id))?;

        session.last_activity = Instant::now();
        Ok(SessionSnapshot {
            session_id: *id,
            images: session.images.clone(),
            image_count: session.images.len(),
            created_at: session.created_at,
        })
    }

    /// Explicitly finish a session, removing it from the store.
    ///
    /// Idempotent: returns `true` if the session existed. Either client may
    /// call this; any later operation on the id reports not-found.
    pub fn close(&self, id: &SessionId) -> bool {
        let existed = self.lock().remove(id).is_some();
        if existed {
            info!(session_id = %id, "scan session closed");
        }
        existed
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    // -- Mutation -------------------------------------------------------------

    /// Append a captured image to the end of the session's image list.
    ///
    /// Empty payloads are a caller error and are rejected before the store
    /// is touched. Returns the new image count.
    pub fn append_image(&self, id: &SessionId, image_data: String) -> Result<usize> {
        if image_data.is_empty() {
            return Err(ScanbridgeError::EmptyImagePayload);
        }

        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or(ScanbridgeError::SessionNotFound(*id))?;

        if session.images.len() >= self.limits.max_images_per_session {
            return Err(ScanbridgeError::ImageLimit(
                self.limits.max_images_per_session,
            ));
        }

        session.images.push(image_data);
        session.last_activity = Instant::now();

        let count = session.images.len();
        debug!(session_id = %id, count, "image appended");
        Ok(count)
    }

    /// Remove the image at `index`, preserving the order of the rest.
    ///
    /// Bounds are validated under the same lock that guards appends, so a
    /// concurrent append can never turn a valid index invalid mid-removal.
    /// Out-of-range indices fail with no side effects. Returns the new
    /// image count.
    pub fn remove_image(&self, id: &SessionId, index: usize) -> Result<usize> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or(ScanbridgeError::SessionNotFound(*id))?;

        if index >= session.images.len() {
            return Err(ScanbridgeError::ImageIndexOutOfRange {
                index,
                len: session.images.len(),
            });
        }

        // Vec::remove shifts the tail left, keeping relative order.
        session.images.remove(index);
        session.last_activity = Instant::now();

        let count = session.images.len();
        debug!(session_id = %id, index, count, "image removed");
        Ok(count)
    }

    // -- Expiry ---------------------------------------------------------------

    /// Remove every session whose inactivity, measured against `now`,
    /// exceeds the timeout. Returns the number of sessions removed.
    ///
    /// The instant is injected so tests can drive expiry deterministically;
    /// the background sweeper simply passes `Instant::now()`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();

        sessions.retain(|id, session| {
            let stale = now
                .checked_duration_since(session.last_activity)
                .is_some_and(|idle| idle > self.timeout);
            if stale {
                info!(session_id = %id, "scan session expired");
            }
            !stale
        });

        before - sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, ScanSession>> {
        self.sessions.lock().expect("session store lock poisoned")
    }

    /// Shift a session's activity timestamp into the past, as if it had
    /// been idle for `by`. Test seam for expiry behaviour.
    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, id: &SessionId, by: Duration) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(id) {
            session.last_activity = Instant::now() - by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_store() -> SessionStore {
        SessionStore::with_timeout(Duration::from_secs(60))
    }

    #[test]
    fn fresh_session_is_empty() {
        let store = test_store();
        let id = store.create().expect("create");

        let snap = store.get(&id).expect("get");
        assert_eq!(snap.session_id, id);
        assert!(snap.images.is_empty());
        assert_eq!(snap.image_count, 0);
    }

    #[test]
    fn append_preserves_capture_order() {
        let store = test_store();
        let id = store.create().expect("create");

        for n in 0..5 {
            store
                .append_image(&id, format!("frame-{n}"))
                .expect("append");
        }

        let snap = store.get(&id).expect("get");
        let expected: Vec<String> = (0..5).map(|n| format!("frame-{n}")).collect();
        assert_eq!(snap.images, expected);
    }

    #[test]
    fn remove_keeps_relative_order_of_survivors() {
        let store = test_store();
        let id = store.create().expect("create");
        for payload in ["a", "b", "c", "d"] {
            store.append_image(&id, payload.into()).expect("append");
        }

        let count = store.remove_image(&id, 1).expect("remove");
        assert_eq!(count, 3);

        let snap = store.get(&id).expect("get");
        assert_eq!(snap.images, vec!["a", "c", "d"]);
    }

    #[test]
    fn out_of_range_removal_has_no_side_effects() {
        let store = test_store();
        let id = store.create().expect("create");
        store.append_image(&id, "only".into()).expect("append");

        let err = store.remove_image(&id, 1).expect_err("out of range");
        assert!(matches!(
            err,
            ScanbridgeError::ImageIndexOutOfRange { index: 1, len: 1 }
        ));

        let snap = store.get(&id).expect("get");
        assert_eq!(snap.images, vec!["only"]);
    }

    #[test]
    fn empty_payload_is_rejected() {
        let store = test_store();
        let id = store.create().expect("create");

        let err = store.append_image(&id, String::new()).expect_err("empty");
        assert!(matches!(err, ScanbridgeError::EmptyImagePayload));
        assert_eq!(store.get(&id).expect("get").image_count, 0);
    }

    #[test]
    fn unknown_id_reports_not_found() {
        let store = test_store();
        let ghost = SessionId::new();

        assert!(store.get(&ghost).expect_err("get").is_not_found());
        assert!(
            store
                .append_image(&ghost, "x".into())
                .expect_err("append")
                .is_not_found()
        );
        assert!(
            store
                .remove_image(&ghost, 0)
                .expect_err("remove")
                .is_not_found()
        );
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let store = test_store();
        let id = store.create().expect("create");

        assert!(store.close(&id));
        assert!(!store.close(&id));
        assert!(store.get(&id).expect_err("get after close").is_not_found());
    }

    #[test]
    fn sweep_removes_only_stale_sessions() {
        let store = test_store();
        let stale = store.create().expect("create stale");
        let fresh = store.create().expect("create fresh");

        store.backdate_activity(&stale, Duration::from_secs(120));

        let removed = store.sweep_at(Instant::now());
        assert_eq!(removed, 1);
        assert!(store.get(&stale).expect_err("stale gone").is_not_found());
        assert!(store.get(&fresh).is_ok());
    }

    #[test]
    fn polling_read_counts_as_activity() {
        let store = test_store();
        let id = store.create().expect("create");

        store.backdate_activity(&id, Duration::from_secs(120));
        // The poll refreshes last_activity, so the sweep right after must
        // leave the session alone.
        store.get(&id).expect("poll");

        assert_eq!(store.sweep_at(Instant::now()), 0);
        assert!(store.get(&id).is_ok());
    }

    #[test]
    fn sweep_against_future_instant_expires_everything_idle() {
        let store = test_store();
        let id = store.create().expect("create");

        let removed = store.sweep_at(Instant::now() + Duration::from_secs(61));
        assert_eq!(removed, 1);
        assert!(store.get(&id).expect_err("expired").is_not_found());
    }

    #[test]
    fn session_cap_is_enforced() {
        let store = SessionStore::new(
            Duration::from_secs(60),
            StoreLimits {
                max_sessions: 2,
                max_images_per_session: 100,
            },
        );
        store.create().expect("first");
        store.create().expect("second");

        let err = store.create().expect_err("over cap");
        assert!(matches!(err, ScanbridgeError::SessionLimit(2)));
    }

    #[test]
    fn image_cap_is_enforced() {
        let store = SessionStore::new(
            Duration::from_secs(60),
            StoreLimits {
                max_sessions: 16,
                max_images_per_session: 2,
            },
        );
        let id = store.create().expect("create");
        store.append_image(&id, "1".into()).expect("first");
        store.append_image(&id, "2".into()).expect("second");

        let err = store.append_image(&id, "3".into()).expect_err("over cap");
        assert!(matches!(err, ScanbridgeError::ImageLimit(2)));
        assert_eq!(store.get(&id).expect("get").image_count, 2);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let store = Arc::new(test_store());
        let id = store.create().expect("create");

        let threads = 8;
        let per_thread = 16;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..per_thread {
                        store
                            .append_image(&id, format!("t{t}-{n}"))
                            .expect("append");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread join");
        }

        let snap = store.get(&id).expect("get");
        assert_eq!(snap.image_count, threads * per_thread);

        // Every payload arrived exactly once, and each thread's own frames
        // are still in its submission order.
        for t in 0..threads {
            let mine: Vec<&String> = snap
                .images
                .iter()
                .filter(|img| img.starts_with(&format!("t{t}-")))
                .collect();
            let expected: Vec<String> = (0..per_thread).map(|n| format!("t{t}-{n}")).collect();
            assert_eq!(mine.len(), per_thread);
            for (got, want) in mine.iter().zip(expected.iter()) {
                assert_eq!(*got, want);
            }
        }
    }

    #[test]
    fn handoff_example_scenario() {
        let store = test_store();
        let id = store.create().expect("create");

        assert_eq!(
            store
                .append_image(&id, "data:image/jpeg;base64,AAA".into())
                .expect("append AAA"),
            1
        );
        assert_eq!(
            store
                .append_image(&id, "data:image/jpeg;base64,BBB".into())
                .expect("append BBB"),
            2
        );

        let snap = store.get(&id).expect("get");
        assert_eq!(snap.image_count, 2);
        assert_eq!(
            snap.images,
            vec!["data:image/jpeg;base64,AAA", "data:image/jpeg;base64,BBB"]
        );

        store.remove_image(&id, 0).expect("remove first");
        let snap = store.get(&id).expect("get");
        assert_eq!(snap.image_count, 1);
        assert_eq!(snap.images, vec!["data:image/jpeg;base64,BBB"]);
    }
}
