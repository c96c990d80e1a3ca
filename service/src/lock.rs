//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Named locks shared between sessions
//!
//! Each lock is either unheld or held by one session id since some instant.
//! Both operations are synchronous map updates run inline by the reactor.

use crate::types::SessionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Current holder of a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Session that holds the lock
    pub session: SessionId,
    /// When it was granted
    pub since: Instant,
}

/// Registry of named locks
#[derive(Debug, Default)]
pub struct LockManager {
    locks: HashMap<String, LockHolder>,
}

impl LockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take `name` for `requester`
    ///
    /// Granted when the lock is unheld, already held by the requester, held
    /// by a session `is_live` no longer knows, or held longer than
    /// `stale_after`. Denied otherwise.
    pub fn acquire(
        &mut self,
        name: &str,
        requester: &SessionId,
        stale_after: Option<Duration>,
        is_live: impl Fn(&SessionId) -> bool,
    ) -> bool {
        let now = Instant::now();
        let grant = match self.locks.get(name) {
            None => true,
            Some(holder) if holder.session == *requester => true,
            Some(holder) if !is_live(&holder.session) => {
                info!(lock = name, holder = %holder.session, requester = %requester, "Reclaiming lock from departed session");
                true
            }
            Some(holder) => match stale_after {
                Some(stale) if now.duration_since(holder.since) >= stale => {
                    warn!(
                        lock = name,
                        holder = %holder.session,
                        requester = %requester,
                        held = ?now.duration_since(holder.since),
                        "Forcibly reassigning stale lock"
                    );
                    true
                }
                _ => false,
            },
        };
        if grant {
            self.locks.insert(
                name.to_string(),
                LockHolder {
                    session: requester.clone(),
                    since: now,
                },
            );
            debug!(lock = name, holder = %requester, "Lock granted");
        } else {
            debug!(lock = name, requester = %requester, "Lock denied");
        }
        grant
    }

    /// Release `name`; returns whether it was held
    pub fn release(&mut self, name: &str, requester: &SessionId) -> bool {
        match self.locks.remove(name) {
            Some(holder) => {
                if holder.session != *requester {
                    warn!(lock = name, holder = %holder.session, requester = %requester, "Lock released by a session that did not hold it");
                }
                debug!(lock = name, "Lock released");
                true
            }
            None => {
                error!(lock = name, requester = %requester, "Release of a lock that is not held");
                false
            }
        }
    }

    /// Current holder of `name`
    pub fn holder(&self, name: &str) -> Option<&LockHolder> {
        self.locks.get(name)
    }

    /// Number of held locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock is held
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tracing_test::traced_test;

    fn ids() -> (SessionId, SessionId) {
        (
            SessionId::from("telnet-127.0.0.1:1001"),
            SessionId::from("telnet-127.0.0.1:1002"),
        )
    }

    #[test]
    fn test_reentrant_and_exclusive() {
        let (a, b) = ids();
        let live: HashSet<SessionId> = [a.clone(), b.clone()].into();
        let is_live = |id: &SessionId| live.contains(id);
        let mut locks = LockManager::new();

        assert!(locks.acquire("msg-42", &a, None, is_live));
        assert!(locks.acquire("msg-42", &a, None, is_live));
        assert!(!locks.acquire("msg-42", &b, None, is_live));
        assert!(locks.release("msg-42", &a));
        assert!(locks.acquire("msg-42", &b, None, is_live));
        assert_eq!(locks.holder("msg-42").unwrap().session, b);
    }

    #[test]
    fn test_departed_holder_is_reclaimed() {
        let (a, b) = ids();
        let mut locks = LockManager::new();
        assert!(locks.acquire("X", &a, None, |_| true));
        // a has left the registry
        assert!(locks.acquire("X", &b, None, |id| *id == b));
        assert_eq!(locks.holder("X").unwrap().session, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_lock_is_reassigned() {
        let (a, b) = ids();
        let mut locks = LockManager::new();
        assert!(locks.acquire("X", &a, None, |_| true));
        assert!(!locks.acquire("X", &b, Some(Duration::from_secs(30)), |_| true));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!locks.acquire("X", &b, None, |_| true));
        assert!(locks.acquire("X", &b, Some(Duration::from_secs(30)), |_| true));
    }

    #[traced_test]
    #[test]
    fn test_release_without_acquire_logs_error() {
        let (a, _) = ids();
        let mut locks = LockManager::new();
        assert!(!locks.release("nothing", &a));
        assert!(locks.is_empty());
        assert!(logs_contain("Release of a lock that is not held"));
    }
}
