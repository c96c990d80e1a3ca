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

//! Admission control consulted before a new peer gets any resources

use crate::config::AdmissionConfig;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Accept predicate for new peers
///
/// `admit` is called by the reactor for every accepted socket before a client
/// is constructed; a refused peer is closed without a single byte sent.
pub trait AdmissionPolicy: Send + Sync {
    /// Whether a connection from `ip` may proceed
    fn admit(&self, ip: IpAddr) -> bool;

    /// A session from `ip` reported a failed login
    fn record_failure(&self, _ip: IpAddr) {}
}

/// Admits everyone
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn admit(&self, _ip: IpAddr) -> bool {
        true
    }
}

/// Static ban list plus a sliding-window failed-login counter
///
/// `max_failures` failures within `window` ban the address for
/// `initial_ban`; every further offence doubles the previous ban, capped at
/// `max_ban`.
#[derive(Debug)]
pub struct FailedLoginThrottle {
    window: Duration,
    max_failures: usize,
    initial_ban: Duration,
    max_ban: Duration,
    banned: HashSet<IpAddr>,
    offenders: DashMap<IpAddr, Offender>,
}

#[derive(Debug, Default)]
struct Offender {
    failures: VecDeque<Instant>,
    banned_until: Option<Instant>,
    last_ban: Option<Duration>,
}

impl FailedLoginThrottle {
    /// Build the policy from configuration
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            window: config.window,
            max_failures: config.max_failures,
            initial_ban: config.initial_ban,
            max_ban: config.max_ban,
            banned: config.banned.iter().copied().collect(),
            offenders: DashMap::new(),
        }
    }

    /// Remaining ban time for `ip`, if it is currently banned by the throttle
    pub fn ban_remaining(&self, ip: IpAddr) -> Option<Duration> {
        let now = Instant::now();
        self.offenders
            .get(&ip)
            .and_then(|offender| offender.banned_until)
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

impl AdmissionPolicy for FailedLoginThrottle {
    fn admit(&self, ip: IpAddr) -> bool {
        if self.banned.contains(&ip) {
            info!(peer_ip = %ip, "Refusing banned address");
            return false;
        }
        if let Some(remaining) = self.ban_remaining(ip) {
            info!(peer_ip = %ip, remaining = ?remaining, "Refusing throttled address");
            return false;
        }
        true
    }

    fn record_failure(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut offender = self.offenders.entry(ip).or_default();
        while offender
            .failures
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.window)
        {
            offender.failures.pop_front();
        }
        offender.failures.push_back(now);

        if offender.failures.len() >= self.max_failures {
            let ban = match offender.last_ban {
                Some(previous) => previous.saturating_mul(2).min(self.max_ban),
                None => self.initial_ban,
            };
            offender.failures.clear();
            offender.last_ban = Some(ban);
            offender.banned_until = Some(now + ban);
            warn!(peer_ip = %ip, ban = ?ban, "Too many failed logins, banning address");
        }
    }
}
