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

//! Lock-free engine metrics
//!
//! Counters live in atomics so tests and the host process can read them
//! without touching the reactor. Every update is mirrored to the `metrics`
//! facade for whatever recorder the host installs.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Engine counters
#[derive(Debug)]
pub struct EngineMetrics {
    // Sessions
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    total_session_duration_ns: AtomicU64,

    // Handshakes
    negotiations_failed: AtomicU64,

    // Throughput
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    messages_routed: AtomicU64,

    // Errors and limits
    protocol_errors: AtomicU64,
    idle_timeouts: AtomicU64,
    login_failures: AtomicU64,

    started_at: Instant,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self {
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            total_session_duration_ns: AtomicU64::new(0),
            negotiations_failed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            login_failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// A session started
    pub fn session_started(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        let active = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("termgate.sessions.started").increment(1);
        gauge!("termgate.sessions.active").set(active as f64);
    }

    /// A session ended after `duration`
    pub fn session_ended(&self, duration: Duration) {
        let active = self
            .active_sessions
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        self.total_session_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        gauge!("termgate.sessions.active").set(active as f64);
    }

    /// A handshake failed or timed out
    pub fn negotiation_failed(&self) {
        self.negotiations_failed.fetch_add(1, Ordering::Relaxed);
        counter!("termgate.negotiations.failed").increment(1);
    }

    /// Bytes read from client sockets
    pub fn bytes_received(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
        counter!("termgate.bytes.received").increment(count);
    }

    /// Bytes written to client sockets
    pub fn bytes_sent(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
        counter!("termgate.bytes.sent").increment(count);
    }

    /// A routed or broadcast event was delivered
    pub fn message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        counter!("termgate.messages.routed").increment(1);
    }

    /// A client broke protocol
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        counter!("termgate.errors.protocol").increment(1);
    }

    /// A session was closed for inactivity
    pub fn idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("termgate.sessions.idle_timeouts").increment(1);
    }

    /// A session reported a failed login
    pub fn login_failed(&self) {
        self.login_failures.fetch_add(1, Ordering::Relaxed);
        counter!("termgate.logins.failed").increment(1);
    }

    /// Number of running sessions
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_sessions = self.total_sessions.load(Ordering::Relaxed);
        let ended = total_sessions.saturating_sub(self.active_sessions.load(Ordering::Relaxed));
        let avg_session_duration = if ended == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_session_duration_ns.load(Ordering::Relaxed) / ended)
        };
        MetricsSnapshot {
            total_sessions,
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            negotiations_failed: self.negotiations_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            login_failures: self.login_failures.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_session_duration,
        }
    }
}

/// Engine counters at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Sessions started since the engine came up
    pub total_sessions: u64,
    /// Sessions running now
    pub active_sessions: u64,
    /// Failed or timed out handshakes
    pub negotiations_failed: u64,
    /// Bytes read from clients
    pub bytes_received: u64,
    /// Bytes written to clients
    pub bytes_sent: u64,
    /// Routed and broadcast deliveries
    pub messages_routed: u64,
    /// Clients dropped for protocol violations
    pub protocol_errors: u64,
    /// Sessions closed for inactivity
    pub idle_timeouts: u64,
    /// Failed logins reported by sessions
    pub login_failures: u64,
    /// Time since the engine came up
    pub uptime: Duration,
    /// Mean lifetime of finished sessions
    pub avg_session_duration: Duration,
}

impl MetricsSnapshot {
    /// Mean outbound throughput since start
    pub fn bytes_sent_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.uptime.as_secs_f64()
    }
}
