/*!
Rekey scheduling for PQ-DTLS sessions.

The scheduler decides when a connected session moves to the next key epoch:
on a periodic tick while traffic is flowing, or once the bytes sent under the
current keys pass the data limit. It takes the current time as an argument so
the session stays free of clocks.
*/

use std::time::{Duration, Instant};

use crate::core::constants::defaults;

/// Parameters for when to rekey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyParams {
    /// Tick interval for automatic rekeying; `None` disables the timer
    pub interval: Option<Duration>,

    /// Bytes sent under one key block before a forced rekey
    pub data_limit: u64,
}

impl Default for RekeyParams {
    fn default() -> Self {
        Self { interval: None, data_limit: defaults::REKEY_DATA_LIMIT }
    }
}

/// Traffic counters for the current key epoch
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    /// When the current keys were installed
    pub last_rotation: Instant,

    /// Last time application data moved in either direction
    pub last_activity: Instant,

    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
}

impl SessionStats {
    pub fn new(now: Instant) -> Self {
        Self {
            last_rotation: now,
            last_activity: now,
            messages_sent: 0,
            bytes_sent: 0,
            messages_received: 0,
            bytes_received: 0,
        }
    }

    /// Reset counters for a new epoch; activity time carries over
    pub fn reset(&mut self, now: Instant) {
        let last_activity = self.last_activity;
        *self = Self::new(now);
        self.last_activity = last_activity;
    }

    pub fn track_sent(&mut self, bytes: usize, now: Instant) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_activity = now;
    }

    pub fn track_received(&mut self, bytes: usize, now: Instant) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = now;
    }
}

/// Rekey scheduler for one session
#[derive(Debug, Clone)]
pub struct RekeyScheduler {
    params: RekeyParams,
    stats: SessionStats,
    next_tick: Option<Instant>,
    last_peer_rekey: Option<Instant>,
}

impl RekeyScheduler {
    pub fn new(params: RekeyParams, now: Instant) -> Self {
        Self { params, stats: SessionStats::new(now), next_tick: None, last_peer_rekey: None }
    }

    pub fn params(&self) -> &RekeyParams {
        &self.params
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Arm the periodic tick
    pub fn arm(&mut self, interval: Duration, now: Instant) {
        self.params.interval = Some(interval);
        self.next_tick = Some(now + interval);
    }

    /// Cancel the periodic tick
    pub fn disarm(&mut self) {
        self.next_tick = None;
    }

    /// When the next tick is due, if armed
    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn track_sent(&mut self, bytes: usize, now: Instant) {
        self.stats.track_sent(bytes, now);
    }

    pub fn track_received(&mut self, bytes: usize, now: Instant) {
        self.stats.track_received(bytes, now);
    }

    /// Handle a tick at `now`; true when the session should rekey
    ///
    /// A tick rekeys only if traffic moved within the last two intervals and
    /// the peer has not already moved us forward within half an interval.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        let Some(interval) = self.params.interval else {
            return false;
        };
        match self.next_tick {
            Some(due) if now >= due => {}
            _ => return false,
        }
        self.next_tick = Some(now + interval);

        let active = now.saturating_duration_since(self.stats.last_activity) <= interval * 2;
        let caught_up_recently = self
            .last_peer_rekey
            .is_some_and(|at| now.saturating_duration_since(at) < interval / 2);

        active && !caught_up_recently
    }

    /// Whether the bytes sent under the current keys exceed the limit
    pub fn data_limit_reached(&self) -> bool {
        self.stats.bytes_sent >= self.params.data_limit
    }

    /// Reset counters after a local rekey
    pub fn complete_rotation(&mut self, now: Instant) {
        self.stats.reset(now);
    }

    /// Reset counters after following the peer into a new epoch
    pub fn note_peer_rekey(&mut self, now: Instant) {
        self.last_peer_rekey = Some(now);
        self.stats.reset(now);
    }
}
