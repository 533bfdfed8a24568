use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

/// Supervisor-owned liveness state, read by both watchdogs.
#[derive(Debug)]
pub struct StreamHealth {
    state: ConnectionState,
    attempt: u64,
    last_message_at: Option<Instant>,
    connect_started_at: Option<Instant>,
    reconnect_requested: bool,
    reconnects: u64,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_message_at: None,
            connect_started_at: None,
            reconnect_requested: false,
            reconnects: 0,
        }
    }
}

impl StreamHealth {
    /// Start a new connect attempt and return its number.
    pub fn begin_connect(&mut self, now: Instant) -> u64 {
        if self.attempt > 0 {
            self.reconnects += 1;
        }
        self.attempt += 1;
        self.state = ConnectionState::Connecting;
        self.connect_started_at = Some(now);
        self.reconnect_requested = false;
        self.attempt
    }

    pub fn mark_streaming(&mut self, now: Instant) {
        self.state = ConnectionState::Streaming;
        self.connect_started_at = None;
        // A connect-timeout raised for this attempt no longer applies.
        self.reconnect_requested = false;
        self.last_message_at = Some(now);
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_message_at = Some(now);
    }

    pub fn mark_reconnecting(&mut self) {
        self.state = ConnectionState::Reconnecting;
    }

    pub fn mark_stopped(&mut self) {
        self.state = ConnectionState::Stopped;
    }

    /// Attempt to abandon when a streaming connection went silent.
    ///
    /// Returns `Some` at most once per attempt.
    pub fn check_stale(&mut self, now: Instant, timeout: Duration) -> Option<u64> {
        if self.state != ConnectionState::Streaming || self.reconnect_requested {
            return None;
        }
        let last = self.last_message_at?;
        if now.saturating_duration_since(last) <= timeout {
            return None;
        }
        self.reconnect_requested = true;
        Some(self.attempt)
    }

    /// Attempt to abandon when a connect call has not returned in time.
    ///
    /// Returns `Some` at most once per attempt.
    pub fn check_connect(&mut self, now: Instant, timeout: Duration) -> Option<u64> {
        if self.state != ConnectionState::Connecting || self.reconnect_requested {
            return None;
        }
        let started = self.connect_started_at?;
        if now.saturating_duration_since(started) <= timeout {
            return None;
        }
        self.reconnect_requested = true;
        Some(self.attempt)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn last_message_at(&self) -> Option<Instant> {
        self.last_message_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn stale_is_reported_once_per_attempt() {
        let t0 = Instant::now();
        let mut h = StreamHealth::default();
        let attempt = h.begin_connect(t0);
        h.mark_streaming(t0);

        assert_eq!(h.check_stale(t0 + Duration::from_secs(5), TIMEOUT), None);
        assert_eq!(
            h.check_stale(t0 + Duration::from_secs(11), TIMEOUT),
            Some(attempt)
        );
        assert_eq!(h.check_stale(t0 + Duration::from_secs(12), TIMEOUT), None);
        assert_eq!(h.check_stale(t0 + Duration::from_secs(60), TIMEOUT), None);

        let next = h.begin_connect(t0 + Duration::from_secs(12));
        assert_eq!(next, attempt + 1);
        assert_eq!(h.reconnects(), 1);
    }

    #[test]
    fn messages_keep_stream_fresh() {
        let t0 = Instant::now();
        let mut h = StreamHealth::default();
        h.begin_connect(t0);
        h.mark_streaming(t0);
        h.touch(t0 + Duration::from_secs(8));
        assert_eq!(h.check_stale(t0 + Duration::from_secs(15), TIMEOUT), None);
    }

    #[test]
    fn stale_check_ignores_non_streaming_states() {
        let t0 = Instant::now();
        let mut h = StreamHealth::default();
        h.begin_connect(t0);
        assert_eq!(h.check_stale(t0 + Duration::from_secs(60), TIMEOUT), None);
    }

    #[test]
    fn hung_connect_is_reported_once() {
        let t0 = Instant::now();
        let mut h = StreamHealth::default();
        let attempt = h.begin_connect(t0);

        assert_eq!(h.check_connect(t0 + Duration::from_secs(10), TIMEOUT), None);
        assert_eq!(
            h.check_connect(t0 + Duration::from_secs(11), TIMEOUT),
            Some(attempt)
        );
        assert_eq!(h.check_connect(t0 + Duration::from_secs(12), TIMEOUT), None);

        h.mark_streaming(t0 + Duration::from_secs(12));
        assert_eq!(h.check_connect(t0 + Duration::from_secs(60), TIMEOUT), None);
    }

    #[test]
    fn late_connect_still_gets_stale_detection() {
        let t0 = Instant::now();
        let mut h = StreamHealth::default();
        let attempt = h.begin_connect(t0);
        assert_eq!(
            h.check_connect(t0 + Duration::from_secs(11), TIMEOUT),
            Some(attempt)
        );

        // The connect call returned before the owner saw the timeout.
        h.mark_streaming(t0 + Duration::from_secs(11));
        assert_eq!(
            h.check_stale(t0 + Duration::from_secs(3_600), TIMEOUT),
            Some(attempt)
        );
    }
}
