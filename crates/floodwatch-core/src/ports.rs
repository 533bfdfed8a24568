//! Hexagonal ports: the feed transport, the persistence sink, the reply
//! channel, and the clock.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{AuthorId, Message},
    persistence::StatementKind,
    Result,
};

// ============== Feed Transport ==============

/// Events emitted by a live feed connection.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    Data(Message),
    Warning {
        code: String,
        message: String,
    },
    Disconnect {
        code: String,
        reason: Option<String>,
    },
    Error {
        error: String,
        code: Option<String>,
    },
    End,
    Destroy,
}

/// One established feed connection.
///
/// Dropping the receiver or cancelling `cancel` tears the connection down;
/// transports must observe both.
#[derive(Debug)]
pub struct FeedConnection {
    pub events: mpsc::Receiver<FeedEvent>,
    pub cancel: CancellationToken,
}

impl FeedConnection {
    pub fn close(self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Check credentials before streaming. Failure is fatal for the caller.
    async fn verify_credentials(&self) -> Result<()>;

    /// Open a new connection. May hang; the supervisor abandons hung attempts.
    async fn connect(&self) -> Result<FeedConnection>;
}

// ============== Persistence Sink ==============

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Execute one statement and return its rows.
    async fn execute(&self, kind: StatementKind, params: Vec<Value>) -> Result<Vec<Value>>;
}

// ============== Reply Channel ==============

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub author: AuthorId,
    pub in_reply_to: String,
    pub text: String,
}

#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send(&self, reply: &OutboundReply) -> Result<()>;
}

// ============== Clock ==============

/// Time source for watchdogs and reply timestamps.
pub trait Clock: Send + Sync {
    /// Monotonic time (tokio's clock, so paused-time tests apply).
    fn now(&self) -> Instant;
    /// Wall-clock time.
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(base_utc: DateTime<Utc>) -> Self {
        Self {
            base: Instant::now(),
            base_utc,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or(chrono::Duration::zero());
        self.base_utc + offset
    }
}
