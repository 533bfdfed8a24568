//! Reply pacing.
//!
//! The feed caps how fast one account may post, and answering the same
//! author in quick succession reads as spam. Each send books the earliest
//! slot that honours both spacings, then sleeps until it.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};
use tracing::debug;

use crate::{
    ports::{OutboundReply, ReplyChannel},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between any two replies.
    pub global_min_interval: Duration,
    /// Spacing between replies to the same author.
    pub per_author_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_secs(1),
            per_author_min_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Schedule {
    global_next: Instant,
    author_next: HashMap<String, Instant>,
}

impl Schedule {
    fn book(&mut self, author_key: String, now: Instant, cfg: &ThrottleConfig) -> Instant {
        let author_next = self.author_next.get(&author_key).copied().unwrap_or(now);
        let start = now.max(self.global_next).max(author_next);

        self.global_next = start + cfg.global_min_interval;
        self.author_next
            .insert(author_key, start + cfg.per_author_min_interval);
        self.author_next.retain(|_, next| *next > now);
        start
    }
}

/// `ReplyChannel` decorator that paces outbound replies.
pub struct ThrottledReplyChannel {
    inner: Arc<dyn ReplyChannel>,
    cfg: ThrottleConfig,
    schedule: Mutex<Schedule>,
}

impl ThrottledReplyChannel {
    pub fn new(inner: Arc<dyn ReplyChannel>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            schedule: Mutex::new(Schedule {
                global_next: Instant::now(),
                author_next: HashMap::new(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ReplyChannel for ThrottledReplyChannel {
    async fn send(&self, reply: &OutboundReply) -> Result<()> {
        let now = Instant::now();
        let start = self
            .schedule
            .lock()
            .await
            .book(reply.author.ledger_key(), now, &self.cfg);
        if start > now {
            debug!(
                author = %reply.author,
                wait_ms = (start - now).as_millis() as u64,
                "pacing reply"
            );
            sleep_until(start).await;
        }
        self.inner.send(reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthorId;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingChannel {
        at: StdMutex<Vec<Instant>>,
    }

    #[async_trait::async_trait]
    impl ReplyChannel for RecordingChannel {
        async fn send(&self, _reply: &OutboundReply) -> Result<()> {
            self.at.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    fn reply(author: &str) -> OutboundReply {
        OutboundReply {
            author: AuthorId::new(author),
            in_reply_to: "1".to_string(),
            text: "hi".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replies_are_spaced_by_global_interval() {
        let inner = Arc::new(RecordingChannel::default());
        let throttled = ThrottledReplyChannel::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(500),
                per_author_min_interval: Duration::ZERO,
            },
        );

        throttled.send(&reply("a")).await.unwrap();
        throttled.send(&reply("b")).await.unwrap();
        throttled.send(&reply("c")).await.unwrap();

        let at = inner.at.lock().unwrap().clone();
        assert_eq!(at.len(), 3);
        assert!(at[1] - at[0] >= Duration::from_millis(500));
        assert!(at[2] - at[1] >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn same_author_waits_for_per_author_interval() {
        let inner = Arc::new(RecordingChannel::default());
        let throttled = ThrottledReplyChannel::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::ZERO,
                per_author_min_interval: Duration::from_secs(30),
            },
        );

        throttled.send(&reply("a")).await.unwrap();
        throttled.send(&reply("b")).await.unwrap();
        throttled.send(&reply("a")).await.unwrap();

        let at = inner.at.lock().unwrap().clone();
        assert!(at[1] - at[0] < Duration::from_secs(1));
        assert!(at[2] - at[0] >= Duration::from_secs(30));
    }

    #[test]
    fn lapsed_authors_are_forgotten() {
        let cfg = ThrottleConfig {
            global_min_interval: Duration::ZERO,
            per_author_min_interval: Duration::from_secs(10),
        };
        let t0 = Instant::now();
        let mut schedule = Schedule {
            global_next: t0,
            author_next: HashMap::new(),
        };

        schedule.book("a".to_string(), t0, &cfg);
        schedule.book("b".to_string(), t0 + Duration::from_secs(5), &cfg);
        assert_eq!(schedule.author_next.len(), 2);

        schedule.book("c".to_string(), t0 + Duration::from_secs(12), &cfg);
        assert_eq!(schedule.author_next.len(), 2);
        assert!(!schedule.author_next.contains_key("a"));
    }
}
