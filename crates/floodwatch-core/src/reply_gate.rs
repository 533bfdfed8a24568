//! Reply gate: never contact an author twice.
//!
//! Every reply goes through `dispatch`, which holds a per-author lock around
//! the whole check-then-act sequence (ledger lookup, the message's own
//! persistence, send, follow-up) so two messages from the same new author
//! cannot both pass the "unknown" check.

use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    classifier::ReplyDirective,
    config::Config,
    domain::AuthorId,
    ledger::KnownAuthors,
    ports::{Clock, OutboundReply, PersistenceSink, ReplyChannel},
    utils::add_timestamp,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    KnownAuthor,
    Blacklisted,
    /// The ledger could not be read; replies fail closed.
    LookupFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Sent,
    DryRun,
    Suppressed(SuppressReason),
    /// The channel rejected the reply; the follow-up was skipped.
    Failed,
}

pub struct ReplyGate {
    cfg: Arc<Config>,
    sink: Arc<dyn PersistenceSink>,
    ledger: KnownAuthors,
    channel: Arc<dyn ReplyChannel>,
    clock: Arc<dyn Clock>,
    author_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReplyGate {
    pub fn new(
        cfg: Arc<Config>,
        sink: Arc<dyn PersistenceSink>,
        channel: Arc<dyn ReplyChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            ledger: KnownAuthors::new(sink.clone()),
            sink,
            channel,
            clock,
            author_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a reply to `author` may be sent right now.
    pub async fn should_send(&self, author: &AuthorId) -> bool {
        self.check(author).await.is_ok()
    }

    async fn check(&self, author: &AuthorId) -> Result<(), SuppressReason> {
        if self.cfg.is_blacklisted(author.as_str()) {
            return Err(SuppressReason::Blacklisted);
        }
        match self.ledger.contains(author).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(SuppressReason::KnownAuthor),
            Err(e) => {
                warn!(author = %author, error = %e, "known-author lookup failed; suppressing reply");
                Err(SuppressReason::LookupFailed)
            }
        }
    }

    /// Run the per-author critical section for one reply directive.
    ///
    /// `persist` runs after the gate decision and before the send, whether or
    /// not the reply is suppressed.
    pub async fn dispatch<F, Fut>(&self, reply: &ReplyDirective, persist: F) -> ReplyOutcome
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let guard = self.lock_author(&reply.author).await;

        let decision = self.check(&reply.author).await;
        persist().await;

        let outcome = match decision {
            Ok(()) => self.deliver(reply).await,
            Err(reason) => {
                debug!(author = %reply.author, ?reason, "reply suppressed");
                ReplyOutcome::Suppressed(reason)
            }
        };

        drop(guard);
        self.release_author(&reply.author).await;
        outcome
    }

    async fn deliver(&self, reply: &ReplyDirective) -> ReplyOutcome {
        let text = if self.cfg.add_timestamp {
            add_timestamp(&reply.text, self.clock.utc_now())
        } else {
            reply.text.clone()
        };

        let outcome = if self.cfg.live_send_enabled {
            let outbound = OutboundReply {
                author: reply.author.clone(),
                in_reply_to: reply.in_reply_to.clone(),
                text,
            };
            match self.channel.send(&outbound).await {
                Ok(()) => {
                    info!(author = %reply.author, kind = ?reply.kind, "reply sent");
                    ReplyOutcome::Sent
                }
                Err(e) => {
                    warn!(author = %reply.author, error = %e, "reply send failed; skipping follow-up");
                    return ReplyOutcome::Failed;
                }
            }
        } else {
            info!(author = %reply.author, kind = ?reply.kind, text = %text, "dry run: reply not sent");
            ReplyOutcome::DryRun
        };

        if let Some(action) = &reply.follow_up {
            if let Err(e) = self.sink.execute(action.kind(), action.params()).await {
                warn!(
                    author = %reply.author,
                    statement = action.kind().as_str(),
                    error = %e,
                    "follow-up write failed"
                );
            }
        }

        outcome
    }

    async fn lock_author(&self, author: &AuthorId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.author_locks.lock().await;
            map.entry(author.ledger_key())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn release_author(&self, author: &AuthorId) {
        let mut map = self.author_locks.lock().await;
        let key = author.ledger_key();
        // Only the map still holds the lock: nobody is waiting on it.
        if map.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(&key);
        }
    }
}
