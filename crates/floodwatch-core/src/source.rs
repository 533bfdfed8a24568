//! The data source: classification plus execution of its result.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    classifier::{classify, ClassificationResult},
    config::Config,
    domain::{AuthorId, Message},
    ledger::KnownAuthors,
    persistence::PersistenceAction,
    ports::{Clock, FeedTransport, PersistenceSink, ReplyChannel},
    reply_gate::ReplyGate,
    supervisor::StreamSupervisor,
};

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Pure decision for one message.
    fn classify(&self, message: &Message) -> ClassificationResult;

    async fn should_send(&self, author: &AuthorId) -> bool;

    /// Execute the persistence actions and the reply of a classification.
    async fn apply(&self, message: Message, result: ClassificationResult);

    /// Wire this source to a feed transport.
    fn supervise(
        self: Arc<Self>,
        transport: Arc<dyn FeedTransport>,
        cfg: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> StreamSupervisor
    where
        Self: Sized + 'static,
    {
        StreamSupervisor::new(self, transport, cfg, clock)
    }
}

pub struct FeedDataSource {
    cfg: Arc<Config>,
    sink: Arc<dyn PersistenceSink>,
    ledger: KnownAuthors,
    gate: ReplyGate,
}

impl FeedDataSource {
    pub fn new(
        cfg: Arc<Config>,
        sink: Arc<dyn PersistenceSink>,
        channel: Arc<dyn ReplyChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: ReplyGate::new(cfg.clone(), sink.clone(), channel, clock),
            ledger: KnownAuthors::new(sink.clone()),
            cfg,
            sink,
        }
    }

    /// Each action depends on its predecessor; the first failure ends the chain.
    async fn run_actions(&self, message_id: &str, actions: &[PersistenceAction]) {
        for action in actions {
            if let PersistenceAction::InsertNonSpatialUser { author } = action {
                match self.ledger.contains(author).await {
                    Ok(true) => {
                        debug!(message_id, author = %author, "author already recorded");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(message_id, author = %author, error = %e, "known-author lookup failed; skipping user insert");
                        return;
                    }
                }
            }

            if let Err(e) = self.sink.execute(action.kind(), action.params()).await {
                warn!(
                    message_id,
                    statement = action.kind().as_str(),
                    error = %e,
                    "persistence failed; skipping remaining actions"
                );
                return;
            }
        }
    }
}

#[async_trait]
impl DataSource for FeedDataSource {
    fn classify(&self, message: &Message) -> ClassificationResult {
        classify(message, &self.cfg)
    }

    async fn should_send(&self, author: &AuthorId) -> bool {
        self.gate.should_send(author).await
    }

    async fn apply(&self, message: Message, result: ClassificationResult) {
        let ClassificationResult {
            category,
            reply,
            actions,
        } = result;

        let Some(reply) = reply else {
            self.run_actions(&message.id, &actions).await;
            return;
        };

        let outcome = self
            .gate
            .dispatch(&reply, || self.run_actions(&message.id, &actions))
            .await;
        debug!(message_id = %message.id, ?category, ?outcome, "message applied");
    }
}
