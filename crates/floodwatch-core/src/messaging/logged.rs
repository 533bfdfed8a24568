use async_trait::async_trait;
use tracing::info;

use crate::{
    ports::{OutboundReply, ReplyChannel},
    Result,
};

/// Reply channel that writes replies to the log instead of delivering them.
///
/// Stands in for a real delivery adapter in the dev binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingReplyChannel;

#[async_trait]
impl ReplyChannel for LoggingReplyChannel {
    async fn send(&self, reply: &OutboundReply) -> Result<()> {
        info!(
            author = %reply.author,
            in_reply_to = %reply.in_reply_to,
            text = %reply.text,
            "reply delivered to log"
        );
        Ok(())
    }
}
