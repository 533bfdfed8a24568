use std::sync::Arc;

use serde_json::json;

use crate::{
    domain::AuthorId, persistence::StatementKind, ports::PersistenceSink, Result,
};

/// Read-only view of the known-authors ledger.
///
/// An author is known once any user table (confirmed, non-spatial, invitees)
/// holds their ledger key; the sink decides how that lookup is answered.
#[derive(Clone)]
pub struct KnownAuthors {
    sink: Arc<dyn PersistenceSink>,
}

impl KnownAuthors {
    pub fn new(sink: Arc<dyn PersistenceSink>) -> Self {
        Self { sink }
    }

    pub async fn contains(&self, author: &AuthorId) -> Result<bool> {
        let rows = self
            .sink
            .execute(
                StatementKind::LookupKnownAuthor,
                vec![json!(author.ledger_key())],
            )
            .await?;
        Ok(!rows.is_empty())
    }
}
