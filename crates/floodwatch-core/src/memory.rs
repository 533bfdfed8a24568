//! In-memory persistence sink.
//!
//! Keeps every executed statement and answers known-author lookups from the
//! user rows it has seen. Used by the dev binary and by tests.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    domain::AuthorId, errors::Error, persistence::StatementKind, ports::PersistenceSink, Result,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedStatement {
    pub kind: StatementKind,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    executed: Vec<ExecutedStatement>,
    known: HashSet<String>,
    failing: HashSet<StatementKind>,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger with an already-known author.
    pub fn remember(&self, author: &AuthorId) {
        self.lock().known.insert(author.ledger_key());
    }

    /// Make every statement of `kind` fail from now on.
    pub fn fail_on(&self, kind: StatementKind) {
        self.lock().failing.insert(kind);
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.lock().executed.clone()
    }

    /// Executed statement kinds, lookups excluded.
    pub fn writes(&self) -> Vec<StatementKind> {
        self.lock()
            .executed
            .iter()
            .map(|s| s.kind)
            .filter(|k| *k != StatementKind::LookupKnownAuthor)
            .collect()
    }

    pub fn count(&self, kind: StatementKind) -> usize {
        self.lock()
            .executed
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    pub fn is_known(&self, author: &AuthorId) -> bool {
        self.lock().known.contains(&author.ledger_key())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn execute(&self, kind: StatementKind, params: Vec<Value>) -> Result<Vec<Value>> {
        let mut st = self.lock();
        st.executed.push(ExecutedStatement {
            kind,
            params: params.clone(),
        });

        if st.failing.contains(&kind) {
            return Err(Error::Persistence(format!(
                "{} rejected by memory sink",
                kind.as_str()
            )));
        }

        let key = params
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind {
            StatementKind::LookupKnownAuthor => {
                if st.known.contains(&key) {
                    return Ok(vec![json!({ "user_hash": key })]);
                }
                Ok(Vec::new())
            }
            StatementKind::UpsertConfirmedUser
            | StatementKind::InsertNonSpatialUser
            | StatementKind::InsertInvitee => {
                info!(statement = kind.as_str(), user_hash = %key, "recorded user");
                st.known.insert(key);
                Ok(Vec::new())
            }
            StatementKind::InsertConfirmedReport
            | StatementKind::InsertUnconfirmedReport
            | StatementKind::InsertNonSpatialReport => {
                let params = Value::Array(params);
                info!(statement = kind.as_str(), params = %params, "recorded report");
                Ok(Vec::new())
            }
        }
    }
}
