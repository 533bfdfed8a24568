//! Persistence actions queued by the classifier and the statements they map to.

use serde_json::{json, Value};
use tracing::warn;

use crate::{
    domain::{AuthorId, Coordinates, Message},
    utils::feed_date_to_iso8601,
};

/// Statement kinds the persistence sink understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementKind {
    InsertConfirmedReport,
    UpsertConfirmedUser,
    InsertUnconfirmedReport,
    InsertNonSpatialReport,
    InsertNonSpatialUser,
    InsertInvitee,
    LookupKnownAuthor,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::InsertConfirmedReport => "insert_confirmed_report",
            StatementKind::UpsertConfirmedUser => "upsert_confirmed_user",
            StatementKind::InsertUnconfirmedReport => "insert_unconfirmed_report",
            StatementKind::InsertNonSpatialReport => "insert_nonspatial_report",
            StatementKind::InsertNonSpatialUser => "insert_nonspatial_user",
            StatementKind::InsertInvitee => "insert_invitee",
            StatementKind::LookupKnownAuthor => "lookup_known_author",
        }
    }
}

/// Report fields shared by the confirmed and non-spatial report tables.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRecord {
    pub created_at: Option<String>,
    pub text: String,
    pub hashtags: Value,
    pub urls: Value,
    pub user_mentions: Value,
    pub language: Option<String>,
}

impl ReportRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            created_at: iso_created_at(message),
            text: message.text.clone(),
            hashtags: message.entities.hashtags.clone(),
            urls: message.entities.urls.clone(),
            user_mentions: message.entities.user_mentions.clone(),
            language: message.language.clone(),
        }
    }

    fn params(&self) -> Vec<Value> {
        vec![
            json!(self.created_at),
            json!(self.text),
            json!(self.hashtags.to_string()),
            json!(self.urls.to_string()),
            json!(self.user_mentions.to_string()),
            json!(self.language),
        ]
    }
}

/// A single write the data source performs for a classified message.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistenceAction {
    InsertConfirmedReport {
        report: ReportRecord,
        point: Coordinates,
    },
    UpsertConfirmedUser {
        author: AuthorId,
    },
    InsertUnconfirmedReport {
        created_at: Option<String>,
        point: Coordinates,
    },
    InsertNonSpatialReport {
        report: ReportRecord,
    },
    /// Only executed when the author is not already known.
    InsertNonSpatialUser {
        author: AuthorId,
    },
    InsertInvitee {
        author: AuthorId,
    },
}

impl PersistenceAction {
    pub fn kind(&self) -> StatementKind {
        match self {
            PersistenceAction::InsertConfirmedReport { .. } => StatementKind::InsertConfirmedReport,
            PersistenceAction::UpsertConfirmedUser { .. } => StatementKind::UpsertConfirmedUser,
            PersistenceAction::InsertUnconfirmedReport { .. } => {
                StatementKind::InsertUnconfirmedReport
            }
            PersistenceAction::InsertNonSpatialReport { .. } => {
                StatementKind::InsertNonSpatialReport
            }
            PersistenceAction::InsertNonSpatialUser { .. } => StatementKind::InsertNonSpatialUser,
            PersistenceAction::InsertInvitee { .. } => StatementKind::InsertInvitee,
        }
    }

    /// Positional statement parameters.
    ///
    /// Author identities are never stored in clear; they are passed as ledger
    /// keys.
    pub fn params(&self) -> Vec<Value> {
        match self {
            PersistenceAction::InsertConfirmedReport { report, point } => {
                let mut params = report.params();
                params.push(json!(point.to_point_text()));
                params
            }
            PersistenceAction::InsertUnconfirmedReport { created_at, point } => {
                vec![json!(created_at), json!(point.to_point_text())]
            }
            PersistenceAction::InsertNonSpatialReport { report } => report.params(),
            PersistenceAction::UpsertConfirmedUser { author }
            | PersistenceAction::InsertNonSpatialUser { author }
            | PersistenceAction::InsertInvitee { author } => vec![json!(author.ledger_key())],
        }
    }
}

pub(crate) fn iso_created_at(message: &Message) -> Option<String> {
    let iso = feed_date_to_iso8601(&message.created_at);
    if iso.is_none() {
        warn!(
            message_id = %message.id,
            created_at = %message.created_at,
            "unparseable created_at; storing null"
        );
    }
    iso
}
