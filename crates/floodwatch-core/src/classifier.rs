//! Report classification.
//!
//! `classify` is a pure decision function: no I/O, no clock, no shared state.
//! It decides the report category, the ordered persistence actions and the
//! optional reply; executing them is the data source's job.

use tracing::debug;

use crate::{
    config::{Config, LanguageSlot, ReplyKind},
    domain::{AuthorId, Message},
    persistence::{iso_created_at, PersistenceAction, ReportRecord},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Monitored-account mention with coordinates.
    Confirmed,
    /// Coordinates but no monitored-account mention.
    Unconfirmed,
    /// Monitored-account mention and a city match, no coordinates.
    NonSpatial,
    /// No keyword matched.
    Ignored,
}

/// A reply the data source should send if the reply gate allows it.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyDirective {
    pub kind: ReplyKind,
    pub slot: LanguageSlot,
    pub author: AuthorId,
    pub in_reply_to: String,
    /// `@author template`, without any timestamp suffix.
    pub text: String,
    /// Runs only after the reply was sent (or dry-run "sent").
    pub follow_up: Option<PersistenceAction>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    /// `None` when a keyword matched but no report is recorded.
    pub category: Option<Category>,
    pub reply: Option<ReplyDirective>,
    /// Executed in order.
    pub actions: Vec<PersistenceAction>,
}

impl ClassificationResult {
    fn ignored() -> Self {
        Self {
            category: Some(Category::Ignored),
            reply: None,
            actions: Vec::new(),
        }
    }

    fn unrecorded(reply: Option<ReplyDirective>) -> Self {
        Self {
            category: None,
            reply,
            actions: Vec::new(),
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.category == Some(Category::Ignored)
    }
}

pub fn classify(message: &Message, cfg: &Config) -> ClassificationResult {
    if cfg.monitored_accounts.is_empty() {
        // Without accounts to verify against there is no campaign to report to.
        debug!(message_id = %message.id, "no monitored accounts configured");
        return ClassificationResult::ignored();
    }

    let Some(keyword) = cfg.keywords.iter().find(|k| k.is_match(&message.text)) else {
        debug!(message_id = %message.id, "no keyword match");
        return ClassificationResult::ignored();
    };
    debug!(message_id = %message.id, keyword = keyword.as_str(), "keyword match");

    // Full, independent scan of the monitored accounts.
    let account = cfg
        .monitored_accounts
        .iter()
        .find(|a| a.is_match(&message.text));

    match (account, message.coordinates) {
        (Some(account), Some(point)) => {
            debug!(message_id = %message.id, account = account.as_str(), "confirmed report");
            ClassificationResult {
                category: Some(Category::Confirmed),
                reply: None,
                actions: vec![
                    PersistenceAction::InsertConfirmedReport {
                        report: ReportRecord::from_message(message),
                        point,
                    },
                    PersistenceAction::UpsertConfirmedUser {
                        author: message.author.clone(),
                    },
                ],
            }
        }
        (Some(account), None) => {
            if !matches_city(message, cfg) {
                debug!(
                    message_id = %message.id,
                    account = account.as_str(),
                    "monitored account mention without geo or city match"
                );
                return ClassificationResult::unrecorded(None);
            }

            debug!(message_id = %message.id, "non-spatial report");
            ClassificationResult {
                category: Some(Category::NonSpatial),
                reply: Some(directive(message, cfg, ReplyKind::Thanks, None)),
                actions: vec![
                    PersistenceAction::InsertNonSpatialReport {
                        report: ReportRecord::from_message(message),
                    },
                    PersistenceAction::InsertNonSpatialUser {
                        author: message.author.clone(),
                    },
                ],
            }
        }
        (None, Some(point)) => {
            debug!(message_id = %message.id, "unconfirmed report; inviting author");
            let invitee = PersistenceAction::InsertInvitee {
                author: message.author.clone(),
            };
            ClassificationResult {
                category: Some(Category::Unconfirmed),
                reply: Some(directive(message, cfg, ReplyKind::Invite, Some(invitee))),
                actions: vec![PersistenceAction::InsertUnconfirmedReport {
                    created_at: iso_created_at(message),
                    point,
                }],
            }
        }
        (None, None) => {
            debug!(message_id = %message.id, "keyword only, no geo; inviting author");
            ClassificationResult::unrecorded(Some(directive(
                message,
                cfg,
                ReplyKind::Invite,
                None,
            )))
        }
    }
}

fn matches_city(message: &Message, cfg: &Config) -> bool {
    let Some(city) = cfg.city.as_ref() else {
        return false;
    };
    let place = message.place.as_deref().is_some_and(|p| city.is_match(p));
    let location = message
        .author_location
        .as_deref()
        .is_some_and(|l| city.is_match(l));
    place || location
}

fn directive(
    message: &Message,
    cfg: &Config,
    kind: ReplyKind,
    follow_up: Option<PersistenceAction>,
) -> ReplyDirective {
    let slot = cfg.templates.slot_for(message.language.as_deref());
    let template = cfg.templates.get(slot, kind);
    ReplyDirective {
        kind,
        slot,
        author: message.author.clone(),
        in_reply_to: message.id.clone(),
        text: format!("{} {}", message.author, template),
        follow_up,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RawConfig,
        domain::{Coordinates, Entities},
    };

    fn cfg() -> Config {
        Config::parse(RawConfig {
            keywords: "flood, banjir".to_string(),
            monitored_accounts: "@petajkt,@bpbd_jakarta".to_string(),
            city: "jakarta".to_string(),
            primary_language: "id".to_string(),
            invite_primary: "Ayo laporkan banjir".to_string(),
            invite_default: "Please report floods".to_string(),
            thanks_primary: "Terima kasih".to_string(),
            thanks_default: "Thanks".to_string(),
            ..RawConfig::default()
        })
        .unwrap()
    }

    fn msg(text: &str) -> Message {
        Message {
            id: "100".to_string(),
            author: AuthorId::new("budi"),
            author_location: None,
            text: text.to_string(),
            language: Some("en".to_string()),
            coordinates: None,
            place: None,
            created_at: "Wed Aug 12 00:42:51 -0100 2015".to_string(),
            entities: Entities::default(),
        }
    }

    fn point() -> Coordinates {
        Coordinates {
            lon: 106.8,
            lat: -6.2,
        }
    }

    #[test]
    fn no_keyword_is_ignored_without_actions() {
        let mut m = msg("sunny day @petajkt");
        m.coordinates = Some(point());
        let r = classify(&m, &cfg());
        assert!(r.is_ignored());
        assert!(r.actions.is_empty());
        assert!(r.reply.is_none());
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let r = classify(&msg("BANJIR everywhere"), &cfg());
        assert!(!r.is_ignored());
    }

    #[test]
    fn keyword_account_and_coordinates_is_confirmed() {
        let mut m = msg("flood here @PetaJKT");
        m.coordinates = Some(point());
        let r = classify(&m, &cfg());
        assert_eq!(r.category, Some(Category::Confirmed));
        assert!(r.reply.is_none());
        assert_eq!(r.actions.len(), 2);
        assert!(matches!(
            r.actions[0],
            PersistenceAction::InsertConfirmedReport { point: p, .. } if p == point()
        ));
        assert!(matches!(
            r.actions[1],
            PersistenceAction::UpsertConfirmedUser { .. }
        ));
    }

    #[test]
    fn account_listed_after_first_entry_is_still_found() {
        // The account scan is independent of the keyword scan position.
        let mut m = msg("banjir @bpbd_jakarta");
        m.coordinates = Some(point());
        let r = classify(&m, &cfg());
        assert_eq!(r.category, Some(Category::Confirmed));
    }

    #[test]
    fn account_and_city_without_coordinates_is_non_spatial_with_thanks() {
        let mut m = msg("flood @petajkt");
        m.author_location = Some("South Jakarta".to_string());
        let r = classify(&m, &cfg());
        assert_eq!(r.category, Some(Category::NonSpatial));
        assert_eq!(r.actions.len(), 2);
        assert!(matches!(
            r.actions[0],
            PersistenceAction::InsertNonSpatialReport { .. }
        ));
        assert!(matches!(
            r.actions[1],
            PersistenceAction::InsertNonSpatialUser { .. }
        ));
        let reply = r.reply.unwrap();
        assert_eq!(reply.kind, ReplyKind::Thanks);
        assert_eq!(reply.text, "@budi Thanks");
        assert!(reply.follow_up.is_none());
    }

    #[test]
    fn place_text_also_matches_city() {
        let mut m = msg("flood @petajkt");
        m.place = Some("Jakarta, Indonesia".to_string());
        assert_eq!(classify(&m, &cfg()).category, Some(Category::NonSpatial));
    }

    #[test]
    fn account_without_geo_or_city_records_nothing() {
        let mut m = msg("flood @petajkt");
        m.author_location = Some("Bandung".to_string());
        let r = classify(&m, &cfg());
        assert_eq!(r.category, None);
        assert!(r.actions.is_empty());
        assert!(r.reply.is_none());
    }

    #[test]
    fn keyword_only_with_coordinates_is_unconfirmed_with_invite() {
        let mut m = msg("flood on my street");
        m.coordinates = Some(point());
        let r = classify(&m, &cfg());
        assert_eq!(r.category, Some(Category::Unconfirmed));
        assert_eq!(
            r.actions,
            vec![PersistenceAction::InsertUnconfirmedReport {
                created_at: Some("2015-08-12T01:42:51.000Z".to_string()),
                point: point(),
            }]
        );
        let reply = r.reply.unwrap();
        assert_eq!(reply.kind, ReplyKind::Invite);
        assert_eq!(reply.in_reply_to, "100");
        assert_eq!(
            reply.follow_up,
            Some(PersistenceAction::InsertInvitee {
                author: AuthorId::new("budi")
            })
        );
    }

    #[test]
    fn keyword_only_without_coordinates_invites_without_follow_up() {
        let r = classify(&msg("flood on my street"), &cfg());
        assert_eq!(r.category, None);
        assert!(r.actions.is_empty());
        let reply = r.reply.unwrap();
        assert_eq!(reply.kind, ReplyKind::Invite);
        assert!(reply.follow_up.is_none());
    }

    #[test]
    fn primary_language_selects_primary_template() {
        let mut m = msg("banjir");
        m.language = Some("id".to_string());
        let reply = classify(&m, &cfg()).reply.unwrap();
        assert_eq!(reply.slot, LanguageSlot::Primary);
        assert_eq!(reply.text, "@budi Ayo laporkan banjir");

        m.language = Some("ms".to_string());
        let reply = classify(&m, &cfg()).reply.unwrap();
        assert_eq!(reply.slot, LanguageSlot::Default);
        assert_eq!(reply.text, "@budi Please report floods");

        m.language = None;
        let reply = classify(&m, &cfg()).reply.unwrap();
        assert_eq!(reply.slot, LanguageSlot::Default);
    }

    #[test]
    fn empty_keyword_set_ignores_everything() {
        let cfg = Config::parse(RawConfig {
            monitored_accounts: "@petajkt".to_string(),
            ..RawConfig::default()
        })
        .unwrap();
        let mut m = msg("flood @petajkt");
        m.coordinates = Some(point());
        assert!(classify(&m, &cfg).is_ignored());
    }

    #[test]
    fn empty_account_set_ignores_everything() {
        let cfg = Config::parse(RawConfig {
            keywords: "flood".to_string(),
            monitored_accounts: ",".to_string(),
            ..RawConfig::default()
        })
        .unwrap();
        let mut m = msg("flood @petajkt");
        m.coordinates = Some(point());
        assert!(classify(&m, &cfg).is_ignored());
        assert!(classify(&msg("flood"), &cfg).reply.is_none());
    }
}
