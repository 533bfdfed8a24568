//! Feed payload codec: raw JSON payloads to `FeedEvent`s.
//!
//! Payloads are tweet-shaped objects, or control objects carrying a
//! `warning` or `disconnect` key.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    domain::{AuthorId, Coordinates, Entities, Message},
    errors::Error,
    ports::FeedEvent,
    Result,
};

#[derive(Debug, Deserialize)]
struct WireWarning {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDisconnect {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    screen_name: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePlace {
    Text(String),
    Object {
        #[serde(default)]
        full_name: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl WirePlace {
    fn into_text(self) -> Option<String> {
        match self {
            WirePlace::Text(s) => Some(s),
            WirePlace::Object { full_name, name } => full_name.or(name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    id_str: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    text: String,
    user: WireUser,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    coordinates: Option<WirePoint>,
    #[serde(default)]
    place: Option<WirePlace>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    entities: Option<Entities>,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        let id = w
            .id_str
            .or_else(|| w.id.map(|v| value_to_code(&v)))
            .unwrap_or_default();
        Message {
            id,
            author: AuthorId::new(w.user.screen_name),
            author_location: w.user.location,
            text: w.text,
            language: w.lang,
            coordinates: w.coordinates.map(|p| Coordinates {
                lon: p.coordinates[0],
                lat: p.coordinates[1],
            }),
            place: w.place.and_then(WirePlace::into_text),
            created_at: w.created_at.unwrap_or_default(),
            entities: w.entities.unwrap_or_default(),
        }
    }
}

impl FeedEvent {
    /// Decode one raw payload.
    ///
    /// Missing optional fields decode as absent. A payload without `text` or
    /// `user.screen_name` is an error; callers log and skip it.
    pub fn from_payload(payload: Value) -> Result<FeedEvent> {
        if let Some(w) = payload.get("warning") {
            let w: WireWarning = serde_json::from_value(w.clone())?;
            return Ok(FeedEvent::Warning {
                code: value_to_code(&w.code),
                message: w.message.unwrap_or_default(),
            });
        }

        if let Some(d) = payload.get("disconnect") {
            let d: WireDisconnect = serde_json::from_value(d.clone())?;
            return Ok(FeedEvent::Disconnect {
                code: value_to_code(&d.code),
                reason: d.reason,
            });
        }

        let wire: WireMessage = serde_json::from_value(payload)
            .map_err(|e| Error::Transport(format!("malformed message payload: {e}")))?;
        Ok(FeedEvent::Data(wire.into()))
    }

    /// Decode one line of newline-delimited JSON.
    pub fn from_line(line: &str) -> Result<FeedEvent> {
        let payload: Value = serde_json::from_str(line)?;
        Self::from_payload(payload)
    }
}

fn value_to_code(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
