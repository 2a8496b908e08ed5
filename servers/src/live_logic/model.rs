use lib_fleet::core::LinkState;
use lib_fleet::tracking::{Absorbed, MarkerChange};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests a map client may send over `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub track: Option<String>,
    pub untrack: Option<bool>,
}

/// Pushed to map clients over `/ws`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full marker collection, sent once on connect.
    Snapshot { markers: Value },
    /// One marker was created or moved.
    Marker { created: bool, feature: Value },
    /// The tracked device's trajectory was re-rendered.
    Trajectory { device_id: String, collection: Value },
    /// The push channel changed state.
    Link { link: LinkState },
    Error { error: String },
}

/// What the tracking follower reports for each applied status message.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub device_id: String,
    pub marker: Option<MarkerChange>,
    pub trajectory: Option<Absorbed>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_messages_are_tagged() {
        let msg = ServerMessage::Link { link: LinkState::Exhausted { attempts: 5 } };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "link");
        assert_eq!(json["link"]["state"], "exhausted");
        assert_eq!(json["link"]["attempts"], 5);
    }

    #[test]
    fn client_message_fields_are_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"track":"van-1"}"#).unwrap();
        assert_eq!(msg.track.as_deref(), Some("van-1"));
        assert!(msg.untrack.is_none());
    }
}
