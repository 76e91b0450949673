//! Request/Response types for the HTTP surface

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::ConnectionInfo;

/// `?actorId=a,b` on `/ws` and `/events`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub actor_id: Option<String>,
}

impl StreamQuery {
    /// Actor filter for the new connection; empty means every actor.
    pub fn actor_filter(&self) -> BTreeSet<String> {
        parse_actor_list(self.actor_id.as_deref().unwrap_or_default())
    }
}

pub fn parse_actor_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .map(str::to_string)
        .collect()
}

/// `?knownVersion=&maxEvents=` on `/sync/:actor_id`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    #[serde(default)]
    pub known_version: u64,
    pub max_events: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub transports: Vec<ConnectionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_list_parsing() {
        let filter = parse_actor_list(" room-1, ,room-2,room-1 ");
        assert_eq!(filter, BTreeSet::from(["room-1".to_string(), "room-2".to_string()]));
        assert!(StreamQuery::default().actor_filter().is_empty());
    }

    #[test]
    fn test_publish_request_payload_defaults_to_null() {
        let request: PublishRequest = serde_json::from_str(r#"{"type":"joined"}"#).unwrap();
        assert_eq!(request.event_type, "joined");
        assert!(request.payload.is_null());
    }
}
