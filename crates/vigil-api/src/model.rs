//! Wire data model shared between the gateway and the core.
//!
//! Field names mirror the vendor API (camelCase JSON). Feature and state
//! maps use [`IndexMap`] so a fetched document round-trips in the order
//! the installation reports its devices and features.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ── OAuth ────────────────────────────────────────────────────────────

/// Token material returned by login and refresh.
///
/// Refresh responses may omit `refresh_token`, in which case the
/// previously issued one stays valid.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

// ── Locations ────────────────────────────────────────────────────────

/// One installation the authenticated account can access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ── State document ───────────────────────────────────────────────────

/// Full state of one installation: the authoritative alarm state plus
/// an ordered collection of devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    /// Canonical alarm state (e.g. `"ARMED_AWAY"`, `"DISARMED"`).
    ///
    /// The polled endpoint omits this field during certain transitional
    /// states (`ARM_PENDING` among them) -- see the reconciler's
    /// retain-on-null rule.
    #[serde(default)]
    pub alarm_state: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub devices: Vec<DeviceState>,
}

impl StateDocument {
    /// Look up a device by its stable external identifier.
    pub fn device(&self, id: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Mutable lookup by device identifier.
    pub fn device_mut(&mut self, id: &str) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.id == id)
    }
}

/// One physical device and its feature/state tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub features: IndexMap<String, Feature>,
}

/// A feature grouping (e.g. `battery`, `temperature`, `alarm`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub states: IndexMap<String, StateEntry>,
}

/// A single leaf state: value plus optional freshness stamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

// ── Stream events ────────────────────────────────────────────────────

/// A raw event from the streaming channel: a declared kind plus an
/// untyped payload. The core classifies and applies these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of an `alarm-state-changed` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmChangedPayload {
    #[serde(default)]
    pub state: Option<String>,
}

/// Payload of a `device-state-changed` event.
///
/// Carries either a `changes` list or a single `change`; older gateway
/// firmware sends the singular form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChangedPayload {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub changes: Vec<StateChange>,
    #[serde(default)]
    pub change: Option<StateChange>,
}

impl DeviceChangedPayload {
    /// All changes in the payload, normalizing the singular form.
    pub fn all_changes(&self) -> Vec<StateChange> {
        if self.changes.is_empty() {
            self.change.clone().into_iter().collect()
        } else {
            self.changes.clone()
        }
    }
}

/// One `{feature, stateName, value, lastUpdated?}` change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_state_document() {
        let json = serde_json::json!({
            "alarmState": "ARMED_AWAY",
            "name": "Cabin",
            "devices": [{
                "id": "d1",
                "name": "Entry sensor",
                "online": true,
                "features": {
                    "battery": {
                        "states": {
                            "low": { "value": false, "lastUpdated": "2026-03-01T08:00:00Z" }
                        }
                    }
                }
            }]
        });

        let doc: StateDocument = serde_json::from_value(json).unwrap();
        assert_eq!(doc.alarm_state.as_deref(), Some("ARMED_AWAY"));
        assert_eq!(doc.devices.len(), 1);

        let state = &doc.devices[0].features["battery"].states["low"];
        assert_eq!(state.value, serde_json::Value::Bool(false));
        assert!(state.last_updated.is_some());
    }

    #[test]
    fn alarm_state_field_may_be_absent() {
        let doc: StateDocument =
            serde_json::from_value(serde_json::json!({ "devices": [] })).unwrap();
        assert!(doc.alarm_state.is_none());
    }

    #[test]
    fn device_payload_normalizes_singular_change() {
        let payload: DeviceChangedPayload = serde_json::from_value(serde_json::json!({
            "deviceId": "d1",
            "change": { "feature": "battery", "stateName": "low", "value": true }
        }))
        .unwrap();

        let changes = payload.all_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].feature.as_deref(), Some("battery"));
        assert_eq!(changes[0].state_name.as_deref(), Some("low"));
    }

    #[test]
    fn stream_event_tolerates_missing_data() {
        let event: StreamEvent =
            serde_json::from_str(r#"{ "type": "heartbeat" }"#).unwrap();
        assert_eq!(event.kind, "heartbeat");
        assert!(event.data.is_null());
    }
}
