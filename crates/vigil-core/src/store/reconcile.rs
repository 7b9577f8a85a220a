// ── Merge logic ──
//
// Applies full snapshots (pull path) and incremental events (push path)
// to the cached document. Conflict policy: the latest explicit value
// wins, except a snapshot that omits the alarm state never clobbers a
// cached non-null value -- the polled endpoint drops the field during
// transitional states (ARM_PENDING and friends) that only the stream
// reports, and losing it on every poll made the state visibly flap.

use serde_json::Value;
use tracing::{debug, info};

use vigil_api::model::{AlarmChangedPayload, DeviceChangedPayload};
use vigil_api::{StateDocument, StreamEvent};

use super::StateStore;

pub const KIND_ALARM_CHANGED: &str = "alarm-state-changed";
pub const KIND_DEVICE_CHANGED: &str = "device-state-changed";

/// What a snapshot application did.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotOutcome {
    /// The document differs from what was cached before.
    pub changed: bool,
    /// The snapshot omitted the alarm state and the cached value was
    /// carried over.
    pub alarm_retained: bool,
}

/// One applied `{device, feature, stateName, old, new}` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub device_id: String,
    pub feature: String,
    pub state_name: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// What an event application did.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// The document was mutated. Alarm events always report `true`,
    /// even when the value is unchanged -- the event is authoritative.
    pub updated: bool,
    /// Device identifier of a dropped patch (device not in the cache).
    pub unknown_device: Option<String>,
    /// Per-state changes applied by a device event.
    pub changes: Vec<AppliedChange>,
}

impl StateStore {
    /// Replace the document with a fresh snapshot.
    ///
    /// The only data that survives from the previous document is a
    /// non-null alarm state when the incoming snapshot has none. The
    /// rule is idempotent: applying the same null-valued snapshot twice
    /// yields the same result as once.
    pub async fn apply_snapshot(&self, mut incoming: StateDocument) -> SnapshotOutcome {
        let mut doc = self.doc.lock().await;

        let mut alarm_retained = false;
        if incoming.alarm_state.is_none() && doc.alarm_state.is_some() {
            incoming.alarm_state = doc.alarm_state.clone();
            alarm_retained = true;
            debug!("snapshot omitted alarm state, keeping cached value");
        }

        if doc.alarm_state != incoming.alarm_state {
            info!(
                old = doc.alarm_state.as_deref().unwrap_or("<none>"),
                new = incoming.alarm_state.as_deref().unwrap_or("<none>"),
                "alarm state changed"
            );
        }

        let changed = *doc != incoming;
        *doc = incoming;

        if changed {
            self.publish(&doc);
        }

        SnapshotOutcome {
            changed,
            alarm_retained,
        }
    }

    /// Apply one stream event to the document.
    ///
    /// Unrecognized kinds are accepted but mutate nothing. A device
    /// patch naming an identifier the cache does not hold is dropped --
    /// devices only ever materialize from a full snapshot.
    pub async fn apply_event(&self, event: &StreamEvent) -> EventOutcome {
        match event.kind.as_str() {
            KIND_ALARM_CHANGED => self.apply_alarm_changed(event).await,
            KIND_DEVICE_CHANGED => self.apply_device_changed(event).await,
            other => {
                debug!(kind = other, "informational event, nothing to apply");
                EventOutcome::default()
            }
        }
    }

    async fn apply_alarm_changed(&self, event: &StreamEvent) -> EventOutcome {
        let payload: AlarmChangedPayload =
            serde_json::from_value(event.data.clone()).unwrap_or(AlarmChangedPayload { state: None });

        let mut doc = self.doc.lock().await;
        if doc.alarm_state != payload.state {
            info!(
                old = doc.alarm_state.as_deref().unwrap_or("<none>"),
                new = payload.state.as_deref().unwrap_or("<none>"),
                "alarm state changed"
            );
        }
        doc.alarm_state = payload.state;
        self.publish(&doc);

        // The event is authoritative: report an update even when the
        // value did not change.
        EventOutcome {
            updated: true,
            ..EventOutcome::default()
        }
    }

    async fn apply_device_changed(&self, event: &StreamEvent) -> EventOutcome {
        let payload: DeviceChangedPayload = match serde_json::from_value(event.data.clone()) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "malformed device event payload, dropping");
                return EventOutcome::default();
            }
        };

        let Some(device_id) = payload.device_id.clone().filter(|id| !id.is_empty()) else {
            debug!("device event without a device id, dropping");
            return EventOutcome::default();
        };

        let mut doc = self.doc.lock().await;
        let Some(device) = doc.device_mut(&device_id) else {
            debug!(device_id, "patch targets a device the cache does not hold, dropping");
            return EventOutcome {
                unknown_device: Some(device_id),
                ..EventOutcome::default()
            };
        };

        let mut changes = Vec::new();
        for change in payload.all_changes() {
            let (Some(feature), Some(state_name)) = (change.feature, change.state_name) else {
                continue;
            };

            let entry = device
                .features
                .entry(feature.clone())
                .or_default()
                .states
                .entry(state_name.clone())
                .or_default();

            let old_value = std::mem::replace(&mut entry.value, change.value.clone());
            if let Some(stamp) = change.last_updated {
                entry.last_updated = Some(stamp);
            }

            changes.push(AppliedChange {
                device_id: device_id.clone(),
                feature,
                state_name,
                old_value,
                new_value: change.value,
            });
        }

        let updated = !changes.is_empty();
        if updated {
            debug!(device_id, applied = changes.len(), "device state patched");
            self.publish(&doc);
        }

        EventOutcome {
            updated,
            unknown_device: None,
            changes,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn snapshot(alarm: Option<&str>) -> StateDocument {
        serde_json::from_value(json!({
            "alarmState": alarm,
            "devices": [{
                "id": "d1",
                "features": {
                    "battery": { "states": { "low": { "value": false } } }
                }
            }]
        }))
        .expect("valid snapshot json")
    }

    fn event(kind: &str, data: serde_json::Value) -> StreamEvent {
        StreamEvent {
            kind: kind.to_owned(),
            data,
        }
    }

    #[tokio::test]
    async fn first_snapshot_populates_empty_document() {
        let store = StateStore::new();
        assert!(store.document().devices.is_empty());

        let outcome = store.apply_snapshot(snapshot(Some("DISARMED"))).await;
        assert!(outcome.changed);
        assert!(!outcome.alarm_retained);
        assert_eq!(store.document().alarm_state.as_deref(), Some("DISARMED"));
    }

    #[tokio::test]
    async fn null_alarm_snapshot_retains_cached_value() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("ARM_PENDING"))).await;

        let outcome = store.apply_snapshot(snapshot(None)).await;
        assert!(outcome.alarm_retained);
        assert_eq!(store.document().alarm_state.as_deref(), Some("ARM_PENDING"));

        // Idempotent: a second null-valued snapshot changes nothing.
        let outcome = store.apply_snapshot(snapshot(None)).await;
        assert!(outcome.alarm_retained);
        assert!(!outcome.changed);
        assert_eq!(store.document().alarm_state.as_deref(), Some("ARM_PENDING"));
    }

    #[tokio::test]
    async fn later_snapshot_supersedes_pushed_alarm_state() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;

        store
            .apply_event(&event(KIND_ALARM_CHANGED, json!({ "state": "ARM_PENDING" })))
            .await;
        assert_eq!(store.document().alarm_state.as_deref(), Some("ARM_PENDING"));

        store.apply_snapshot(snapshot(Some("ARMED_AWAY"))).await;
        assert_eq!(store.document().alarm_state.as_deref(), Some("ARMED_AWAY"));
    }

    #[tokio::test]
    async fn alarm_event_always_reports_updated() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;

        let outcome = store
            .apply_event(&event(KIND_ALARM_CHANGED, json!({ "state": "DISARMED" })))
            .await;
        assert!(outcome.updated, "unchanged value must still report updated");
    }

    #[tokio::test]
    async fn unknown_device_patch_is_dropped_without_mutation() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;
        let before = store.document();

        let outcome = store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "ghost",
                    "changes": [{ "feature": "battery", "stateName": "low", "value": true }]
                }),
            ))
            .await;

        assert!(!outcome.updated);
        assert_eq!(outcome.unknown_device.as_deref(), Some("ghost"));
        assert_eq!(*before, *store.document());
    }

    #[tokio::test]
    async fn device_patch_applies_and_alarm_survives() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("ARMED_AWAY"))).await;

        let outcome = store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "changes": [{ "feature": "battery", "stateName": "low", "value": true }]
                }),
            ))
            .await;

        assert!(outcome.updated);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].old_value, json!(false));
        assert_eq!(outcome.changes[0].new_value, json!(true));

        let doc = store.document();
        assert_eq!(
            doc.devices[0].features["battery"].states["low"].value,
            json!(true)
        );
        assert_eq!(doc.alarm_state.as_deref(), Some("ARMED_AWAY"));
    }

    #[tokio::test]
    async fn patch_without_timestamp_keeps_previous_stamp() {
        let store = StateStore::new();
        store
            .apply_snapshot(
                serde_json::from_value(json!({
                    "alarmState": "DISARMED",
                    "devices": [{
                        "id": "d1",
                        "features": {
                            "battery": {
                                "states": {
                                    "low": { "value": false, "lastUpdated": "2026-03-01T08:00:00Z" }
                                }
                            }
                        }
                    }]
                }))
                .expect("valid snapshot json"),
            )
            .await;

        store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "changes": [{ "feature": "battery", "stateName": "low", "value": true }]
                }),
            ))
            .await;

        let doc = store.document();
        let state = &doc.devices[0].features["battery"].states["low"];
        assert_eq!(state.value, json!(true));
        assert_eq!(
            state.last_updated.map(|t| t.to_rfc3339()),
            Some("2026-03-01T08:00:00+00:00".into())
        );
    }

    #[tokio::test]
    async fn incomplete_changes_are_skipped() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;

        let outcome = store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "changes": [
                        { "stateName": "low", "value": true },
                        { "feature": "battery", "value": true }
                    ]
                }),
            ))
            .await;

        assert!(!outcome.updated);
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn singular_change_form_is_accepted() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;

        let outcome = store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "change": { "feature": "battery", "stateName": "low", "value": true }
                }),
            ))
            .await;

        assert!(outcome.updated);
        assert_eq!(outcome.changes.len(), 1);
    }

    #[tokio::test]
    async fn missing_path_is_created_on_demand() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;

        let outcome = store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "changes": [{ "feature": "temperature", "stateName": "value", "value": 21.5 }]
                }),
            ))
            .await;

        assert!(outcome.updated);
        let doc = store.document();
        assert_eq!(
            doc.devices[0].features["temperature"].states["value"].value,
            json!(21.5)
        );
    }

    #[tokio::test]
    async fn document_is_visible_without_any_subscriber() {
        // No receiver is ever taken from this store; reads must still
        // observe every merge.
        let store = StateStore::new();

        store.apply_snapshot(snapshot(Some("DISARMED"))).await;
        assert_eq!(store.document().alarm_state.as_deref(), Some("DISARMED"));

        store
            .apply_event(&event(
                KIND_DEVICE_CHANGED,
                json!({
                    "deviceId": "d1",
                    "changes": [{ "feature": "battery", "stateName": "low", "value": true }]
                }),
            ))
            .await;

        assert_eq!(
            store.document().devices[0].features["battery"].states["low"].value,
            json!(true)
        );
    }

    #[tokio::test]
    async fn unrecognized_kind_is_informational() {
        let store = StateStore::new();
        store.apply_snapshot(snapshot(Some("DISARMED"))).await;
        let before = store.document();

        let outcome = store
            .apply_event(&event("gateway-rebooted", json!({ "uptime": 0 })))
            .await;

        assert!(!outcome.updated);
        assert_eq!(*before, *store.document());
    }
}
