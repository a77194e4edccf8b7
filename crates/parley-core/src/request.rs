//! Structured request types and the outbound wire shape.
//!
//! Slots historically arrive in two formats — a record keyed by slot ID or
//! an array of `{slotId, value}` pairs. [`normalize_slots`] is the single
//! boundary where both collapse to the array form; nothing deeper in the
//! pipeline branches on format. Similarly, `flowId` is the preferred name
//! for the flow/intent trigger with `intentId` kept as a deprecated alias;
//! [`StructuredRequest::to_wire`] resolves the preference once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A named parameter attached to a flow/intent trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Slot identifier.
    pub slot_id: String,
    /// Slot value (any JSON).
    pub value: Value,
}

/// Slots as accepted at the API boundary: record or array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotsInput {
    /// Array of `{slotId, value}` pairs — passed through unchanged.
    List(Vec<Slot>),
    /// Record keyed by slot ID — converted to the array form.
    Record(Map<String, Value>),
}

/// Normalize either slot format to the array-of-pairs wire form.
#[must_use]
pub fn normalize_slots(slots: &SlotsInput) -> Vec<Slot> {
    match slots {
        SlotsInput::List(list) => list.clone(),
        SlotsInput::Record(record) => record
            .iter()
            .map(|(slot_id, value)| Slot {
                slot_id: slot_id.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

/// A structured (machine-field) request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuredRequest {
    /// Selected choice ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice_id: Option<String>,
    /// Target flow node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Flow to trigger (preferred field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    /// Deprecated alias of `flow_id`; honored when `flow_id` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    /// Slots, in either accepted format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<SlotsInput>,
    /// IDs of previously uploaded files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_ids: Option<Vec<String>>,
    /// Free-text utterance accompanying the machine fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utterance: Option<String>,
    /// Internal marker for synthetic polling turns.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub poll: bool,
}

impl StructuredRequest {
    /// A request triggering the given flow.
    #[must_use]
    pub fn flow(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: Some(flow_id.into()),
            ..Self::default()
        }
    }

    /// The synthetic `{poll: true}` request.
    #[must_use]
    pub fn poll() -> Self {
        Self {
            poll: true,
            ..Self::default()
        }
    }

    /// Build the wire-format `structured` object.
    ///
    /// `flowId` wins over the deprecated `intentId`; the chosen value is
    /// transmitted under the wire's `intentId` key. Slots are normalized to
    /// the array form. Absent fields are omitted entirely.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut wire = Map::new();
        if let Some(choice_id) = &self.choice_id {
            let _ = wire.insert("choiceId".into(), json!(choice_id));
        }
        if let Some(node_id) = &self.node_id {
            let _ = wire.insert("nodeId".into(), json!(node_id));
        }
        if let Some(intent) = self.flow_id.as_ref().or(self.intent_id.as_ref()) {
            let _ = wire.insert("intentId".into(), json!(intent));
        }
        if let Some(slots) = &self.slots {
            let _ = wire.insert("slots".into(), json!(normalize_slots(slots)));
        }
        if let Some(upload_ids) = &self.upload_ids {
            let _ = wire.insert("uploadIds".into(), json!(upload_ids));
        }
        if let Some(utterance) = &self.utterance {
            let _ = wire.insert("utterance".into(), json!(utterance));
        }
        if self.poll {
            let _ = wire.insert("poll".into(), json!(true));
        }
        Value::Object(wire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── normalize_slots ──────────────────────────────────────────────

    #[test]
    fn record_becomes_pair_list() {
        let input: SlotsInput = serde_json::from_value(json!({ "A": "1" })).unwrap();
        let slots = normalize_slots(&input);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot_id, "A");
        assert_eq!(slots[0].value, json!("1"));
    }

    #[test]
    fn list_passes_through_unchanged() {
        let input: SlotsInput =
            serde_json::from_value(json!([{ "slotId": "A", "value": "1" }])).unwrap();
        let slots = normalize_slots(&input);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot_id, "A");
    }

    #[test]
    fn record_with_multiple_keys() {
        let input: SlotsInput =
            serde_json::from_value(json!({ "amount": 3, "unit": "days" })).unwrap();
        let slots = normalize_slots(&input);
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().any(|s| s.slot_id == "amount" && s.value == json!(3)));
        assert!(slots.iter().any(|s| s.slot_id == "unit" && s.value == json!("days")));
    }

    // ── to_wire ──────────────────────────────────────────────────────

    #[test]
    fn flow_id_preferred_over_intent_id() {
        let request = StructuredRequest {
            flow_id: Some("flow-1".into()),
            intent_id: Some("legacy-1".into()),
            ..StructuredRequest::default()
        };
        let wire = request.to_wire();
        assert_eq!(wire["intentId"], "flow-1");
    }

    #[test]
    fn deprecated_intent_id_still_honored() {
        let request = StructuredRequest {
            intent_id: Some("legacy-1".into()),
            ..StructuredRequest::default()
        };
        assert_eq!(request.to_wire()["intentId"], "legacy-1");
    }

    #[test]
    fn wire_slots_are_normalized() {
        let request = StructuredRequest {
            slots: Some(SlotsInput::Record(
                serde_json::from_value(json!({ "A": "1" })).unwrap(),
            )),
            ..StructuredRequest::default()
        };
        let wire = request.to_wire();
        assert_eq!(wire["slots"], json!([{ "slotId": "A", "value": "1" }]));
    }

    #[test]
    fn wire_omits_absent_fields() {
        let wire = StructuredRequest::default().to_wire();
        assert_eq!(wire, json!({}));
    }

    #[test]
    fn poll_flag_serialized_only_when_true() {
        assert_eq!(StructuredRequest::poll().to_wire(), json!({ "poll": true }));

        let json = serde_json::to_value(StructuredRequest::flow("f")).unwrap();
        assert!(json.get("poll").is_none());
    }

    #[test]
    fn full_request_wire_shape() {
        let request = StructuredRequest {
            choice_id: Some("c1".into()),
            node_id: Some("n1".into()),
            flow_id: Some("f1".into()),
            upload_ids: Some(vec!["u1".into()]),
            utterance: Some("three days".into()),
            ..StructuredRequest::default()
        };
        let wire = request.to_wire();
        assert_eq!(wire["choiceId"], "c1");
        assert_eq!(wire["nodeId"], "n1");
        assert_eq!(wire["intentId"], "f1");
        assert_eq!(wire["uploadIds"], json!(["u1"]));
        assert_eq!(wire["utterance"], "three days");
    }

    #[test]
    fn serde_roundtrip() {
        let request = StructuredRequest {
            flow_id: Some("f1".into()),
            slots: Some(SlotsInput::List(vec![Slot {
                slot_id: "A".into(),
                value: json!(1),
            }])),
            ..StructuredRequest::default()
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: StructuredRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request, back);
    }
}
