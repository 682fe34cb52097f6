// ── Phone domain types ──

use chrono::{DateTime, Utc};
use opener_store::FieldPatch;
use serde::{Deserialize, Serialize};

/// A user device authorized to open gates.
///
/// `key` is intended to be unique across phones but that is only checked
/// when a phone is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Phone {
    #[serde(skip_deserializing)]
    pub id: String,
    pub key: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<i64>,
    pub friendly_name: String,
    pub owner: String,
    /// Linked account id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub number: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<ActivationRecord>,
    pub email: String,
}

impl Phone {
    pub fn is_activated(&self) -> bool {
        self.activation.is_some()
    }
}

/// An activation code plus the time the store recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub code: i64,
    /// Assigned by the store on write; absent in requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<DateTime<Utc>>,
}

impl ActivationRecord {
    pub fn new(code: i64) -> Self {
        Self { code, when: None }
    }
}

// ── Requests ─────────────────────────────────────────────────────────

/// Attributes for a new phone. New phones start inactive with no
/// activation record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneCreateAttributes {
    pub key: i64,
    pub friendly_name: String,
    pub owner: String,
    pub number: String,
    pub email: String,
}

/// Partial phone update. `None` leaves a field unchanged; `Some` sets
/// it, including `Some(String::new())`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhoneUpdateAttributes {
    pub pin: Option<i64>,
    pub friendly_name: Option<String>,
    pub owner: Option<String>,
    pub uid: Option<String>,
    pub number: Option<String>,
    pub email: Option<String>,
}

impl PhoneUpdateAttributes {
    pub fn is_empty(&self) -> bool {
        self.to_patch().is_empty()
    }

    /// Field patch holding exactly the present fields.
    pub fn to_patch(&self) -> FieldPatch {
        let mut patch = FieldPatch::new();
        if let Some(pin) = self.pin {
            patch = patch.set("pin", pin);
        }
        let strings = [
            ("friendlyName", &self.friendly_name),
            ("owner", &self.owner),
            ("uid", &self.uid),
            ("number", &self.number),
            ("email", &self.email),
        ];
        for (path, value) in strings {
            if let Some(value) = value {
                patch = patch.set(path, value.as_str());
            }
        }
        patch
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_activation_with_server_time() {
        let phone: Phone = serde_json::from_value(json!({
            "key": 42,
            "friendlyName": "Ann's phone",
            "active": true,
            "activation": { "code": 5150, "when": "2026-03-01T08:30:00.000000Z" }
        }))
        .unwrap();

        assert_eq!(phone.key, 42);
        assert!(phone.active);
        let activation = phone.activation.unwrap();
        assert_eq!(activation.code, 5150);
        assert_eq!(
            activation.when.unwrap().to_rfc3339(),
            "2026-03-01T08:30:00+00:00"
        );
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let value = serde_json::to_value(Phone {
            key: 1,
            ..Phone::default()
        })
        .unwrap();
        assert!(value.get("pin").is_none());
        assert!(value.get("uid").is_none());
        assert!(value.get("activation").is_none());
    }

    #[test]
    fn update_patch_contains_only_present_fields() {
        let attrs = PhoneUpdateAttributes {
            friendly_name: Some("Kitchen door".into()),
            ..PhoneUpdateAttributes::default()
        };
        insta::assert_json_snapshot!(attrs.to_patch(), @r#"
        [
          {
            "path": "friendlyName",
            "op": "set",
            "value": "Kitchen door"
          }
        ]
        "#);
    }

    #[test]
    fn update_patch_keeps_empty_strings_and_fixed_order() {
        let attrs = PhoneUpdateAttributes {
            email: Some(String::new()),
            pin: Some(1234),
            owner: Some("bob".into()),
            ..PhoneUpdateAttributes::default()
        };
        let patch = attrs.to_patch();
        let paths: Vec<&str> = patch.paths().collect();
        assert_eq!(paths, vec!["pin", "owner", "email"]);
        assert_eq!(
            serde_json::to_value(&patch).unwrap()[2],
            json!({ "path": "email", "op": "set", "value": "" })
        );
    }

    #[test]
    fn empty_update_has_no_patch() {
        assert!(PhoneUpdateAttributes::default().is_empty());
    }
}
