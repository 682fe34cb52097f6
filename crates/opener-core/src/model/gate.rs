// ── Gate domain type ──

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::null_as_default;

/// A physical access-control device.
///
/// The UUID fields name the BLE services and characteristics the gate
/// exposes; they are opaque to the replica. `phones` holds the keys of
/// every phone allowed to open this gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Gate {
    #[serde(skip_deserializing)]
    pub id: String,
    pub device_id: String,
    pub name: String,

    pub opener_service_uuid: String,
    pub counter_uuid: String,
    pub opener_uuid: String,

    pub admin_service_uuid: String,
    pub phone_flasher_uuid: String,
    pub rc_flasher_uuid: String,
    pub get_token_uuid: String,
    pub get_flash_uuid: String,

    pub rolling_code: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub phones: BTreeSet<i64>,
}

impl Gate {
    pub fn has_phone(&self, key: i64) -> bool {
        self.phones.contains(&key)
    }
}
