// ── Domain model ──
//
// Value types for the two replicated collections. Field names on the
// wire are camelCase; the store-assigned document key is the identity
// and always overrides whatever `id` a body carries.

pub mod gate;
pub mod phone;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

pub use gate::Gate;
pub use phone::{ActivationRecord, Phone, PhoneCreateAttributes, PhoneUpdateAttributes};

/// The two collections the replica keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Gates,
    Phones,
}

impl Collection {
    pub const ALL: [Self; 2] = [Self::Gates, Self::Phones];

    /// Store collection name used when none is configured.
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Gates => "gates",
            Self::Phones => "phones",
        }
    }

    /// Singular entity label for logs and errors.
    pub fn entity_type(self) -> &'static str {
        match self {
            Self::Gates => "gate",
            Self::Phones => "phone",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Decode an explicit `null` as the field's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
