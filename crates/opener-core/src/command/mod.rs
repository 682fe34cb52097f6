// ── Command API ──
//
// Every write goes straight to the document store. Nothing here touches
// the local repository: effects become visible only when the store
// echoes them back through the collection feeds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opener_store::{DocumentStore, FieldPatch, Filter};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::config::ReplicaConfig;
use crate::error::CoreError;
use crate::model::{Gate, PhoneCreateAttributes, PhoneUpdateAttributes};

/// All possible write operations against the replicated collections.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Phone operations ─────────────────────────────────────────────
    CreatePhone(PhoneCreateAttributes),
    UpdatePhone {
        id: String,
        attributes: PhoneUpdateAttributes,
    },
    DeletePhone {
        id: String,
    },
    ActivatePhone {
        id: String,
        active: bool,
    },
    SetActivation {
        id: String,
        code: i64,
    },

    // ── Gate operations ──────────────────────────────────────────────
    CreateGate {
        id: String,
        gate: Gate,
    },
    DeleteGate {
        id: String,
    },
    AddGatePhone {
        gate_id: String,
        key: i64,
    },
    RemoveGatePhone {
        gate_id: String,
        key: i64,
    },
    SetRollingCode {
        gate_id: String,
        rolling_code: u32,
    },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Ok,
    /// A document was created; `id` is its store-assigned key.
    Created { id: String },
}

/// Issues gate and phone writes against a document store.
///
/// Each call is a single store round-trip bounded by the configured
/// command timeout. Store failures are returned unmodified inside
/// [`CoreError::Store`].
pub struct DeviceCommands<S> {
    store: Arc<S>,
    gates: String,
    phones: String,
    timeout: Duration,
}

impl<S> Clone for DeviceCommands<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gates: self.gates.clone(),
            phones: self.phones.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: DocumentStore> DeviceCommands<S> {
    pub fn new(store: Arc<S>, config: &ReplicaConfig) -> Self {
        Self {
            store,
            gates: config.gates_collection.clone(),
            phones: config.phones_collection.clone(),
            timeout: config.command_timeout,
        }
    }

    /// Route a [`Command`] to the matching operation.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        match cmd {
            Command::CreatePhone(attrs) => {
                let id = self.create_phone(&attrs).await?;
                return Ok(CommandResult::Created { id });
            }
            Command::UpdatePhone { id, attributes } => self.update_phone(&id, &attributes).await,
            Command::DeletePhone { id } => self.delete_phone(&id).await,
            Command::ActivatePhone { id, active } => self.activate_phone(&id, active).await,
            Command::SetActivation { id, code } => self.set_activation(&id, code).await,
            Command::CreateGate { id, gate } => self.create_gate(&id, &gate).await,
            Command::DeleteGate { id } => self.delete_gate(&id).await,
            Command::AddGatePhone { gate_id, key } => self.add_gate_phone(&gate_id, key).await,
            Command::RemoveGatePhone { gate_id, key } => {
                self.remove_gate_phone(&gate_id, key).await
            }
            Command::SetRollingCode {
                gate_id,
                rolling_code,
            } => self.set_rolling_code(&gate_id, rolling_code).await,
        }?;
        Ok(CommandResult::Ok)
    }

    // ── Phones ───────────────────────────────────────────────────────

    /// Create a phone unless another phone already has the same key.
    ///
    /// The key check and the insert run in one store transaction, so of
    /// two concurrent creates with the same key exactly one succeeds.
    /// Returns the new document id.
    pub async fn create_phone(&self, attrs: &PhoneCreateAttributes) -> Result<String, CoreError> {
        let mut body = serde_json::to_value(attrs)?;
        if let Value::Object(fields) = &mut body {
            fields.insert("active".into(), Value::Bool(false));
        }
        let key = attrs.key;
        let phones = self.phones.as_str();

        let id = self
            .bounded(
                "create_phone",
                self.store.run_transaction(|tx| -> Result<String, CoreError> {
                    if !tx.query(phones, &Filter::eq("key", key))?.is_empty() {
                        return Err(CoreError::Conflict { key });
                    }
                    Ok(tx.create(phones, body.clone())?)
                }),
            )
            .await?;
        debug!(phone = %id, key, "phone created");
        Ok(id)
    }

    /// Patch the present fields of `attributes`. An update with no
    /// fields is a no-op and never reaches the store.
    pub async fn update_phone(
        &self,
        id: &str,
        attributes: &PhoneUpdateAttributes,
    ) -> Result<(), CoreError> {
        let patch = attributes.to_patch();
        if patch.is_empty() {
            debug!(phone = %id, "empty phone update skipped");
            return Ok(());
        }
        self.patch("update_phone", &self.phones, id, patch).await
    }

    pub async fn delete_phone(&self, id: &str) -> Result<(), CoreError> {
        self.bounded("delete_phone", async {
            self.store.delete_document(&self.phones, id).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn activate_phone(&self, id: &str, active: bool) -> Result<(), CoreError> {
        let patch = FieldPatch::new().set("active", active);
        self.patch("activate_phone", &self.phones, id, patch).await
    }

    /// Replace the phone's activation record with `code`, stamped with
    /// the store's commit time.
    pub async fn set_activation(&self, id: &str, code: i64) -> Result<(), CoreError> {
        let patch = FieldPatch::new()
            .set("activation", json!({ "code": code }))
            .server_timestamp("activation.when");
        self.patch("set_activation", &self.phones, id, patch).await
    }

    // ── Gates ────────────────────────────────────────────────────────

    /// Create or overwrite the gate document at `id`.
    pub async fn create_gate(&self, id: &str, gate: &Gate) -> Result<(), CoreError> {
        let mut gate = gate.clone();
        id.clone_into(&mut gate.id);
        let body = serde_json::to_value(&gate)?;
        self.bounded("create_gate", async {
            self.store.set_document(&self.gates, id, body).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn delete_gate(&self, id: &str) -> Result<(), CoreError> {
        self.bounded("delete_gate", async {
            self.store.delete_document(&self.gates, id).await.map_err(CoreError::from)
        })
        .await
    }

    /// Add `key` to the gate's phone set. Adding a present key changes nothing.
    pub async fn add_gate_phone(&self, gate_id: &str, key: i64) -> Result<(), CoreError> {
        let patch = FieldPatch::new().array_union("phones", vec![Value::from(key)]);
        self.patch("add_gate_phone", &self.gates, gate_id, patch).await
    }

    /// Remove `key` from the gate's phone set. Removing an absent key
    /// changes nothing.
    pub async fn remove_gate_phone(&self, gate_id: &str, key: i64) -> Result<(), CoreError> {
        let patch = FieldPatch::new().array_remove("phones", vec![Value::from(key)]);
        self.patch("remove_gate_phone", &self.gates, gate_id, patch).await
    }

    /// Overwrite the gate's rolling code. Last write wins.
    pub async fn set_rolling_code(&self, gate_id: &str, rolling_code: u32) -> Result<(), CoreError> {
        let patch = FieldPatch::new().set("rollingCode", rolling_code);
        self.patch("set_rolling_code", &self.gates, gate_id, patch).await
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn patch(
        &self,
        operation: &'static str,
        collection: &str,
        id: &str,
        patch: FieldPatch,
    ) -> Result<(), CoreError> {
        self.bounded(operation, async {
            self.store.update_fields(collection, id, patch).await.map_err(CoreError::from)
        })
        .await
    }

    /// Run one store call under the command timeout. Dropping the call on
    /// timeout cancels it.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let result = tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            });
        if let Err(e) = &result {
            error!(operation, error = %e, "command failed");
        }
        result
    }
}

// ── Tests ────────────────────────────────────────────────────────────
