// ── Phone capability wrapper ──
//
// A `PhoneHandle` pairs a replicated `Phone` with the outbound messaging
// hook. The repository builds one handle per phone id and swaps the
// wrapped entity on every change, so handles held by callers stay live.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::model::Phone;

/// Outbound messaging to a phone's owner. Fire-and-forget: delivery
/// failures are the notifier's concern and are never reported back.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, phone_id: &str);
}

/// Notifier that only records the request in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, phone_id: &str) {
        debug!(phone = %phone_id, "send notification");
    }
}

/// Read-only view of a phone plus its notification hook.
pub trait PhoneCapability {
    fn id(&self) -> &str;
    fn number(&self) -> String;
    fn email(&self) -> String;
    fn owner(&self) -> String;
    fn notify(&self);
}

/// Live wrapper around a replicated phone.
pub struct PhoneHandle {
    id: String,
    entity: ArcSwap<Phone>,
    notifier: Arc<dyn Notifier>,
}

impl PhoneHandle {
    pub fn new(phone: Phone, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            id: phone.id.clone(),
            entity: ArcSwap::from_pointee(phone),
            notifier,
        }
    }

    /// The phone as of the last applied change.
    pub fn entity(&self) -> Arc<Phone> {
        self.entity.load_full()
    }

    pub(crate) fn replace(&self, phone: Phone) {
        self.entity.store(Arc::new(phone));
    }
}

impl PhoneCapability for PhoneHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn number(&self) -> String {
        self.entity.load().number.clone()
    }

    fn email(&self) -> String {
        self.entity.load().email.clone()
    }

    fn owner(&self) -> String {
        self.entity.load().owner.clone()
    }

    fn notify(&self) {
        self.notifier.notify(&self.id);
    }
}

impl fmt::Debug for PhoneHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhoneHandle")
            .field("id", &self.id)
            .field("entity", &**self.entity.load())
            .finish_non_exhaustive()
    }
}
