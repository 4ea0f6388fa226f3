//! Application state for the ingress server.

use crate::notifier::UiNotifier;
use crate::store::EventStore;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Blocked events received from the proxy.
    pub store: EventStore,
    /// Relays blocks to the UI.
    pub notifier: UiNotifier,
    /// Whether `/v1/*` routes check the UI bearer token.
    pub require_token: bool,
}

impl AppState {
    pub fn new(store: EventStore, notifier: UiNotifier, require_token: bool) -> Self {
        Self {
            store,
            notifier,
            require_token,
        }
    }

    /// Checks an `Authorization` header against the UI token when required.
    pub fn authorized(&self, header: Option<&str>) -> bool {
        !self.require_token || self.notifier.link().authorizes(header)
    }
}
