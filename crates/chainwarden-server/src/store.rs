//! In-memory registry of blocked events.

use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{BlockEvent, BlockedEvent};

/// Append-only store of blocked events, kept for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Arc<RwLock<Vec<BlockedEvent>>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a block report and returns the stored event.
    pub fn add(&self, report: &BlockEvent) -> BlockedEvent {
        let package = report.package();
        let blocked = BlockedEvent {
            id: Uuid::new_v4().to_string(),
            ts: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            product: package.product,
            package_name: package.package_name,
            package_version: package.package_version,
            bypass_enabled: true,
        };

        self.events.write().push(blocked.clone());
        blocked
    }

    pub fn get(&self, id: &str) -> Option<BlockedEvent> {
        self.events.read().iter().find(|e| e.id == id).cloned()
    }

    /// Copy of all events in insertion order.
    pub fn list(&self) -> Vec<BlockedEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
