//! Orchestrator event system.
//!
//! The scheduler publishes [`ConnectEvent`]s for everything the rest of the
//! stack reacts to: campaign lifecycle, the coarse "reconnecting" indication,
//! high-performance radio requests and reconnect-table saves.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use budlink_types::{BdAddr, DeviceClass, DisconnectReason, Role, TableHalf};

use crate::campaign::{CampaignKind, CampaignOutcome};

/// Events emitted by the reconnect orchestrator.
///
/// All events are serializable so the service can forward them verbatim.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectEvent {
    /// A campaign was accepted.
    CampaignStarted { address: BdAddr, kind: CampaignKind },
    /// A campaign left the table.
    CampaignFinished {
        address: BdAddr,
        outcome: CampaignOutcome,
        base_retries: u8,
    },
    /// No campaign is left; the scheduler stopped.
    AutoReconnectComplete,
    /// The scheduler started or stopped running.
    ReconnectState { active: bool },
    /// The high-performance radio request changed.
    HighPerformance { requested: bool },
    /// A base link disconnect worth reporting upstream.
    Disconnected {
        address: BdAddr,
        reason: DisconnectReason,
        role: Role,
    },
    /// Part of the reconnect table was persisted.
    ReconnectTableSaved { half: TableHalf },
    /// A clear-list request finished.
    ReconnectListCleared { class: DeviceClass },
    /// The TWS half of the table was cleared.
    TwsClearListComplete,
}

/// Sender for orchestrator events.
pub type EventSender = broadcast::Sender<ConnectEvent>;

/// Receiver for orchestrator events.
pub type EventReceiver = broadcast::Receiver<ConnectEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ConnectEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the sender for direct use.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
