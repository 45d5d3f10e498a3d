//! Application state shared across handlers.
//!
//! The state owns the three things every request touches: the handle of the
//! scheduler task, the in-memory link registry the scheduler reads, and the
//! radio bridge the scheduler writes to.
//!
//! # Link reports
//!
//! Link events arrive over HTTP or the WebSocket. Both paths go through
//! [`AppState::report_link`], which folds the event into the registry before
//! the scheduler sees it, so the scheduler always observes the post-event
//! view of the link.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use budlink_core::{
    Collaborators, ConnectHandle, ConnectService, LinkEvent, LinkRegistry, RetryPolicy,
};
use budlink_store::Store;
use budlink_types::{BdAddr, Role};

use crate::bridge::HostBridge;
use crate::config::Config;
use crate::storage::StoreBackend;

/// A link event reported by the radio bridge.
///
/// ```
/// use budlink_service::state::LinkReport;
///
/// let report: LinkReport = serde_json::from_str(
///     r#"{"address":"00:11:22:33:44:55","role":"master","event":"base_connected"}"#,
/// )
/// .unwrap();
/// assert!(report.role.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub address: BdAddr,
    /// TWS role of the remote, when the bridge knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(flatten)]
    pub event: LinkEvent,
}

/// Shared application state.
pub struct AppState {
    /// Handle of the scheduler task.
    pub handle: ConnectHandle,
    /// Live links as reported by the bridge.
    pub registry: Arc<LinkRegistry>,
    /// Outgoing host commands.
    pub bridge: Arc<HostBridge>,
    /// The reconnect table store, shared with the scheduler.
    pub store: Arc<Mutex<Store>>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
}

impl AppState {
    /// Create the state and start the scheduler task.
    ///
    /// Must be called inside a tokio runtime. Fails if the connect settings
    /// are invalid or the reconnect table cannot be loaded.
    pub fn new(store: Store, config: Config) -> budlink_core::Result<Arc<Self>> {
        let store = Arc::new(Mutex::new(store));
        let registry = Arc::new(LinkRegistry::new(config.connect.max_connections));
        let bridge = Arc::new(HostBridge::new(config.server.broadcast_buffer));

        let collab = Collaborators {
            transport: bridge.clone(),
            registry: registry.clone(),
            tws: bridge.clone(),
            storage: Arc::new(StoreBackend::new(store.clone())),
        };
        let handle = ConnectService::spawn(config.connect.to_connect_config(), collab)?;

        Ok(Arc::new(Self {
            handle,
            registry,
            bridge,
            store,
            config: RwLock::new(config),
        }))
    }

    /// Retry policy applied to campaigns that do not bring their own.
    pub async fn default_policy(&self) -> RetryPolicy {
        self.config.read().await.policy.to_policy()
    }

    /// Feed one link report to the registry, the bridge and the scheduler.
    pub async fn report_link(&self, report: LinkReport) -> budlink_core::Result<()> {
        let LinkReport {
            address,
            role,
            event,
        } = report;
        debug!("link report {address}: {event:?}");

        self.registry.apply(address, &event);
        if let Some(role) = role {
            self.registry.set_role(address, role);
        }
        self.bridge.observe(&event);

        self.handle.link_event(address, event).await
    }
}
