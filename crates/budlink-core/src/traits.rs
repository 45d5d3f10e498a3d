//! Collaborator seams of the orchestrator.
//!
//! The scheduler never touches a radio, a file or a device list directly.
//! It talks to four traits, so the same state machine runs against the
//! daemon's bridge in production and [`crate::MockHost`] in tests.
//!
//! Every method is synchronous: the scheduler runs on a single task and
//! must never suspend between reading and mutating its table. Commands are
//! fire-and-forget; their results come back later as link events.

use std::sync::Arc;
use std::time::Duration;

use budlink_types::{BdAddr, ConnHandle, DeviceClass, PersistedEntry, Profile, ProfileSet, Role, TableHalf};

use crate::command::PairMatch;
use crate::error::Result;

/// Connection control of the Bluetooth host.
pub trait Transport: Send + Sync {
    /// Page `address`, giving up after `page_timeout`.
    fn connect(&self, address: BdAddr, page_timeout: Duration);

    /// Drop the base link of `address`.
    fn disconnect(&self, address: BdAddr);

    /// Open `profile` on the existing link to `address`.
    fn connect_profile(&self, address: BdAddr, profile: Profile);

    /// Abort an in-flight page of `address`.
    fn cancel_pending_connect(&self, address: BdAddr);
}

/// Read access to the live connection registry.
pub trait DeviceRegistry: Send + Sync {
    /// Handle of the base link to `address`, if one is up.
    fn find_connection(&self, address: &BdAddr) -> Option<ConnHandle>;

    fn is_profile_connected(&self, handle: ConnHandle, profile: Profile) -> bool;

    /// All connected profiles of a link, SPP included.
    fn connected_profiles(&self, handle: ConnHandle) -> ProfileSet {
        Profile::ALL
            .into_iter()
            .filter(|p| self.is_profile_connected(handle, *p))
            .collect()
    }

    /// TWS role of the device behind `handle`.
    fn get_role(&self, handle: ConnHandle) -> Role;

    /// Number of connected devices of `class`.
    fn count_connected(&self, class: DeviceClass) -> usize;

    /// TWS role of the local device.
    fn local_role(&self) -> Role;

    /// Maximum number of simultaneous base links.
    fn max_connections(&self) -> usize;

    /// Whether something other than reconnection needs the fast radio mode.
    fn needs_high_performance(&self) -> bool {
        false
    }

    /// Reconnect records of the connected devices, oldest link first.
    fn autoconn_snapshot(&self) -> Vec<PersistedEntry>;

    /// Address and role of every connected device.
    fn connected_devices(&self) -> Vec<(BdAddr, Role)>;

    /// Whether the A2DP signaling channel is up while the stream is not.
    fn is_a2dp_signaling(&self, handle: ConnHandle) -> bool;

    /// Whether encryption was established on the link.
    fn is_security_changed(&self, handle: ConnHandle) -> bool;

    /// Whether the remote looks like an iOS device.
    fn is_ios_device(&self, handle: ConnHandle) -> bool;

    /// Whether the device is the active audio source.
    fn is_active_audio(&self, handle: ConnHandle) -> bool;
}

/// The TWS pairing sub-protocol.
pub trait TwsPairing: Send + Sync {
    fn start_pair_search(&self, tries: u8);

    fn end_pair_search(&self);

    fn is_pair_searching(&self) -> bool;

    /// Abort an in-flight TWS auto connect.
    fn cancel_auto_connect(&self);

    /// Whether a TWS auto connect is in flight.
    fn is_connecting(&self) -> bool;

    fn set_pair_match(&self, mode: PairMatch);

    /// Tell the TWS layer which role the peer should take.
    fn set_expect_role(&self, role: Role);

    /// Drop the TWS peer link.
    fn disconnect_peer(&self, address: Option<BdAddr>);

    /// Whether reconnects should search for any peer instead of the
    /// remembered address.
    fn reconnect_search_mode(&self) -> bool {
        false
    }
}

/// Durable storage of the reconnect table.
pub trait ReconnectStorage: Send + Sync {
    /// Load `capacity` slots. Missing slots are `None`.
    fn load(&self, capacity: usize) -> Result<Vec<Option<PersistedEntry>>>;

    /// Persist the given half of `slots`. Slot 0 is the TWS half.
    fn save(&self, slots: &[Option<PersistedEntry>], half: TableHalf) -> Result<()>;
}

/// The set of collaborators the scheduler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub tws: Arc<dyn TwsPairing>,
    pub storage: Arc<dyn ReconnectStorage>,
}

impl Collaborators {
    /// Use one object for every seam.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: Transport + DeviceRegistry + TwsPairing + ReconnectStorage + 'static,
    {
        Self {
            transport: host.clone(),
            registry: host.clone(),
            tws: host.clone(),
            storage: host,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
