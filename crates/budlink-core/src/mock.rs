//! Mock Bluetooth host for testing.
//!
//! [`MockHost`] implements every collaborator trait at once. Commands the
//! scheduler issues are recorded as [`HostCommand`]s, the connection
//! registry is a real [`LinkRegistry`] driven through
//! [`MockHost::link_event`], and the reconnect table "storage" is a vector.
//!
//! # Features
//!
//! - **Command log**: inspect or drain what the scheduler asked for
//! - **Failure injection**: make table saves fail
//! - **TWS flags**: simulate an active pair search or TWS auto connect

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use budlink_types::{BdAddr, ConnHandle, DeviceClass, PersistedEntry, Profile, ProfileSet, Role, TableHalf};

use crate::command::{HostCommand, PairMatch};
use crate::error::{Error, Result};
use crate::registry::LinkRegistry;
use crate::router::LinkEvent;
use crate::traits::{DeviceRegistry, ReconnectStorage, Transport, TwsPairing};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock Bluetooth host.
///
/// ```
/// use std::time::Duration;
/// use budlink_core::{HostCommand, MockHost, Transport};
/// use budlink_types::BdAddr;
///
/// let host = MockHost::new();
/// let addr = BdAddr::new([1, 2, 3, 4, 5, 6]);
/// host.connect(addr, Duration::from_secs(3));
/// assert_eq!(host.connect_count(&addr), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockHost {
    registry: LinkRegistry,
    commands: Mutex<Vec<HostCommand>>,
    stored: Mutex<Vec<Option<PersistedEntry>>>,
    saves: Mutex<Vec<TableHalf>>,
    fail_saves: AtomicBool,
    pair_searching: AtomicBool,
    tws_connecting: AtomicBool,
    search_mode: AtomicBool,
}

impl MockHost {
    /// Create a host with no links and an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host whose storage already holds `slots`.
    pub fn with_stored(slots: Vec<Option<PersistedEntry>>) -> Self {
        let host = Self::default();
        *lock(&host.stored) = slots;
        host
    }

    /// The underlying registry, for role and flag setup.
    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    /// Apply a link event to the registry and hand it back, so a test can
    /// forward it to the scheduler in the order the daemon would.
    pub fn link_event(&self, address: BdAddr, event: LinkEvent) -> LinkEvent {
        self.registry.apply(address, &event);
        event
    }

    /// Every command recorded so far.
    pub fn commands(&self) -> Vec<HostCommand> {
        lock(&self.commands).clone()
    }

    /// Drain the command log.
    pub fn take_commands(&self) -> Vec<HostCommand> {
        std::mem::take(&mut *lock(&self.commands))
    }

    /// Number of pages issued to `address`.
    pub fn connect_count(&self, address: &BdAddr) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| matches!(c, HostCommand::Connect { address: a, .. } if a == address))
            .count()
    }

    /// Number of TWS pair searches started.
    pub fn pair_search_count(&self) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| matches!(c, HostCommand::StartPairSearch { .. }))
            .count()
    }

    /// Slots as last persisted.
    pub fn stored(&self) -> Vec<Option<PersistedEntry>> {
        lock(&self.stored).clone()
    }

    /// Halves saved so far, in order.
    pub fn saves(&self) -> Vec<TableHalf> {
        lock(&self.saves).clone()
    }

    /// Make every subsequent save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_pair_searching(&self, searching: bool) {
        self.pair_searching.store(searching, Ordering::SeqCst);
    }

    pub fn set_tws_connecting(&self, connecting: bool) {
        self.tws_connecting.store(connecting, Ordering::SeqCst);
    }

    pub fn set_reconnect_search_mode(&self, enabled: bool) {
        self.search_mode.store(enabled, Ordering::SeqCst);
    }

    fn record(&self, command: HostCommand) {
        lock(&self.commands).push(command);
    }
}

impl Transport for MockHost {
    fn connect(&self, address: BdAddr, page_timeout: Duration) {
        self.record(HostCommand::Connect {
            address,
            page_timeout_ms: page_timeout.as_millis() as u64,
        });
    }

    fn disconnect(&self, address: BdAddr) {
        self.record(HostCommand::Disconnect { address });
    }

    fn connect_profile(&self, address: BdAddr, profile: Profile) {
        self.record(HostCommand::ConnectProfile { address, profile });
    }

    fn cancel_pending_connect(&self, address: BdAddr) {
        self.record(HostCommand::CancelConnect { address });
    }
}

impl TwsPairing for MockHost {
    fn start_pair_search(&self, tries: u8) {
        self.pair_searching.store(true, Ordering::SeqCst);
        self.tws_connecting.store(true, Ordering::SeqCst);
        self.record(HostCommand::StartPairSearch { tries });
    }

    fn end_pair_search(&self) {
        self.pair_searching.store(false, Ordering::SeqCst);
        self.record(HostCommand::EndPairSearch);
    }

    fn is_pair_searching(&self) -> bool {
        self.pair_searching.load(Ordering::SeqCst)
    }

    fn cancel_auto_connect(&self) {
        self.tws_connecting.store(false, Ordering::SeqCst);
        self.record(HostCommand::CancelTwsConnect);
    }

    fn is_connecting(&self) -> bool {
        self.tws_connecting.load(Ordering::SeqCst)
    }

    fn set_pair_match(&self, mode: PairMatch) {
        self.record(HostCommand::SetPairMatch { mode });
    }

    fn set_expect_role(&self, role: Role) {
        self.record(HostCommand::SetExpectRole { role });
    }

    fn disconnect_peer(&self, address: Option<BdAddr>) {
        self.record(HostCommand::DisconnectTwsPeer { address });
    }

    fn reconnect_search_mode(&self) -> bool {
        self.search_mode.load(Ordering::SeqCst)
    }
}

impl ReconnectStorage for MockHost {
    fn load(&self, capacity: usize) -> Result<Vec<Option<PersistedEntry>>> {
        let mut slots = lock(&self.stored).clone();
        slots.resize(capacity, None);
        Ok(slots)
    }

    fn save(&self, slots: &[Option<PersistedEntry>], half: TableHalf) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::storage("mock save failure"));
        }

        let mut stored = lock(&self.stored);
        if stored.len() < slots.len() {
            stored.resize(slots.len(), None);
        }
        for (index, slot) in slots.iter().enumerate() {
            let in_half = if index == 0 {
                half.includes_tws()
            } else {
                half.includes_phone()
            };
            if in_half {
                stored[index] = *slot;
            }
        }
        lock(&self.saves).push(half);
        Ok(())
    }
}

impl DeviceRegistry for MockHost {
    fn find_connection(&self, address: &BdAddr) -> Option<ConnHandle> {
        self.registry.find_connection(address)
    }

    fn is_profile_connected(&self, handle: ConnHandle, profile: Profile) -> bool {
        self.registry.is_profile_connected(handle, profile)
    }

    fn connected_profiles(&self, handle: ConnHandle) -> ProfileSet {
        self.registry.connected_profiles(handle)
    }

    fn get_role(&self, handle: ConnHandle) -> Role {
        self.registry.get_role(handle)
    }

    fn count_connected(&self, class: DeviceClass) -> usize {
        self.registry.count_connected(class)
    }

    fn local_role(&self) -> Role {
        self.registry.local_role()
    }

    fn max_connections(&self) -> usize {
        self.registry.max_connections()
    }

    fn needs_high_performance(&self) -> bool {
        self.registry.needs_high_performance()
    }

    fn autoconn_snapshot(&self) -> Vec<PersistedEntry> {
        self.registry.autoconn_snapshot()
    }

    fn connected_devices(&self) -> Vec<(BdAddr, Role)> {
        self.registry.connected_devices()
    }

    fn is_a2dp_signaling(&self, handle: ConnHandle) -> bool {
        self.registry.is_a2dp_signaling(handle)
    }

    fn is_security_changed(&self, handle: ConnHandle) -> bool {
        self.registry.is_security_changed(handle)
    }

    fn is_ios_device(&self, handle: ConnHandle) -> bool {
        self.registry.is_ios_device(handle)
    }

    fn is_active_audio(&self, handle: ConnHandle) -> bool {
        self.registry.is_active_audio(handle)
    }
}
