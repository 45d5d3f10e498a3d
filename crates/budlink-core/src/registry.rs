//! In-memory connection registry.
//!
//! [`LinkRegistry`] tracks the base links and profiles the host reports and
//! answers the [`DeviceRegistry`] queries from that record. The daemon feeds
//! it every link event before the event reaches the scheduler, so the
//! scheduler always observes the post-event view.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use budlink_types::{BdAddr, ConnHandle, DeviceClass, PersistedEntry, Profile, ProfileSet, Role};

use crate::router::LinkEvent;
use crate::traits::DeviceRegistry;

/// One live base link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkInfo {
    pub address: BdAddr,
    pub handle: ConnHandle,
    pub role: Role,
    pub profiles: ProfileSet,
    /// First profile that came up on this link.
    pub first_profile: Option<Profile>,
    pub a2dp_signaling: bool,
    pub secured: bool,
    pub ios: bool,
    pub active_audio: bool,
}

#[derive(Debug)]
struct RegistryInner {
    links: Vec<LinkInfo>,
    next_handle: u16,
    local_role: Role,
    max_connections: usize,
    high_performance: bool,
}

/// Thread-safe registry of live links.
#[derive(Debug)]
pub struct LinkRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new(3)
    }
}

impl LinkRegistry {
    /// Create an empty registry allowing `max_connections` base links.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                links: Vec::new(),
                next_handle: 1,
                local_role: Role::None,
                max_connections,
                high_performance: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one link event into the registry.
    pub fn apply(&self, address: BdAddr, event: &LinkEvent) {
        let mut inner = self.write();

        if let LinkEvent::BaseConnected = event {
            if inner.links.iter().all(|l| l.address != address) {
                let handle = ConnHandle(inner.next_handle);
                inner.next_handle = inner.next_handle.wrapping_add(1).max(1);
                inner.links.push(LinkInfo {
                    address,
                    handle,
                    role: Role::None,
                    profiles: ProfileSet::empty(),
                    first_profile: None,
                    a2dp_signaling: false,
                    secured: false,
                    ios: false,
                    active_audio: false,
                });
            }
            return;
        }

        if let LinkEvent::BaseDisconnected { .. } = event {
            inner.links.retain(|l| l.address != address);
            return;
        }

        let Some(link) = inner.links.iter_mut().find(|l| l.address == address) else {
            return;
        };

        match *event {
            LinkEvent::ProfileConnected { profile } => {
                link.profiles.insert(profile);
                link.first_profile.get_or_insert(profile);
                if profile == Profile::A2dp {
                    link.a2dp_signaling = false;
                }
            }
            LinkEvent::ProfileDisconnected { profile } => {
                link.profiles.remove(profile);
            }
            LinkEvent::A2dpSignalingConnected => link.a2dp_signaling = true,
            LinkEvent::SecurityChanged => link.secured = true,
            _ => {}
        }
    }

    /// Set the TWS role of a connected device. Returns false if unknown.
    pub fn set_role(&self, address: BdAddr, role: Role) -> bool {
        let mut inner = self.write();
        match inner.links.iter_mut().find(|l| l.address == address) {
            Some(link) => {
                link.role = role;
                true
            }
            None => false,
        }
    }

    /// Set the TWS role of the local device.
    pub fn set_local_role(&self, role: Role) {
        self.write().local_role = role;
    }

    /// Mark a connected device as iOS.
    pub fn set_ios(&self, address: BdAddr, ios: bool) {
        if let Some(link) = self.write().links.iter_mut().find(|l| l.address == address) {
            link.ios = ios;
        }
    }

    /// Make `address` the active audio source, or clear it with `None`.
    pub fn set_active_audio(&self, address: Option<BdAddr>) {
        for link in self.write().links.iter_mut() {
            link.active_audio = Some(link.address) == address;
        }
    }

    pub fn set_max_connections(&self, max: usize) {
        self.write().max_connections = max;
    }

    /// Request the fast radio mode independently of reconnection.
    pub fn set_high_performance(&self, requested: bool) {
        self.write().high_performance = requested;
    }

    /// Snapshot of every live link, oldest first.
    pub fn links(&self) -> Vec<LinkInfo> {
        self.read().links.clone()
    }

    pub fn link(&self, address: &BdAddr) -> Option<LinkInfo> {
        self.read().links.iter().find(|l| l.address == *address).cloned()
    }

    fn with_handle<T>(&self, handle: ConnHandle, f: impl FnOnce(&LinkInfo) -> T) -> Option<T> {
        self.read().links.iter().find(|l| l.handle == handle).map(f)
    }
}

impl DeviceRegistry for LinkRegistry {
    fn find_connection(&self, address: &BdAddr) -> Option<ConnHandle> {
        self.read()
            .links
            .iter()
            .find(|l| l.address == *address)
            .map(|l| l.handle)
    }

    fn is_profile_connected(&self, handle: ConnHandle, profile: Profile) -> bool {
        self.with_handle(handle, |l| l.profiles.contains(profile))
            .unwrap_or(false)
    }

    fn connected_profiles(&self, handle: ConnHandle) -> ProfileSet {
        self.with_handle(handle, |l| l.profiles).unwrap_or_default()
    }

    fn get_role(&self, handle: ConnHandle) -> Role {
        self.with_handle(handle, |l| l.role).unwrap_or_default()
    }

    fn count_connected(&self, class: DeviceClass) -> usize {
        self.read()
            .links
            .iter()
            .filter(|l| class.matches(l.role))
            .count()
    }

    fn local_role(&self) -> Role {
        self.read().local_role
    }

    fn max_connections(&self) -> usize {
        self.read().max_connections
    }

    fn needs_high_performance(&self) -> bool {
        self.read().high_performance
    }

    fn autoconn_snapshot(&self) -> Vec<PersistedEntry> {
        self.read()
            .links
            .iter()
            .map(|l| {
                let mut entry = PersistedEntry::new(l.address, l.role).with_profiles(l.profiles);
                entry.hfp_first = l.first_profile == Some(Profile::Hfp);
                entry.active = l.active_audio;
                entry
            })
            .collect()
    }

    fn connected_devices(&self) -> Vec<(BdAddr, Role)> {
        self.read()
            .links
            .iter()
            .map(|l| (l.address, l.role))
            .collect()
    }

    fn is_a2dp_signaling(&self, handle: ConnHandle) -> bool {
        self.with_handle(handle, |l| l.a2dp_signaling)
            .unwrap_or(false)
    }

    fn is_security_changed(&self, handle: ConnHandle) -> bool {
        self.with_handle(handle, |l| l.secured).unwrap_or(false)
    }

    fn is_ios_device(&self, handle: ConnHandle) -> bool {
        self.with_handle(handle, |l| l.ios).unwrap_or(false)
    }

    fn is_active_audio(&self, handle: ConnHandle) -> bool {
        self.with_handle(handle, |l| l.active_audio)
            .unwrap_or(false)
    }
}
