//! The persisted reconnect table.
//!
//! A fixed number of slots. Slot 0 is reserved for the TWS peer and slots
//! 1.. hold phones, newest first. Every mutating operation reports which
//! [`TableHalf`] changed so the caller can save just that half.

use budlink_types::{BdAddr, DeviceClass, PersistedEntry, Role, TableHalf};

/// In-memory reconnect table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectTable {
    slots: Vec<Option<PersistedEntry>>,
}

const TWS_SLOT: usize = 0;

fn half_of_slot(index: usize) -> TableHalf {
    if index == TWS_SLOT {
        TableHalf::Tws
    } else {
        TableHalf::Phone
    }
}

fn merge_half(acc: Option<TableHalf>, half: TableHalf) -> Option<TableHalf> {
    Some(acc.map_or(half, |h| h.union(half)))
}

impl ReconnectTable {
    /// An empty table of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Build a table from loaded slots, padding or truncating to `capacity`.
    ///
    /// A phone found in slot 0 or a TWS peer found in a phone slot is
    /// dropped.
    pub fn from_slots(mut slots: Vec<Option<PersistedEntry>>, capacity: usize) -> Self {
        slots.resize(capacity, None);
        for (index, slot) in slots.iter_mut().enumerate() {
            let misplaced = slot
                .as_ref()
                .is_some_and(|e| e.is_tws() != (index == TWS_SLOT) || e.address.is_zero());
            if misplaced {
                *slot = None;
            }
        }
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The raw slots.
    pub fn slots(&self) -> &[Option<PersistedEntry>] {
        &self.slots
    }

    /// The first `max` slots.
    pub fn head(&self, max: usize) -> &[Option<PersistedEntry>] {
        &self.slots[..max.min(self.slots.len())]
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The remembered TWS peer.
    pub fn tws_peer(&self) -> Option<&PersistedEntry> {
        self.slots[TWS_SLOT].as_ref()
    }

    /// The phones, newest first.
    pub fn phones(&self) -> impl Iterator<Item = &PersistedEntry> {
        self.slots[1..].iter().flatten()
    }

    /// Any record for `address`.
    pub fn find(&self, address: &BdAddr) -> Option<&PersistedEntry> {
        self.slots.iter().flatten().find(|e| e.address == *address)
    }

    /// Replace one half from a caller-supplied list.
    ///
    /// For the TWS half the first entry with a TWS role becomes slot 0. For
    /// the phone half the phone entries fill slots 1.. in order and leftover
    /// slots are cleared. Returns the halves written.
    pub fn set(&mut self, entries: &[PersistedEntry], half: TableHalf) -> Option<TableHalf> {
        let mut written = None;

        if half.includes_tws()
            && let Some(peer) = entries
                .iter()
                .find(|e| e.is_tws() && !e.address.is_zero())
        {
            self.slots[TWS_SLOT] = Some(*peer);
            written = merge_half(written, TableHalf::Tws);
        }

        if half.includes_phone() {
            let mut phones = entries
                .iter()
                .filter(|e| !e.is_tws() && !e.address.is_zero());
            for slot in self.slots[1..].iter_mut() {
                *slot = phones.next().copied();
            }
            written = merge_half(written, TableHalf::Phone);
        }

        written
    }

    /// Merge the live connection snapshot into the table.
    ///
    /// The snapshot's TWS peer takes slot 0, its phones take slots 1.. with
    /// the most recent link first, and previously remembered phones are
    /// appended behind them while room remains. Returns the halves whose
    /// content changed. When the local device is a TWS slave the phone half
    /// is left untouched.
    pub fn merge_snapshot(
        &mut self,
        snapshot: &[PersistedEntry],
        local_role: Role,
    ) -> Option<TableHalf> {
        if snapshot.is_empty() {
            return None;
        }

        let capacity = self.slots.len();
        let mut merged: Vec<Option<PersistedEntry>> = vec![None; capacity];

        merged[TWS_SLOT] = snapshot
            .iter()
            .find(|e| e.is_tws())
            .copied()
            .or(self.slots[TWS_SLOT]);

        let mut phone_count = 0;
        for entry in snapshot.iter().rev().filter(|e| !e.is_tws()) {
            if phone_count + 1 >= capacity {
                break;
            }
            phone_count += 1;
            merged[phone_count] = Some(*entry);
        }

        for old in self.slots[1..].iter().flatten() {
            let existing = merged[1..=phone_count]
                .iter_mut()
                .flatten()
                .find(|e| e.address == old.address);
            match existing {
                Some(entry) => entry.absorb(old),
                None if phone_count + 1 < capacity => {
                    phone_count += 1;
                    merged[phone_count] = Some(*old);
                }
                None => {}
            }
        }

        let mut changed = None;
        for (index, (new, old)) in merged.iter().zip(&self.slots).enumerate() {
            if new != old {
                changed = merge_half(changed, half_of_slot(index));
            }
        }

        if local_role == Role::Slave {
            changed = match changed {
                Some(TableHalf::Phone) | None => None,
                Some(_) => Some(TableHalf::Tws),
            };
        }

        if let Some(half) = changed {
            if half.includes_tws() {
                self.slots[TWS_SLOT] = merged[TWS_SLOT];
            }
            if half.includes_phone() {
                self.slots[1..].copy_from_slice(&merged[1..]);
            }
        }
        changed
    }

    /// Clear every record of `class`. Returns the halves touched.
    pub fn clear(&mut self, class: DeviceClass) -> Option<TableHalf> {
        let mut touched = None;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some_and(|e| class.matches(e.role)) {
                *slot = None;
                touched = merge_half(touched, half_of_slot(index));
            }
        }
        touched
    }

    /// Remove one phone. Returns whether it was present.
    pub fn clear_device(&mut self, address: &BdAddr) -> bool {
        self.remove_phone_where(|e| e.address == *address)
    }

    /// Replace the phone half with a list synced from a remote peer.
    pub fn sync_remote_paired_list(&mut self, entries: &[PersistedEntry]) -> TableHalf {
        for slot in self.slots[1..].iter_mut() {
            *slot = None;
        }
        let mut phones = entries
            .iter()
            .filter(|e| !e.is_tws() && !e.address.is_zero());
        for slot in self.slots[1..].iter_mut() {
            match phones.next() {
                Some(entry) => *slot = Some(*entry),
                None => break,
            }
        }
        TableHalf::Phone
    }

    /// Refresh the active-audio flag of every phone.
    ///
    /// Returns whether any flag changed.
    pub fn update_active(&mut self, is_active: impl Fn(&BdAddr) -> bool) -> bool {
        let mut changed = false;
        for entry in self.slots[1..].iter_mut().flatten() {
            let active = is_active(&entry.address);
            if entry.active != active {
                entry.active = active;
                changed = true;
            }
        }
        changed
    }

    /// Drop a phone whose only remembered profile is HID.
    pub fn hid_unplug(&mut self, address: &BdAddr) -> bool {
        self.remove_phone_where(|e| {
            e.address == *address && e.hid && !e.a2dp && !e.avrcp && !e.hfp
        })
    }

    fn remove_phone_where(&mut self, pred: impl Fn(&PersistedEntry) -> bool) -> bool {
        let Some(index) = self.slots[1..]
            .iter()
            .position(|s| s.as_ref().is_some_and(&pred))
        else {
            return false;
        };

        // keep phones packed at the front
        self.slots.remove(index + 1);
        self.slots.push(None);
        true
    }
}
