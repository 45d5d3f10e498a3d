//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, params};
use time::OffsetDateTime;
use tracing::{debug, info};

use budlink_types::{BdAddr, PersistedEntry, Role, TableHalf};

use crate::error::{Error, Result};
use crate::schema;

/// SQLite-based store for the reconnect table.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

/// Raw column values of one `reconnect_slots` row.
struct SlotRow {
    slot: i64,
    address: String,
    role: String,
    flags: [bool; 6],
}

impl SlotRow {
    fn into_entry(self) -> Result<(usize, PersistedEntry)> {
        let slot = usize::try_from(self.slot).map_err(|_| Error::InvalidRow {
            slot: self.slot,
            message: "negative slot".to_string(),
        })?;
        let address: BdAddr = self.address.parse()?;
        let role: Role = self.role.parse()?;

        if (slot == 0) != role.is_tws() {
            return Err(Error::InvalidRow {
                slot: self.slot,
                message: format!("role {role} does not belong in this slot"),
            });
        }

        let [a2dp, avrcp, hfp, hid, hfp_first, active] = self.flags;
        Ok((
            slot,
            PersistedEntry {
                address,
                role,
                a2dp,
                avrcp,
                hfp,
                hid,
                hfp_first,
                active,
            },
        ))
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening reconnect store at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Load the reconnect table as `capacity` slots.
    ///
    /// Rows beyond the capacity are ignored, so shrinking the table in the
    /// configuration simply forgets the oldest phones.
    pub fn load_reconnect_table(&self, capacity: usize) -> Result<Vec<Option<PersistedEntry>>> {
        let mut stmt = self.conn.prepare(
            "SELECT slot, address, role, a2dp, avrcp, hfp, hid, hfp_first, active
             FROM reconnect_slots ORDER BY slot",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SlotRow {
                    slot: row.get(0)?,
                    address: row.get(1)?,
                    role: row.get(2)?,
                    flags: [
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ],
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut slots = vec![None; capacity];
        for row in rows {
            let (slot, entry) = row.into_entry()?;
            if let Some(target) = slots.get_mut(slot) {
                *target = Some(entry);
            }
        }

        debug!(
            "Loaded {} reconnect records",
            slots.iter().flatten().count()
        );
        Ok(slots)
    }

    /// Persist one half of the reconnect table.
    ///
    /// `Tws` rewrites only slot 0, `Phone` only slots 1.., `Both` all of
    /// them. The rewrite is a single transaction.
    pub fn save_reconnect_table(
        &self,
        slots: &[Option<PersistedEntry>],
        half: TableHalf,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.unchecked_transaction()?;

        match half {
            TableHalf::Tws => tx.execute("DELETE FROM reconnect_slots WHERE slot = 0", [])?,
            TableHalf::Phone => tx.execute("DELETE FROM reconnect_slots WHERE slot >= 1", [])?,
            TableHalf::Both => tx.execute("DELETE FROM reconnect_slots", [])?,
        };

        {
            let mut insert = tx.prepare(
                "INSERT INTO reconnect_slots
                    (slot, address, role, a2dp, avrcp, hfp, hid, hfp_first, active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for (slot, entry) in slots.iter().enumerate() {
                let in_half = if slot == 0 {
                    half.includes_tws()
                } else {
                    half.includes_phone()
                };
                let Some(entry) = entry.filter(|_| in_half) else {
                    continue;
                };

                insert.execute(params![
                    slot as i64,
                    entry.address.to_string(),
                    entry.role.to_string(),
                    entry.a2dp,
                    entry.avrcp,
                    entry.hfp,
                    entry.hid,
                    entry.hfp_first,
                    entry.active,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Saved reconnect table ({half:?})");
        Ok(())
    }

    /// Forget every reconnect record.
    pub fn clear_reconnect_table(&self) -> Result<usize> {
        let count = self.conn.execute("DELETE FROM reconnect_slots", [])?;
        info!("Cleared {count} reconnect records");
        Ok(count)
    }

    /// When a slot was last written, if it holds a record.
    pub fn slot_updated_at(&self, slot: usize) -> Result<Option<OffsetDateTime>> {
        let mut stmt = self
            .conn
            .prepare("SELECT updated_at FROM reconnect_slots WHERE slot = ?")?;
        let mut rows = stmt.query([slot as i64])?;

        match rows.next()? {
            Some(row) => {
                let ts: i64 = row.get(0)?;
                let at = OffsetDateTime::from_unix_timestamp(ts).map_err(|e| Error::InvalidRow {
                    slot: slot as i64,
                    message: e.to_string(),
                })?;
                Ok(Some(at))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budlink_types::{Profile, ProfileSet};

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([0x5A, 0, 0, 0, 0, last])
    }

    fn peer() -> PersistedEntry {
        PersistedEntry::new(addr(0x0F), Role::Master)
    }

    fn phone(last: u8) -> PersistedEntry {
        let profiles: ProfileSet = [Profile::A2dp, Profile::Hfp].into_iter().collect();
        let mut entry = PersistedEntry::new(addr(last), Role::None).with_profiles(profiles);
        entry.hfp_first = true;
        entry
    }

    #[test]
    fn test_open_in_memory_is_empty() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.load_reconnect_table(3).unwrap(), vec![None; 3]);
    }

    #[test]
    fn test_save_and_load_both_halves() {
        let store = Store::open_in_memory().unwrap();
        let slots = vec![Some(peer()), Some(phone(1)), Some(phone(2))];
        store.save_reconnect_table(&slots, TableHalf::Both).unwrap();

        assert_eq!(store.load_reconnect_table(3).unwrap(), slots);
        assert!(store.slot_updated_at(1).unwrap().is_some());
        assert!(store.slot_updated_at(5).unwrap().is_none());
    }

    #[test]
    fn test_phone_save_keeps_peer() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_reconnect_table(&[Some(peer()), Some(phone(1))], TableHalf::Both)
            .unwrap();

        // the phone half is rewritten from a table whose slot 0 is stale
        store
            .save_reconnect_table(&[None, Some(phone(2)), None], TableHalf::Phone)
            .unwrap();

        let slots = store.load_reconnect_table(3).unwrap();
        assert_eq!(slots, vec![Some(peer()), Some(phone(2)), None]);
    }

    #[test]
    fn test_tws_save_keeps_phones() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_reconnect_table(&[Some(peer()), Some(phone(1))], TableHalf::Both)
            .unwrap();
        store
            .save_reconnect_table(&[None, None], TableHalf::Tws)
            .unwrap();

        let slots = store.load_reconnect_table(2).unwrap();
        assert_eq!(slots, vec![None, Some(phone(1))]);
    }

    #[test]
    fn test_load_truncates_to_capacity() {
        let store = Store::open_in_memory().unwrap();
        let slots = vec![Some(peer()), Some(phone(1)), Some(phone(2))];
        store.save_reconnect_table(&slots, TableHalf::Both).unwrap();

        assert_eq!(
            store.load_reconnect_table(2).unwrap(),
            vec![Some(peer()), Some(phone(1))]
        );
    }

    #[test]
    fn test_clear() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_reconnect_table(&[Some(peer()), Some(phone(1))], TableHalf::Both)
            .unwrap();
        assert_eq!(store.clear_reconnect_table().unwrap(), 2);
        assert_eq!(store.load_reconnect_table(2).unwrap(), vec![None, None]);
    }

    #[test]
    fn test_invalid_rows_are_reported() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO reconnect_slots (slot, address, role, updated_at)
                 VALUES (1, 'not-an-address', 'none', 0)",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.load_reconnect_table(3),
            Err(Error::Parse(_))
        ));

        store.clear_reconnect_table().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO reconnect_slots (slot, address, role, updated_at)
                 VALUES (1, '00:11:22:33:44:55', 'master', 0)",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.load_reconnect_table(3),
            Err(Error::InvalidRow { slot: 1, .. })
        ));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reconnect.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .save_reconnect_table(&[Some(peer())], TableHalf::Tws)
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.load_reconnect_table(1).unwrap(), vec![Some(peer())]);
    }
}
