//! SQLite persistence of the budlink reconnect table.
//!
//! The reconnect table is a handful of slots: slot 0 remembers the TWS
//! peer and the remaining slots remember phones, most recent first. The
//! orchestrator saves the two halves independently, so a save of one half
//! never rewrites the other.
//!
//! # Example
//!
//! ```
//! use budlink_store::Store;
//! use budlink_types::{BdAddr, PersistedEntry, Role, TableHalf};
//!
//! let store = Store::open_in_memory()?;
//! let phone = PersistedEntry::new(BdAddr::new([0, 1, 2, 3, 4, 5]), Role::None);
//! store.save_reconnect_table(&[None, Some(phone)], TableHalf::Phone)?;
//!
//! let slots = store.load_reconnect_table(3)?;
//! assert_eq!(slots, vec![None, Some(phone), None]);
//! # Ok::<(), budlink_store::Error>(())
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/budlink/reconnect.db`
/// - macOS: `~/Library/Application Support/budlink/reconnect.db`
/// - Windows: `C:\Users\<user>\AppData\Local\budlink\reconnect.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("budlink")
        .join("reconnect.db")
}
