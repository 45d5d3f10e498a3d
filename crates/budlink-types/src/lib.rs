//! Platform-agnostic Bluetooth link types for budlink.
//!
//! This crate provides the value types shared by the reconnect orchestrator
//! (budlink-core), its persistence layer (budlink-store) and the service
//! daemon (budlink-service).
//!
//! # Features
//!
//! - Device addresses with colon-separated text form
//! - TWS roles, profiles and profile sets
//! - HCI disconnect reasons with "uninteresting" classification
//! - Persisted reconnect records and table halves
//!
//! # Example
//!
//! ```
//! use budlink_types::{BdAddr, Profile, ProfileSet};
//!
//! let addr: BdAddr = "00:11:22:33:44:55".parse().unwrap();
//! let wanted: ProfileSet = [Profile::A2dp, Profile::Hfp].into_iter().collect();
//! assert!(wanted.contains(Profile::Hfp));
//! assert_eq!(addr.octets()[5], 0x55);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    BdAddr, ConnHandle, DeviceClass, DisconnectReason, PersistedEntry, Profile, ProfileSet, Role,
    TableHalf,
};


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any address survives display and parse.
        #[test]
        fn address_display_parse_roundtrip(octets: [u8; 6]) {
            let addr = BdAddr::new(octets);
            let parsed: BdAddr = addr.to_string().parse().unwrap();
            prop_assert_eq!(parsed, addr);
        }

        /// Parsing arbitrary strings never panics.
        #[test]
        fn parse_address_never_panics(s: String) {
            let _ = s.parse::<BdAddr>();
        }
    }
}
