//! Outbound host commands.
//!
//! Every side effect the orchestrator asks of the Bluetooth host is
//! expressible as a [`HostCommand`]. The mock host records them and the
//! service bridge forwards them to the controller process.

use serde::{Deserialize, Serialize};

use budlink_types::{BdAddr, Profile, Role};

/// How the TWS pair search should recognise its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum PairMatch {
    /// Only the remembered peer address.
    Address { address: BdAddr },
    /// Any TWS peer, without a keyword.
    AnyPeer,
    /// Any peer advertising the vendor auto-pair keyword.
    AutoPairKeyword,
}

/// A command for the Bluetooth host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
#[non_exhaustive]
pub enum HostCommand {
    /// Page a device.
    Connect { address: BdAddr, page_timeout_ms: u64 },
    /// Drop the base link of a device.
    Disconnect { address: BdAddr },
    /// Open one profile on an existing link.
    ConnectProfile { address: BdAddr, profile: Profile },
    /// Abort an in-flight page.
    CancelConnect { address: BdAddr },
    /// Begin a TWS pair search.
    StartPairSearch { tries: u8 },
    /// End the TWS pair search.
    EndPairSearch,
    /// Abort an in-flight TWS auto connect.
    CancelTwsConnect,
    /// Configure how the pair search recognises the peer.
    SetPairMatch { mode: PairMatch },
    /// Tell the TWS layer which role the peer should take.
    SetExpectRole { role: Role },
    /// Drop the TWS peer link. `None` means whichever peer is connected.
    DisconnectTwsPeer { address: Option<BdAddr> },
}

impl HostCommand {
    /// The device this command targets, if any.
    pub fn address(&self) -> Option<BdAddr> {
        match self {
            HostCommand::Connect { address, .. }
            | HostCommand::Disconnect { address }
            | HostCommand::ConnectProfile { address, .. }
            | HostCommand::CancelConnect { address } => Some(*address),
            HostCommand::SetPairMatch {
                mode: PairMatch::Address { address },
            } => Some(*address),
            HostCommand::DisconnectTwsPeer { address } => *address,
            _ => None,
        }
    }
}
