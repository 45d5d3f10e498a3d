//! Core value types for Bluetooth links and reconnect bookkeeping.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;

/// A six octet Bluetooth device address.
///
/// Octets are stored in display order, so `octets()[0]` is the most
/// significant octet and is printed first.
///
/// ```
/// use budlink_types::BdAddr;
///
/// let addr: BdAddr = "AA:BB:CC:DD:EE:FF".parse().unwrap();
/// assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(addr.octets()[0], 0xAA);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    /// The all-zero address.
    pub const ZERO: BdAddr = BdAddr([0; 6]);

    /// Create an address from its octets in display order.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The address octets in display order.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the upper three octets match those of `other`.
    ///
    /// Used for anonymous TWS pairing, where only the vendor half of the
    /// peer address is known before the link comes up.
    pub fn upper_half_matches(&self, other: &BdAddr) -> bool {
        self.0[..3] == other.0[..3]
    }

    /// Whether this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for BdAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for BdAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseError::InvalidAddress(s.to_string()));
        }

        Ok(Self(octets))
    }
}

#[cfg(feature = "serde")]
impl Serialize for BdAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for BdAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Opaque handle of an established base link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnHandle(pub u16);

/// TWS role of a device (or of the local device).
///
/// `None` means an ordinary phone link, or a local device that is not
/// part of a TWS pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Role {
    /// Not a TWS participant.
    #[default]
    None,
    /// TWS master.
    Master,
    /// TWS slave.
    Slave,
}

impl Role {
    /// Whether this role belongs to a TWS participant.
    pub fn is_tws(&self) -> bool {
        !matches!(self, Role::None)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::None => write!(f, "none"),
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "phone" => Ok(Role::None),
            "master" => Ok(Role::Master),
            "slave" => Ok(Role::Slave),
            _ => Err(ParseError::UnknownRole(s.to_string())),
        }
    }
}

/// Bluetooth application profiles layered on a base link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum Profile {
    /// Hands-free calling.
    Hfp = 0,
    /// Audio streaming.
    A2dp = 1,
    /// Remote control.
    Avrcp = 2,
    /// Human interface device.
    Hid = 3,
    /// Serial port. Tracked for "any profile up" checks, never reconnected.
    Spp = 4,
}

impl Profile {
    /// Profiles a reconnect campaign may dial, in round-robin order.
    pub const RECONNECTABLE: [Profile; 4] =
        [Profile::Hfp, Profile::A2dp, Profile::Avrcp, Profile::Hid];

    /// Every known profile.
    pub const ALL: [Profile; 5] = [
        Profile::Hfp,
        Profile::A2dp,
        Profile::Avrcp,
        Profile::Hid,
        Profile::Spp,
    ];

    /// The profile following this one in the reconnect rotation.
    ///
    /// ```
    /// use budlink_types::Profile;
    ///
    /// assert_eq!(Profile::Hfp.next_in_rotation(), Profile::A2dp);
    /// assert_eq!(Profile::Hid.next_in_rotation(), Profile::Hfp);
    /// ```
    pub fn next_in_rotation(self) -> Profile {
        match self {
            Profile::Hfp => Profile::A2dp,
            Profile::A2dp => Profile::Avrcp,
            Profile::Avrcp => Profile::Hid,
            Profile::Hid | Profile::Spp => Profile::Hfp,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Hfp => write!(f, "HFP"),
            Profile::A2dp => write!(f, "A2DP"),
            Profile::Avrcp => write!(f, "AVRCP"),
            Profile::Hid => write!(f, "HID"),
            Profile::Spp => write!(f, "SPP"),
        }
    }
}

impl FromStr for Profile {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hfp" => Ok(Profile::Hfp),
            "a2dp" => Ok(Profile::A2dp),
            "avrcp" => Ok(Profile::Avrcp),
            "hid" => Ok(Profile::Hid),
            "spp" => Ok(Profile::Spp),
            _ => Err(ParseError::UnknownProfile(s.to_string())),
        }
    }
}

/// A small set of profiles.
///
/// Serialized as a list of profile names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(from = "Vec<Profile>", into = "Vec<Profile>")
)]
pub struct ProfileSet(u8);

impl ProfileSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a profile. Returns whether it was newly inserted.
    pub fn insert(&mut self, profile: Profile) -> bool {
        let had = self.contains(profile);
        self.0 |= profile.bit();
        !had
    }

    /// Remove a profile. Returns whether it was present.
    pub fn remove(&mut self, profile: Profile) -> bool {
        let had = self.contains(profile);
        self.0 &= !profile.bit();
        had
    }

    pub fn contains(&self, profile: Profile) -> bool {
        self.0 & profile.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Union of two sets.
    pub fn union(self, other: ProfileSet) -> ProfileSet {
        Self(self.0 | other.0)
    }

    /// Iterate the members in profile order.
    pub fn iter(&self) -> impl Iterator<Item = Profile> + '_ {
        Profile::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl FromIterator<Profile> for ProfileSet {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        let mut set = ProfileSet::empty();
        for profile in iter {
            set.insert(profile);
        }
        set
    }
}

impl From<Vec<Profile>> for ProfileSet {
    fn from(profiles: Vec<Profile>) -> Self {
        profiles.into_iter().collect()
    }
}

impl From<ProfileSet> for Vec<Profile> {
    fn from(set: ProfileSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|p| p.to_string()).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// HCI reason code reported with a base link disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "u8", into = "u8"))]
pub enum DisconnectReason {
    /// Link supervision timeout (0x08).
    ConnectionTimeout,
    /// Connection already exists (0x0B).
    ConnectionAlreadyExists,
    /// Remote user terminated the connection (0x13).
    RemoteUserTerminated,
    /// Remote device terminated due to low resources (0x14).
    RemoteLowResources,
    /// Remote device terminated due to power off (0x15).
    RemotePowerOff,
    /// Connection terminated by the local host (0x16).
    LocalHostTerminated,
    /// Any other HCI reason code.
    Other(u8),
}

impl DisconnectReason {
    /// Decode a raw HCI reason code.
    pub fn from_hci(code: u8) -> Self {
        match code {
            0x08 => Self::ConnectionTimeout,
            0x0B => Self::ConnectionAlreadyExists,
            0x13 => Self::RemoteUserTerminated,
            0x14 => Self::RemoteLowResources,
            0x15 => Self::RemotePowerOff,
            0x16 => Self::LocalHostTerminated,
            other => Self::Other(other),
        }
    }

    /// The raw HCI reason code.
    pub fn code(&self) -> u8 {
        match self {
            Self::ConnectionTimeout => 0x08,
            Self::ConnectionAlreadyExists => 0x0B,
            Self::RemoteUserTerminated => 0x13,
            Self::RemoteLowResources => 0x14,
            Self::RemotePowerOff => 0x15,
            Self::LocalHostTerminated => 0x16,
            Self::Other(code) => *code,
        }
    }

    /// Whether this is an orderly disconnect that signals the remote side
    /// does not want the link, as opposed to a radio failure.
    ///
    /// ```
    /// use budlink_types::DisconnectReason;
    ///
    /// assert!(DisconnectReason::RemotePowerOff.is_uninteresting());
    /// assert!(!DisconnectReason::ConnectionTimeout.is_uninteresting());
    /// ```
    pub fn is_uninteresting(&self) -> bool {
        matches!(
            self,
            Self::RemoteUserTerminated
                | Self::RemoteLowResources
                | Self::RemotePowerOff
                | Self::ConnectionAlreadyExists
                | Self::LocalHostTerminated
        )
    }
}

impl From<u8> for DisconnectReason {
    fn from(code: u8) -> Self {
        Self::from_hci(code)
    }
}

impl From<DisconnectReason> for u8 {
    fn from(reason: DisconnectReason) -> Self {
        reason.code()
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectionTimeout => "connection timeout",
            Self::ConnectionAlreadyExists => "connection already exists",
            Self::RemoteUserTerminated => "remote user terminated",
            Self::RemoteLowResources => "remote low resources",
            Self::RemotePowerOff => "remote power off",
            Self::LocalHostTerminated => "local host terminated",
            Self::Other(_) => "other",
        };
        write!(f, "{} (0x{:02X})", label, self.code())
    }
}

/// Device class filter used by counting, stop and clear operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceClass {
    /// Devices with no TWS role.
    Phone,
    /// The TWS peer.
    Tws,
    /// Everything.
    All,
}

impl DeviceClass {
    /// Whether a device with `role` belongs to this class.
    pub fn matches(&self, role: Role) -> bool {
        match self {
            DeviceClass::Phone => !role.is_tws(),
            DeviceClass::Tws => role.is_tws(),
            DeviceClass::All => true,
        }
    }
}

/// Which half of the persisted reconnect table an update touches.
///
/// Slot 0 holds the TWS peer and the remaining slots hold phones; the two
/// halves are saved independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TableHalf {
    /// Slot 0 only.
    Tws,
    /// Slots 1.. only.
    Phone,
    /// Both halves.
    Both,
}

impl TableHalf {
    /// The half holding entries of the given role.
    pub fn for_role(role: Role) -> Self {
        if role.is_tws() {
            TableHalf::Tws
        } else {
            TableHalf::Phone
        }
    }

    /// Combine two halves.
    pub fn union(self, other: TableHalf) -> TableHalf {
        if self == other { self } else { TableHalf::Both }
    }

    pub fn includes_tws(&self) -> bool {
        matches!(self, TableHalf::Tws | TableHalf::Both)
    }

    pub fn includes_phone(&self) -> bool {
        matches!(self, TableHalf::Phone | TableHalf::Both)
    }
}

/// One persisted reconnect record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PersistedEntry {
    /// Device address.
    pub address: BdAddr,
    /// TWS role of the device, `None` for phones.
    #[cfg_attr(feature = "serde", serde(default))]
    pub role: Role,
    #[cfg_attr(feature = "serde", serde(default))]
    pub a2dp: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub avrcp: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub hfp: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub hid: bool,
    /// Dial HFP before A2DP when reconnecting.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hfp_first: bool,
    /// The device was the active audio source.
    #[cfg_attr(feature = "serde", serde(default))]
    pub active: bool,
}

impl PersistedEntry {
    /// Create an entry with no profile flags set.
    pub fn new(address: BdAddr, role: Role) -> Self {
        Self {
            address,
            role,
            ..Default::default()
        }
    }

    /// Set the recorded profiles from a set.
    pub fn with_profiles(mut self, profiles: ProfileSet) -> Self {
        self.a2dp = profiles.contains(Profile::A2dp);
        self.avrcp = profiles.contains(Profile::Avrcp);
        self.hfp = profiles.contains(Profile::Hfp);
        self.hid = profiles.contains(Profile::Hid);
        self
    }

    /// The recorded profiles as a set.
    pub fn profiles(&self) -> ProfileSet {
        let mut set = ProfileSet::empty();
        if self.a2dp {
            set.insert(Profile::A2dp);
        }
        if self.avrcp {
            set.insert(Profile::Avrcp);
        }
        if self.hfp {
            set.insert(Profile::Hfp);
        }
        if self.hid {
            set.insert(Profile::Hid);
        }
        set
    }

    pub fn is_tws(&self) -> bool {
        self.role.is_tws()
    }

    /// Merge the profile and active flags of `other` into this entry.
    pub fn absorb(&mut self, other: &PersistedEntry) {
        self.a2dp |= other.a2dp;
        self.avrcp |= other.avrcp;
        self.hfp |= other.hfp;
        self.hid |= other.hid;
        self.active |= other.active;
    }
}
