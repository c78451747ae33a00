//! Addressing types for remote devices.

/// Length of a hardware address in bytes.
pub const HARDWARE_ADDRESS_LEN: usize = 8;

/// A 64-bit hardware address, globally unique per physical device.
///
/// This is the immutable identity of a remote peer and the key of the
/// node registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddress(u64);

impl HardwareAddress {
    /// The broadcast address understood by every device on the network.
    pub const BROADCAST: Self = Self(0x0000_0000_0000_FFFF);

    /// Creates an address from its raw 64-bit value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates an address from 8 big-endian bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; HARDWARE_ADDRESS_LEN]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Returns the address as 8 big-endian bytes, as carried on the wire.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; HARDWARE_ADDRESS_LEN] {
        self.0.to_be_bytes()
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address as a lowercase hex string.
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parses an address from a 16-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 8 bytes long.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let raw: [u8; HARDWARE_ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self::from_bytes(raw))
    }
}

impl std::fmt::Debug for HardwareAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HardwareAddress({})", self.to_hex())
    }
}

impl std::fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u64> for HardwareAddress {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A 16-bit network address.
///
/// Assigned by the network and may change across reconnects; a cache only,
/// never an identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkAddress(u16);

impl NetworkAddress {
    /// The "address unknown" sentinel; devices resolve it themselves.
    pub const UNKNOWN: Self = Self(0xFFFE);

    /// Creates an address from its raw 16-bit value.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the address as 2 big-endian bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Returns the raw 16-bit value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl Default for NetworkAddress {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl std::fmt::Debug for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetworkAddress({:04x})", self.0)
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}
