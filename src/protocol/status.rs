//! Status codes reported by the device.
//!
//! Values follow the XBee API protocol tables.

/// Status byte of a local or remote AT command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Command accepted.
    Ok,
    /// Generic command failure.
    Error,
    /// Command name not recognized.
    InvalidCommand,
    /// Parameter out of range or malformed.
    InvalidParameter,
    /// Remote command never reached the target.
    TransmissionFailure,
    /// Unlisted status code.
    Other(u8),
}

impl CommandStatus {
    /// Parses a command status from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            0x02 => Self::InvalidCommand,
            0x03 => Self::InvalidParameter,
            0x04 => Self::TransmissionFailure,
            other => Self::Other(other),
        }
    }

    /// Returns true if the device accepted the command.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Error => write!(f, "error"),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::TransmissionFailure => write!(f, "remote command transmission failed"),
            Self::Other(code) => write!(f, "command status 0x{code:02x}"),
        }
    }
}

/// Delivery status of a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Payload delivered.
    Success,
    /// No MAC-level acknowledgment.
    MacAckFailure,
    /// Channel access failure.
    CaFailure,
    /// No network-level acknowledgment.
    NetworkAckFailure,
    /// Local device is not joined to a network.
    NotJoined,
    /// Destination is the local device itself.
    SelfAddressed,
    /// Destination address not found.
    AddressNotFound,
    /// No route to the destination.
    RouteNotFound,
    /// Payload exceeded what the network can carry.
    PayloadTooLarge,
    /// Unlisted status code.
    Other(u8),
}

impl DeliveryStatus {
    /// Parses a delivery status from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Success,
            0x01 => Self::MacAckFailure,
            0x02 => Self::CaFailure,
            0x21 => Self::NetworkAckFailure,
            0x22 => Self::NotJoined,
            0x23 => Self::SelfAddressed,
            0x24 => Self::AddressNotFound,
            0x25 => Self::RouteNotFound,
            0x74 => Self::PayloadTooLarge,
            other => Self::Other(other),
        }
    }

    /// Returns true if the payload was delivered.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::MacAckFailure => write!(f, "MAC ACK failure"),
            Self::CaFailure => write!(f, "CA failure"),
            Self::NetworkAckFailure => write!(f, "network ACK failure"),
            Self::NotJoined => write!(f, "not joined to network"),
            Self::SelfAddressed => write!(f, "self-addressed"),
            Self::AddressNotFound => write!(f, "address not found"),
            Self::RouteNotFound => write!(f, "route not found"),
            Self::PayloadTooLarge => write!(f, "data payload too large"),
            Self::Other(code) => write!(f, "delivery status 0x{code:02x}"),
        }
    }
}

/// Modem status codes delivered asynchronously by the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModemStatusCode {
    /// Device came up from a hardware reset.
    HardwareReset = 0x00,
    /// Device came up from a watchdog reset.
    WatchdogReset = 0x01,
    /// Device joined a network.
    JoinedNetwork = 0x02,
    /// Device left (or was removed from) its network.
    Disassociated = 0x03,
    /// Local device started acting as coordinator.
    CoordinatorStarted = 0x06,
}

impl ModemStatusCode {
    /// Attempts to parse a modem status from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::HardwareReset),
            0x01 => Some(Self::WatchdogReset),
            0x02 => Some(Self::JoinedNetwork),
            0x03 => Some(Self::Disassociated),
            0x06 => Some(Self::CoordinatorStarted),
            _ => None,
        }
    }
}

/// Role a remote device plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceRole {
    /// Network coordinator.
    Coordinator,
    /// Routing node.
    Router,
    /// Sleepy end device.
    EndDevice,
    /// Role not reported yet.
    #[default]
    Unknown,
}

impl DeviceRole {
    /// Parses a device role from its wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Coordinator,
            0x01 => Self::Router,
            0x02 => Self::EndDevice,
            _ => Self::Unknown,
        }
    }
}
