//! Protocol definitions for the session layer.
//!
//! This module contains:
//! - Addressing newtypes
//! - The typed frame model and correlation tags
//! - Status code enums
//! - The [`FrameCodec`] / [`FrameDecoder`] collaborator traits

pub mod address;
pub mod frame;
pub mod status;

pub use address::{HARDWARE_ADDRESS_LEN, HardwareAddress, NetworkAddress};
pub use frame::{
    AtCommandName, CodecError, CommandSpec, CorrelationTag, Frame, FrameCodec, FrameDecoder,
    FrameKind, IoSample, NodeContact,
};
pub use status::{CommandStatus, DeliveryStatus, DeviceRole, ModemStatusCode};
