//! Firmware provisioning and control for the Availink AVL6882 DVB
//! demodulator.

pub mod boot;
pub mod config;
mod error;
pub mod frontend;
pub mod patch;
pub mod protocol;
pub mod registers;
pub mod sec;
pub mod sim;

pub use crate::{
    boot::{DeliverySystem, Family, Loader, PatchSet, PatchVersion, load_firmware},
    config::{BootConfig, PollConfig},
    error::{Error, FirmwareError, NoDeviceReason, Result, Sticky},
    frontend::Demod,
    patch::PatchImage,
    sec::MiniCmd,
};
