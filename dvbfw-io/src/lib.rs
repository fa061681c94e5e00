mod error;
pub mod fake;
mod session;
mod transport;
pub mod units;
mod utils;

pub use crate::{
    error::{Error, FrameTooSmall, Result},
    session::{DEFAULT_MAX_FRAME, Session},
    transport::{Transport, WriteMode},
    units::{RegAddr, Width},
    utils::{Hex, ShortHex},
};
