use crate::RegAddr;

/// A register transaction that did not complete on the bus.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("short write at {addr}: {actual} of {expected} bytes")]
    ShortWrite {
        addr: RegAddr,
        expected: usize,
        actual: usize,
    },

    #[error("short read at {addr}: {actual} of {expected} bytes")]
    ShortRead {
        addr: RegAddr,
        expected: usize,
        actual: usize,
    },

    #[error("bus transfer at {addr} failed")]
    Bus {
        addr: RegAddr,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn addr(&self) -> RegAddr {
        match self {
            Error::ShortWrite { addr, .. } => *addr,
            Error::ShortRead { addr, .. } => *addr,
            Error::Bus { addr, .. } => *addr,
        }
    }
}

/// Rejected [`crate::Session::with_max_frame`] limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame of {0} bytes cannot carry a single word")]
pub struct FrameTooSmall(pub usize);

pub type Result<T, E = Error> = std::result::Result<T, E>;
