use dvbfw_io::RegAddr;
use tracing::warn;

use crate::registers::DemodMode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] dvbfw_io::Error),

    #[error("demod busy: {addr} not ready after {polls} polls")]
    Timeout { addr: RegAddr, polls: u32 },

    #[error("invalid firmware: {0}")]
    InvalidFirmware(#[from] FirmwareError),

    #[error("no device: {0}")]
    NoDevice(NoDeviceReason),

    #[error("cannot allocate {words} words for patch image")]
    OutOfMemory { words: usize },

    #[error("patch variable {index} out of bounds")]
    OutOfBounds { index: u32 },

    #[error("demod did not enter {wanted} mode (active mode register reads {actual})")]
    ModeNotEntered { wanted: DemodMode, actual: u32 },

    #[error("DiSEqC message of {len} bytes exceeds the {max}-byte FIFO")]
    DiseqcTooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirmwareError {
    #[error("bad magic in header word {0:08X}")]
    BadMagic(u32),

    #[error("unsupported patch version {0}")]
    UnsupportedVersion(u8),

    #[error("{len} bytes is too short for a patch header")]
    TooShort { len: usize },

    #[error("word {idx} is past the end of the {len}-word image")]
    Truncated { idx: usize, len: usize },

    #[error("instruction at word {idx} declares zero length")]
    EmptyInstruction { idx: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoDeviceReason {
    #[error("unknown patch opcode {opcode} at word {idx}")]
    UnknownOpcode { opcode: u32, idx: usize },

    #[error("DMA engine not ready after {polls} polls")]
    DmaNotReady { polls: u32 },
}

impl From<NoDeviceReason> for Error {
    fn from(value: NoDeviceReason) -> Self {
        Error::NoDevice(value)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Remembers the first failure of a register sequence without stopping it.
///
/// Firmware provisioning keeps issuing transactions after one fails, and the
/// failure is only reported once the whole sequence has been sent. Boards with
/// marginal I2C links depend on this: a single glitched transfer must not stop
/// the remaining writes from landing. Do not replace with early returns.
#[derive(Debug, Default)]
pub struct Sticky {
    first: Option<Error>,
    failures: usize,
}

impl Sticky {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one call, handing back its value on success.
    pub fn record<T, E: Into<Error>>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let e = e.into();
                warn!(error = %e, "continuing after failure");
                self.failures += 1;
                self.first.get_or_insert(e);
                None
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn first(&self) -> Option<&Error> {
        self.first.as_ref()
    }

    /// The first recorded failure, if any.
    pub fn finish(self) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_keeps_first_error_and_counts_the_rest() {
        let mut sticky = Sticky::new();
        assert_eq!(sticky.record(Ok::<_, Error>(3)), Some(3));
        assert!(sticky.is_ok());

        let first = Error::Timeout {
            addr: RegAddr::new(0x200),
            polls: 10,
        };
        assert_eq!(sticky.record(Err::<u32, _>(first)), None);
        assert_eq!(sticky.record(Err::<(), _>(FirmwareError::BadMagic(0))), None);
        assert_eq!(sticky.record(Ok::<_, Error>(())), Some(()));

        assert!(!sticky.is_ok());
        assert_eq!(sticky.failures(), 2);
        assert!(matches!(
            sticky.finish(),
            Err(Error::Timeout { polls: 10, .. })
        ));
    }

    #[test]
    fn empty_sticky_is_ok() {
        assert!(Sticky::new().finish().is_ok());
    }
}
