use std::{io, time::Duration};

/// How a write frame ends on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum WriteMode {
    /// Last (or only) frame of a transfer.
    Terminal,
    /// More frames of the same burst follow.
    Continue,
}

/// A bus that carries demodulator register frames, usually I2C.
///
/// Implementations return how many bytes actually moved. Anything short of
/// the requested length is a failed transfer to the [`crate::Session`]; there
/// are no retries at this layer.
pub trait Transport {
    fn write(&mut self, frame: &[u8], mode: WriteMode) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Block the calling thread. Fakes override this so polling loops run
    /// instantly.
    fn delay(&mut self, dur: Duration) {
        std::thread::sleep(dur)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, frame: &[u8], mode: WriteMode) -> io::Result<usize> {
        T::write(&mut *self, frame, mode)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        T::read(&mut *self, buf)
    }

    fn delay(&mut self, dur: Duration) {
        T::delay(&mut *self, dur)
    }
}
