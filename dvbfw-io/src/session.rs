use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::trace;

use crate::{
    Error, FrameTooSmall, RegAddr, Result, ShortHex, Transport, Width, WriteMode,
    units::{Bytes, Words32},
};

/// Largest frame the host bus accepts in one message, address included.
pub const DEFAULT_MAX_FRAME: usize = 64;

const ADDR_LEN: usize = 3;

/// Register-level access to one demodulator.
///
/// Every frame starts with the 24-bit register address, most significant
/// byte first, followed by the value bytes, also most significant first.
/// Reads are two-phase: an address-only write, then a bus read. Nothing is
/// cached; every call is a round trip.
pub struct Session<T> {
    transport: T,
    max_frame: usize,
    notify: Option<Arc<AtomicUsize>>,
    buf: Vec<u8>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_frame: DEFAULT_MAX_FRAME,
            notify: None,
            buf: Vec::with_capacity(DEFAULT_MAX_FRAME),
        }
    }

    /// Limit frames to `max_frame` bytes. Must leave room for at least one
    /// 32-bit word after the address.
    pub fn with_max_frame(mut self, max_frame: usize) -> Result<Self, FrameTooSmall> {
        if max_frame < ADDR_LEN + 4 {
            return Err(FrameTooSmall(max_frame));
        }
        self.max_frame = max_frame;
        Ok(self)
    }

    pub fn max_frame(&self) -> Bytes<usize> {
        Bytes(self.max_frame)
    }

    /// Words carried by one burst frame.
    pub fn words_per_frame(&self) -> Words32<usize> {
        Words32((self.max_frame - ADDR_LEN) / 4)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Run `f`, adding the size of every frame written to `notify`.
    pub fn with_notifications<R>(
        &mut self,
        notify: Arc<AtomicUsize>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let old_notify = self.notify.replace(notify);
        let r = f(self);
        self.notify = old_notify;
        r
    }

    pub fn delay(&mut self, dur: Duration) {
        self.transport.delay(dur)
    }

    fn send(&mut self, addr: RegAddr, mode: WriteMode) -> Result<()> {
        let Self {
            transport,
            notify,
            buf,
            ..
        } = self;
        trace!(%addr, %mode, data = %ShortHex(&buf[ADDR_LEN..]), "write");
        let actual = transport
            .write(buf, mode)
            .map_err(|source| Error::Bus { addr, source })?;
        if let Some(notify) = notify {
            notify.fetch_add(actual, Ordering::Relaxed);
        }
        if actual != buf.len() {
            return Err(Error::ShortWrite {
                addr,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    fn start_frame(&mut self, addr: RegAddr) {
        self.buf.clear();
        self.buf.extend_from_slice(&addr.to_be_bytes());
    }

    pub fn write_register(&mut self, addr: RegAddr, value: u32, width: Width) -> Result<()> {
        self.start_frame(addr);
        width.encode(value, &mut self.buf);
        self.send(addr, WriteMode::Terminal)
    }

    pub fn read_register(&mut self, addr: RegAddr, width: Width) -> Result<u32> {
        self.start_frame(addr);
        self.send(addr, WriteMode::Terminal)?;

        let mut out = [0u8; 4];
        let out = &mut out[..width.len()];
        let actual = self
            .transport
            .read(out)
            .map_err(|source| Error::Bus { addr, source })?;
        if actual != out.len() {
            return Err(Error::ShortRead {
                addr,
                expected: out.len(),
                actual,
            });
        }
        let value = width.decode(out);
        trace!(%addr, %width, value, "read");
        Ok(value)
    }

    pub fn write_u8(&mut self, addr: RegAddr, value: u8) -> Result<()> {
        self.write_register(addr, value.into(), Width::U8)
    }

    pub fn write_u16(&mut self, addr: RegAddr, value: u16) -> Result<()> {
        self.write_register(addr, value.into(), Width::U16)
    }

    pub fn write_u32(&mut self, addr: RegAddr, value: u32) -> Result<()> {
        self.write_register(addr, value, Width::U32)
    }

    pub fn read_u8(&mut self, addr: RegAddr) -> Result<u8> {
        self.read_register(addr, Width::U8).map(|v| v as u8)
    }

    pub fn read_u16(&mut self, addr: RegAddr) -> Result<u16> {
        self.read_register(addr, Width::U16).map(|v| v as u16)
    }

    pub fn read_u32(&mut self, addr: RegAddr) -> Result<u32> {
        self.read_register(addr, Width::U32)
    }

    /// Burst-write consecutive 32-bit words starting at `addr`.
    ///
    /// The payload is split into frames of [`Self::words_per_frame`] words,
    /// each with its own address header. All frames but the last go out with
    /// [`WriteMode::Continue`]. The first failing frame aborts the burst.
    pub fn write_words(&mut self, addr: RegAddr, words: &[u32]) -> Result<()> {
        let Words32(per_frame) = self.words_per_frame();
        let mut addr = addr;
        let mut chunks = words.chunks(per_frame).peekable();
        while let Some(chunk) = chunks.next() {
            self.start_frame(addr);
            for word in chunk {
                self.buf.extend_from_slice(&word.to_be_bytes());
            }
            let mode = match chunks.peek() {
                Some(_) => WriteMode::Continue,
                None => WriteMode::Terminal,
            };
            self.send(addr, mode)?;
            addr = addr.offset(Bytes::from(Words32(chunk.len())).0 as u32);
        }
        Ok(())
    }
}
