//! An in-memory bus for tests and dry runs.
//!
//! [`FakeBus`] decodes register frames the same way the demodulator's I2C
//! slave does and hands the resulting accesses to a [`Peripheral`]. Every
//! frame is kept in a log so tests can assert on exact bus traffic.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    io,
    time::Duration,
};

use tracing::trace;

use crate::{RegAddr, Transport, WriteMode};

/// The device side of a [`FakeBus`].
pub trait Peripheral {
    /// Store `data` starting at `addr`.
    fn write(&mut self, addr: RegAddr, data: &[u8]);

    /// Fill `buf` from `addr`.
    fn read(&mut self, addr: RegAddr, buf: &mut [u8]);
}

/// Sparse byte-addressed register space. Unwritten bytes read as zero.
#[derive(Clone, Debug, Default)]
pub struct Memory(HashMap<u32, u8>);

impl Memory {
    pub fn bytes(&self, addr: RegAddr, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.0.get(&addr.offset(i).get()).copied().unwrap_or(0))
            .collect()
    }

    pub fn set_bytes(&mut self, addr: RegAddr, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.0.insert(addr.offset(i as u32).get(), *b);
        }
    }

    pub fn read_u16(&self, addr: RegAddr) -> u16 {
        let bytes = self.bytes(addr, 2);
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    pub fn read_u32(&self, addr: RegAddr) -> u32 {
        let bytes = self.bytes(addr, 4);
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn write_u16(&mut self, addr: RegAddr, value: u16) {
        self.set_bytes(addr, &value.to_be_bytes())
    }

    pub fn write_u32(&mut self, addr: RegAddr, value: u32) {
        self.set_bytes(addr, &value.to_be_bytes())
    }
}

impl Peripheral for Memory {
    fn write(&mut self, addr: RegAddr, data: &[u8]) {
        self.set_bytes(addr, data)
    }

    fn read(&mut self, addr: RegAddr, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes(addr, buf.len()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    /// A write frame as sent, address header included.
    Write { frame: Vec<u8>, mode: WriteMode },
    /// A bus read, attributed to the address of the preceding write.
    Read { addr: RegAddr, data: Vec<u8> },
}

impl Transaction {
    /// Register the transaction targeted, if the frame carried one.
    pub fn addr(&self) -> Option<RegAddr> {
        match self {
            Transaction::Write { frame, .. } => frame
                .first_chunk::<3>()
                .map(|header| RegAddr::from_be_bytes(*header)),
            Transaction::Read { addr, .. } => Some(*addr),
        }
    }

    /// Payload of a write that carried data, as opposed to an address-only
    /// frame that sets up a read.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Transaction::Write { frame, .. } if frame.len() > 3 => Some(&frame[3..]),
            _ => None,
        }
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addr = self.addr().unwrap_or_default();
        match self {
            Transaction::Write { frame, mode } => {
                let data = frame.get(3..).unwrap_or_default();
                write!(f, "W {addr} {} ({mode})", hex::encode_upper(data))
            }
            Transaction::Read { data, .. } => write!(f, "R {addr} {}", hex::encode_upper(data)),
        }
    }
}

pub struct FakeBus<P> {
    peripheral: P,
    log: Vec<Transaction>,
    delays: Vec<Duration>,
    read_addr: Option<RegAddr>,
    short_writes: HashSet<RegAddr>,
    short_reads: HashSet<RegAddr>,
}

impl<P: Peripheral> FakeBus<P> {
    pub fn new(peripheral: P) -> Self {
        Self {
            peripheral,
            log: Vec::new(),
            delays: Vec::new(),
            read_addr: None,
            short_writes: HashSet::new(),
            short_reads: HashSet::new(),
        }
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.log
    }

    pub fn clear_transactions(&mut self) {
        self.log.clear();
        self.delays.clear();
    }

    /// Delays requested through [`Transport::delay`], in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of bus reads of `addr`.
    pub fn reads_of(&self, addr: RegAddr) -> usize {
        self.log
            .iter()
            .filter(|t| matches!(t, Transaction::Read { addr: a, .. } if *a == addr))
            .count()
    }

    /// Payloads written to `addr`, oldest first.
    pub fn writes_to(&self, addr: RegAddr) -> Vec<&[u8]> {
        self.log
            .iter()
            .filter(|t| t.addr() == Some(addr))
            .filter_map(Transaction::payload)
            .collect()
    }

    /// Drop the last byte of every data frame addressed to `addr`.
    pub fn short_write_at(&mut self, addr: RegAddr) {
        self.short_writes.insert(addr);
    }

    /// Return nothing for every read of `addr`.
    pub fn short_read_at(&mut self, addr: RegAddr) {
        self.short_reads.insert(addr);
    }

    pub fn clear_faults(&mut self) {
        self.short_writes.clear();
        self.short_reads.clear();
    }
}

impl<P: Peripheral> Transport for FakeBus<P> {
    fn write(&mut self, frame: &[u8], mode: WriteMode) -> io::Result<usize> {
        let transaction = Transaction::Write {
            frame: frame.to_vec(),
            mode,
        };
        trace!(%transaction);
        self.log.push(transaction);

        let Some((header, data)) = frame.split_first_chunk::<3>() else {
            return Ok(0);
        };
        let addr = RegAddr::from_be_bytes(*header);
        self.read_addr = Some(addr);
        if data.is_empty() {
            return Ok(frame.len());
        }
        if self.short_writes.contains(&addr) {
            return Ok(frame.len() - 1);
        }
        self.peripheral.write(addr, data);
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(addr) = self.read_addr else {
            return Ok(0);
        };
        let len = if self.short_reads.contains(&addr) {
            0
        } else {
            self.peripheral.read(addr, buf);
            buf.len()
        };
        let transaction = Transaction::Read {
            addr,
            data: buf[..len].to_vec(),
        };
        trace!(%transaction);
        self.log.push(transaction);
        Ok(len)
    }

    fn delay(&mut self, dur: Duration) {
        self.delays.push(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_defaults_to_zero() {
        let mut mem = Memory::default();
        mem.write_u16(RegAddr::new(0x202), 0xabcd);
        assert_eq!(mem.read_u32(RegAddr::new(0x200)), 0x0000_abcd);
        assert_eq!(mem.bytes(RegAddr::new(0x203), 3), [0xcd, 0, 0]);
    }

    #[test]
    fn read_without_address_is_empty() {
        let mut bus = FakeBus::new(Memory::default());
        let mut buf = [0u8; 4];
        assert_eq!(bus.read(&mut buf).unwrap(), 0);
        assert!(bus.transactions().is_empty());
    }

    #[test]
    fn log_reports_targets() {
        let mut bus = FakeBus::new(Memory::default());
        bus.write(&[0x11, 0x00, 0x40, 0x00, 0x00, 0x00, 0x01], WriteMode::Terminal)
            .unwrap();
        bus.write(&[0x11, 0x00, 0x40], WriteMode::Terminal).unwrap();
        let mut buf = [0u8; 4];
        bus.read(&mut buf).unwrap();

        let target = RegAddr::new(0x11_0040);
        assert_eq!(bus.writes_to(target), [&[0, 0, 0, 1][..]]);
        assert_eq!(bus.reads_of(target), 1);
        assert_eq!(buf, [0, 0, 0, 1]);
        assert_eq!(bus.transactions()[0].to_string(), "W 110040 00000001 (Terminal)");
        assert_eq!(bus.transactions()[2].to_string(), "R 110040 00000001");
    }
}
