//! Register-level model of the demodulator for tests and dry runs.
//!
//! [`SimDemod`] plugs into [`dvbfw_io::fake::FakeBus`] and answers the
//! firmware command protocol well enough to run a patch script end to end:
//! commands complete on the spot, the CPU publishes its boot signature when
//! released from reset and an acquire can report lock.

use crc::{CRC_32_ISO_HDLC, Crc};
use dvbfw_io::{RegAddr, Width, fake::Memory, fake::Peripheral};
use tracing::trace;

use crate::registers::{DemodMode, FwCommand, cpu, diseqc, dvbc, dvbs, dvbt, fw, hw};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Signal reported after [`FwCommand::Acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signal {
    pub snr_db_x100: u32,
    pub rf_agc: u16,
}

/// One DiSEqC transmission: the FIFO contents and the tx mode they were sent
/// in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiseqcTx {
    pub mode: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct SimDemod {
    mem: Memory,
    commands: Vec<u16>,
    failing_ping: bool,
    stuck: bool,
    crc_result: Option<u32>,
    boots: bool,
    patch_version: u32,
    signal: Option<Signal>,
    diseqc_fifo: Vec<u8>,
    diseqc_sent: Vec<DiseqcTx>,
    diseqc_stuck: bool,
}

impl Default for SimDemod {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDemod {
    pub fn new() -> Self {
        let mut mem = Memory::default();
        mem.write_u32(hw::DMA_STATUS, hw::DMA_READY);
        Self {
            mem,
            commands: Vec::new(),
            failing_ping: false,
            stuck: false,
            crc_result: None,
            boots: true,
            patch_version: 0x0100_0000,
            signal: None,
            diseqc_fifo: Vec::new(),
            diseqc_sent: Vec::new(),
            diseqc_stuck: false,
        }
    }

    /// `PING` never completes.
    pub fn with_failing_ping(mut self) -> Self {
        self.failing_ping = true;
        self
    }

    /// No command ever completes.
    pub fn with_stuck_commands(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn with_dma_never_ready(mut self) -> Self {
        self.mem.write_u32(hw::DMA_STATUS, 0);
        self
    }

    /// Answer every `CALC_CRC` with `crc` instead of computing it.
    pub fn with_crc_result(mut self, crc: u32) -> Self {
        self.crc_result = Some(crc);
        self
    }

    /// Releasing the CPU never publishes the boot signature.
    pub fn without_boot(mut self) -> Self {
        self.boots = false;
        self
    }

    pub fn with_patch_version(mut self, version: u32) -> Self {
        self.patch_version = version;
        self
    }

    /// Lock with `signal` on the next acquire.
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// The DiSEqC transmitter never reports done.
    pub fn with_stuck_diseqc(mut self) -> Self {
        self.diseqc_stuck = true;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Raw values posted to the command register, oldest first.
    pub fn commands(&self) -> &[u16] {
        &self.commands
    }

    pub fn diseqc_sent(&self) -> &[DiseqcTx] {
        &self.diseqc_sent
    }

    /// CRC-32 of `len` bytes of memory, as `CALC_CRC` computes it.
    pub fn crc_of(&self, addr: RegAddr, len: u32) -> u32 {
        CRC32.checksum(&self.mem.bytes(addr, len as usize))
    }

    fn command(&mut self, raw: u16) {
        self.commands.push(raw);
        let cmd = FwCommand::from_repr(raw as u8);
        trace!(raw, ?cmd, "sim command");
        if self.stuck || (cmd == Some(FwCommand::Ping) && self.failing_ping) {
            return;
        }
        match cmd {
            Some(FwCommand::CalcCrc) => {
                let args = RegAddr::new(self.mem.read_u32(fw::COMMAND_ARGS_ADDR));
                let src = RegAddr::new(self.mem.read_u32(args));
                let len = self.mem.read_u32(args.offset(4));
                let crc = self.crc_result.unwrap_or_else(|| self.crc_of(src, len));
                self.mem.write_u32(args.offset(8), crc);
            }
            Some(FwCommand::Acquire) => self.acquire(),
            _ => {}
        }
        self.mem.write_u16(fw::COMMAND, 0);
    }

    fn diseqc_control(&mut self, tx: u32) {
        if tx & diseqc::TX_FIFO_RESET != 0 {
            self.diseqc_fifo.clear();
        }
        if tx & diseqc::TX_START == 0 {
            self.mem.write_u32(diseqc::TX_ST, 0);
            return;
        }
        if self.diseqc_stuck {
            return;
        }
        let sent = DiseqcTx {
            mode: tx & diseqc::TONE_MODE_MASK,
            data: std::mem::take(&mut self.diseqc_fifo),
        };
        trace!(?sent, "sim diseqc");
        self.diseqc_sent.push(sent);
        self.mem.write_u32(diseqc::TX_ST, diseqc::TX_DONE);
    }

    fn acquire(&mut self) {
        let Some(signal) = self.signal else {
            return;
        };
        self.mem.write_u16(cpu::RF_AGC, signal.rf_agc);
        match DemodMode::from_repr(self.mem.read_u32(fw::ACTIVE_MODE)) {
            Some(DemodMode::Dvbc) => {
                self.mem.write_u32(dvbc::MODE_STATUS, dvbc::LOCKED);
                self.mem.write_u16(dvbc::SNR_DB_X100, signal.snr_db_x100 as u16);
            }
            Some(DemodMode::Dvbsx) => {
                self.mem.write_u16(dvbs::FEC_LOCK, 1);
                self.mem.write_u32(dvbs::SNR_DB, signal.snr_db_x100);
            }
            Some(DemodMode::Dvbtx) => {
                self.mem.set_bytes(dvbt::FEC_LOCK, &[1]);
                self.mem.write_u16(dvbt::SNR_DB_X100, signal.snr_db_x100 as u16);
            }
            None => {}
        }
    }
}

impl Peripheral for SimDemod {
    fn write(&mut self, addr: RegAddr, data: &[u8]) {
        self.mem.set_bytes(addr, data);
        if addr == fw::COMMAND && data.len() == 2 {
            self.command(u16::from_be_bytes([data[0], data[1]]));
        }
        if addr == hw::CPU_RESET && data.len() == 4 && Width::U32.decode(data) == 0 && self.boots {
            self.mem.write_u32(cpu::READY_WORD, cpu::BOOT_SIGNATURE);
            self.mem.write_u32(cpu::PATCH_VERSION, self.patch_version);
        }
        if data.len() == 4 {
            match addr {
                diseqc::TX_CNTRL => self.diseqc_control(Width::U32.decode(data)),
                diseqc::TX_FIFO_MAP => self.diseqc_fifo.push(data[3]),
                _ => {}
            }
        }
    }

    fn read(&mut self, addr: RegAddr, buf: &mut [u8]) {
        self.mem.read(addr, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_complete_immediately() {
        let mut sim = SimDemod::new();
        sim.write(fw::COMMAND, &[0, FwCommand::LdDefault as u8]);
        assert_eq!(sim.memory().read_u16(fw::COMMAND), 0);
        assert_eq!(sim.commands(), [1]);

        let mut stuck = SimDemod::new().with_stuck_commands();
        stuck.write(fw::COMMAND, &[0, FwCommand::LdDefault as u8]);
        assert_eq!(stuck.memory().read_u16(fw::COMMAND), 1);
    }

    #[test]
    fn crc_is_iso_hdlc() {
        let mut sim = SimDemod::new();
        sim.memory_mut().set_bytes(RegAddr::new(0x1000), b"123456789");
        assert_eq!(sim.crc_of(RegAddr::new(0x1000), 9), 0xcbf4_3926);
    }

    #[test]
    fn release_publishes_signature() {
        let mut sim = SimDemod::new().with_patch_version(0x0203_0004);
        sim.write(hw::CPU_RESET, &[0, 0, 0, 1]);
        assert_eq!(sim.memory().read_u32(cpu::READY_WORD), 0);
        sim.write(hw::CPU_RESET, &[0, 0, 0, 0]);
        assert_eq!(sim.memory().read_u32(cpu::READY_WORD), cpu::BOOT_SIGNATURE);
        assert_eq!(sim.memory().read_u32(cpu::PATCH_VERSION), 0x0203_0004);

        let mut dead = SimDemod::new().without_boot();
        dead.write(hw::CPU_RESET, &[0, 0, 0, 0]);
        assert_eq!(dead.memory().read_u32(cpu::READY_WORD), 0);
    }
}
