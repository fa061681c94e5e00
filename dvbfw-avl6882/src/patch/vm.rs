//! Patch script interpreter.
//!
//! Instructions run in order, each guarded by a condition folded into a
//! running accumulator that carries over from the previous instruction.
//! Transaction failures do not stop the script, see [`Sticky`].

use dvbfw_io::{RegAddr, Session, Transport, Width};
use tracing::{debug, instrument, trace, warn};

use super::{
    PatchImage,
    script::{AddrMode, BinaryOp, COMPRESSION_ZLIB, Opcode, Operation, UnaryOp, VAR_COUNT},
};
use crate::{
    Error, FirmwareError, NoDeviceReason, Result, Sticky,
    config::PollConfig,
    protocol,
    registers::{FwCommand, cpu, fw, hw},
};

/// `DMA_HW` gives up once this many status polls have come back busy.
pub const DMA_MAX_TRIES: u32 = 20;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variables([u32; VAR_COUNT]);

impl Variables {
    pub fn get(&self, index: u32) -> Result<u32> {
        self.0
            .get(index as usize)
            .copied()
            .ok_or(Error::OutOfBounds { index })
    }

    pub fn set(&mut self, index: u32, value: u32) -> Result<()> {
        let slot = self
            .0
            .get_mut(index as usize)
            .ok_or(Error::OutOfBounds { index })?;
        *slot = value;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

pub struct Vm<'p> {
    image: &'p PatchImage,
    vars: Variables,
    condition: u32,
    idx: usize,
    poll: PollConfig,
}

impl<'p> Vm<'p> {
    pub fn new(image: &'p PatchImage) -> Self {
        Self {
            image,
            vars: Variables::default(),
            condition: 0,
            idx: 0,
            poll: PollConfig::COMMAND,
        }
    }

    /// Bounds for the firmware commands the script issues.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    pub fn condition(&self) -> u32 {
        self.condition
    }

    /// Execute the whole script against the device.
    ///
    /// Malformed scripts (unknown opcode, words past the end, bad variable
    /// index) and a DMA engine that never becomes ready abort immediately.
    /// Everything else is accumulated and the first failure is returned once
    /// the script has finished.
    #[instrument(skip_all, fields(standard = self.image.header().standard))]
    pub fn run<T: Transport>(&mut self, session: &mut Session<T>) -> Result<()> {
        let header = *self.image.header();
        let end = header.script_end();
        self.idx = header.script_start();
        self.vars = Variables::default();
        self.condition = 0;

        let mut sticky = Sticky::new();
        while self.idx < end {
            let start = self.idx;
            let num_cmd_words = self.next()?;
            let next_cmd_idx = start.saturating_add(num_cmd_words as usize);

            let num_cond_words = self.next()?;
            if num_cond_words == 0 {
                self.condition = 1;
            }
            for _ in 0..num_cond_words {
                let op = Operation::from_raw(self.next()?);
                let value = self.next()?;
                self.fold(op, value)?;
            }

            self.diagnostics(session);

            if self.condition == 0 {
                // A skipped instruction is only stepped over by its length
                // word. Executed ones advance by their return values instead.
                if num_cmd_words == 0 {
                    return Err(FirmwareError::EmptyInstruction { idx: start }.into());
                }
                trace!(idx = start, "condition false, skipping");
                self.idx = next_cmd_idx;
                continue;
            }

            let word = self.next()?;
            let opcode = Opcode::from_repr(word).ok_or(NoDeviceReason::UnknownOpcode {
                opcode: word,
                idx: self.idx - 1,
            })?;
            debug!(idx = start, %opcode);
            let num_rvs = self.execute(opcode, session, &mut sticky)?;
            self.idx = self.idx.saturating_add(num_rvs as usize);
        }

        if !sticky.is_ok() {
            warn!(failures = sticky.failures(), "patch script finished with errors");
        }
        sticky.finish()
    }

    fn next(&mut self) -> Result<u32> {
        let word = self.image.word(self.idx)?;
        self.idx += 1;
        Ok(word)
    }

    /// Store `value` in the variable named by the first return-value word.
    fn store_result(&mut self, value: u32) -> Result<()> {
        let slot = self.image.word(self.idx)?;
        trace!(slot, value, "result");
        self.vars.set(slot, value)
    }

    fn payload(&self, words: u32) -> Result<&'p [u32]> {
        let image = self.image;
        let len = (words as usize).checked_mul(3).ok_or(FirmwareError::Truncated {
            idx: usize::MAX,
            len: image.len(),
        })?;
        Ok(image.slice(self.idx, len)?)
    }

    /// Fold one condition into the accumulator.
    fn fold(&mut self, op: Operation, value: u32) -> Result<()> {
        let binary = op.binary_op();
        let mut value = value;
        if op.addr_mode == AddrMode::VarIdx && binary != Some(BinaryOp::Store) {
            value = self.vars.get(value)?;
        }
        match op.unary_op() {
            Some(UnaryOp::LogicalNegate) => value = u32::from(value == 0),
            Some(UnaryOp::BitwiseNegate) => value = !value,
            Some(UnaryOp::Nop) | None => {}
        }

        let acc = self.condition;
        self.condition = match binary {
            Some(BinaryOp::Load) => value,
            Some(BinaryOp::And) => u32::from(acc != 0 && value != 0),
            Some(BinaryOp::Or) => u32::from(acc != 0 || value != 0),
            Some(BinaryOp::BitwiseAnd) => acc & value,
            Some(BinaryOp::BitwiseOr) => acc | value,
            Some(BinaryOp::Equals) => u32::from(acc == value),
            Some(BinaryOp::NotEquals) => u32::from(acc != value),
            Some(BinaryOp::Store) => {
                self.vars.set(value, acc)?;
                acc
            }
            None => {
                trace!(op = op.binary, "ignoring unknown binary op");
                acc
            }
        };
        Ok(())
    }

    /// Reads the firmware does before every instruction. Results are only
    /// logged.
    fn diagnostics<T: Transport>(&self, session: &mut Session<T>) {
        for addr in [hw::TMP_TOP_VALID, cpu::READY_WORD] {
            match session.read_u32(addr) {
                Ok(value) => trace!(%addr, value, "diagnostic"),
                Err(e) => warn!(%addr, error = %e, "diagnostic read failed"),
            }
        }
    }

    /// Run one instruction, leaving `idx` at its `num_rvs` word consumed.
    /// Returns `num_rvs`.
    fn execute<T: Transport>(
        &mut self,
        opcode: Opcode,
        session: &mut Session<T>,
        sticky: &mut Sticky,
    ) -> Result<u32> {
        let header = *self.image.header();
        let args = RegAddr::new(header.args_addr);

        match opcode {
            Opcode::ValidateCrc => {
                let expected = self.next()?;
                let src = self.next()?;
                let length = self.next()?;
                sticky.record(session.write_u32(fw::COMMAND_ARGS_ADDR, args.get()));
                sticky.record(session.write_u32(args, src));
                sticky.record(session.write_u32(args.offset(4), length));
                sticky.record(protocol::exec(session, FwCommand::CalcCrc, self.poll));
                let computed = sticky.record(session.read_u32(args.offset(8)));
                let num_rvs = self.next()?;
                let matched = computed == Some(expected);
                if !matched {
                    debug!(expected, ?computed, "CRC mismatch");
                }
                self.store_result(u32::from(matched))?;
                Ok(num_rvs)
            }
            Opcode::Ping => {
                let result = protocol::exec(session, FwCommand::Ping, self.poll);
                let alive = result.is_ok();
                sticky.record(result);
                let num_rvs = self.next()?;
                self.store_result(u32::from(alive))?;
                Ok(num_rvs)
            }
            Opcode::LdToDevice => {
                let length = self.next()?;
                let dest = self.next()?;
                let offset = self.next()?;
                let start = (header.data_section_offset as usize).saturating_add(offset as usize);
                let image = self.image;
                let words = image.slice(start, length as usize)?;
                sticky.record(session.write_words(RegAddr::new(dest), words));
                self.next()
            }
            Opcode::LdToDeviceImm => {
                let length = self.next()?;
                let dest = self.next()?;
                let data = self.next()?;
                sticky.record(session.write_register(
                    RegAddr::new(dest),
                    data,
                    Width::from_len(length),
                ));
                self.next()
            }
            Opcode::RdFromDevice => {
                let length = self.next()?;
                let src = self.next()?;
                let num_rvs = self.next()?;
                let value =
                    sticky.record(session.read_register(RegAddr::new(src), Width::from_len(length)));
                self.store_result(value.unwrap_or(0))?;
                Ok(num_rvs)
            }
            Opcode::Dma => {
                let dest = self.next()?;
                let length = self.next()?;
                let payload = self.payload(length)?;
                if !payload.is_empty() {
                    sticky.record(session.write_words(RegAddr::new(dest), payload));
                }
                sticky.record(session.write_u32(fw::COMMAND_ARGS_ADDR, dest));
                sticky.record(protocol::exec(session, FwCommand::Dma, self.poll));
                self.idx += payload.len();
                self.next()
            }
            Opcode::Decompress => {
                let kind = self.next()?;
                let src = self.next()?;
                let dest = self.next()?;
                let mut fields = vec![kind, src, dest];
                if kind == COMPRESSION_ZLIB {
                    fields.push(self.next()?);
                    fields.push(self.next()?);
                }
                sticky.record(session.write_u32(fw::COMMAND_ARGS_ADDR, args.get()));
                for (field, offset) in fields.into_iter().zip((0..).step_by(4)) {
                    sticky.record(session.write_u32(args.offset(offset), field));
                }
                sticky.record(protocol::exec(session, FwCommand::Decompress, self.poll));
                self.next()
            }
            Opcode::AssertCpuReset => {
                sticky.record(session.write_u32(hw::CPU_RESET, 1));
                self.next()
            }
            Opcode::ReleaseCpuReset => {
                sticky.record(session.write_u32(hw::CPU_RESET, 0));
                self.next()
            }
            Opcode::DmaHw => {
                let dest = self.next()?;
                let length = self.next()?;
                let payload = self.payload(length)?;
                if !payload.is_empty() {
                    sticky.record(session.write_words(RegAddr::new(dest), payload));
                }
                let mut polls = 0;
                loop {
                    if polls > DMA_MAX_TRIES {
                        return Err(NoDeviceReason::DmaNotReady { polls }.into());
                    }
                    polls += 1;
                    if let Some(status) = sticky.record(session.read_u32(hw::DMA_STATUS))
                        && status & hw::DMA_READY != 0
                    {
                        break;
                    }
                }
                sticky.record(session.write_u32(hw::DMA_TRIGGER, dest));
                self.idx += payload.len();
                self.next()
            }
            Opcode::SetCondImm => {
                let data = self.next()?;
                let num_rvs = self.next()?;
                self.store_result(data)?;
                Ok(num_rvs)
            }
        }
    }
}
