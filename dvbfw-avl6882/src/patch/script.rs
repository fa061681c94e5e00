//! Patch script encoding.
//!
//! Each instruction is laid out as
//!
//! ```text
//! num_cmd_words  (counts itself)
//! num_cond_words
//! (operation, value) * num_cond_words
//! opcode
//! operands...
//! num_rvs
//! rvs...
//! ```

use std::fmt::Display;

use dvbfw_io::Hex;

use super::PatchImage;
use crate::FirmwareError;

/// Size of the interpreter's variable array.
pub const VAR_COUNT: usize = 32;

/// `DECOMPRESS` type carrying a reference dictionary.
pub const COMPRESSION_ZLIB: u32 = 0;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr, strum::VariantArray)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    ValidateCrc = 0,
    Ping = 1,
    LdToDevice = 2,
    Dma = 3,
    Decompress = 4,
    AssertCpuReset = 5,
    ReleaseCpuReset = 6,
    LdToDeviceImm = 7,
    RdFromDevice = 8,
    DmaHw = 9,
    SetCondImm = 10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum AddrMode {
    /// Value is an index into the variable array.
    #[strum(serialize = "var")]
    VarIdx,
    #[strum(serialize = "imm")]
    Immediate,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr)]
pub enum UnaryOp {
    Nop = 0,
    LogicalNegate = 1,
    BitwiseNegate = 2,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    Load = 0,
    And = 1,
    Or = 2,
    BitwiseAnd = 3,
    BitwiseOr = 4,
    Equals = 5,
    /// Store the accumulator into the variable named by the value.
    Store = 6,
    NotEquals = 7,
}

/// Condition operation word.
///
/// ```text
/// [17:16] addressing mode, 0 = variable index
/// [15: 8] unary op
/// [ 7: 0] binary op
/// ```
///
/// Unknown unary ops pass the value through, unknown binary ops leave the
/// accumulator alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    pub addr_mode: AddrMode,
    pub unary: u8,
    pub binary: u8,
}

impl Operation {
    pub const fn new(addr_mode: AddrMode, unary: UnaryOp, binary: BinaryOp) -> Self {
        Self {
            addr_mode,
            unary: unary as u8,
            binary: binary as u8,
        }
    }

    pub const fn from_raw(word: u32) -> Self {
        let addr_mode = match (word >> 16) & 0x3 {
            0 => AddrMode::VarIdx,
            _ => AddrMode::Immediate,
        };
        Self {
            addr_mode,
            unary: (word >> 8) as u8,
            binary: word as u8,
        }
    }

    pub const fn to_raw(self) -> u32 {
        let mode = match self.addr_mode {
            AddrMode::VarIdx => 0,
            AddrMode::Immediate => 1,
        };
        (mode << 16) | ((self.unary as u32) << 8) | self.binary as u32
    }

    pub fn unary_op(self) -> Option<UnaryOp> {
        UnaryOp::from_repr(self.unary)
    }

    pub fn binary_op(self) -> Option<BinaryOp> {
        BinaryOp::from_repr(self.binary)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unary = match self.unary_op() {
            Some(UnaryOp::Nop) => "",
            Some(UnaryOp::LogicalNegate) => "!",
            Some(UnaryOp::BitwiseNegate) => "~",
            None => "?",
        };
        match self.binary_op() {
            Some(op) => write!(f, "{op} {unary}{}", self.addr_mode),
            None => write!(f, "op{} {unary}{}", self.binary, self.addr_mode),
        }
    }
}

/// One decoded instruction, borrowed from its image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Word index of `num_cmd_words`.
    pub idx: usize,
    /// `(operation, value)` pairs, flattened.
    pub conditions: &'a [u32],
    /// Opcode word onwards.
    pub body: &'a [u32],
}

impl<'a> Instruction<'a> {
    pub fn conditions(&self) -> impl Iterator<Item = (Operation, u32)> + 'a {
        let (pairs, _) = self.conditions.as_chunks::<2>();
        pairs.iter().map(|[op, value]| (Operation::from_raw(*op), *value))
    }

    /// `Err` carries an opcode word the interpreter would reject.
    pub fn opcode(&self) -> Option<Result<Opcode, u32>> {
        let word = *self.body.first()?;
        Some(Opcode::from_repr(word).ok_or(word))
    }
}

impl Display for Instruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}:", self.idx)?;
        for (op, value) in self.conditions() {
            write!(f, " [{op} {}]", Hex(value))?;
        }
        match self.opcode() {
            Some(Ok(opcode)) => write!(f, " {opcode}")?,
            Some(Err(word)) => write!(f, " <unknown {}>", Hex(word))?,
            None => write!(f, " <empty>")?,
        }
        for word in self.body.iter().skip(1) {
            write!(f, " {}", Hex(*word))?;
        }
        Ok(())
    }
}

/// Walk the script of `image` using the declared instruction lengths.
///
/// Stops after the first malformed instruction.
pub fn disassemble(image: &PatchImage) -> impl Iterator<Item = Result<Instruction<'_>, FirmwareError>> {
    let end = image.header().script_end();
    let mut idx = image.header().script_start();
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || idx >= end {
            return None;
        }
        let instruction = decode_at(image, idx);
        match &instruction {
            Ok(_) => idx += image.words()[idx] as usize,
            Err(_) => failed = true,
        }
        Some(instruction)
    })
}

fn decode_at(image: &PatchImage, idx: usize) -> Result<Instruction<'_>, FirmwareError> {
    let len = image.word(idx)? as usize;
    if len == 0 {
        return Err(FirmwareError::EmptyInstruction { idx });
    }
    let words = image.slice(idx, len)?;
    let num_conds = image.word(idx + 1)? as usize;
    let cond_end = num_conds
        .checked_mul(2)
        .and_then(|n| n.checked_add(2))
        .filter(|end| *end <= words.len())
        .ok_or(FirmwareError::Truncated {
            idx: idx + len,
            len: image.len(),
        })?;
    Ok(Instruction {
        idx,
        conditions: &words[2..cond_end],
        body: &words[cond_end..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::testing::PatchBuilder;

    #[test]
    fn operation_bits() {
        let op = Operation::from_raw(0x0001_0205);
        assert_eq!(op.addr_mode, AddrMode::Immediate);
        assert_eq!(op.unary_op(), Some(UnaryOp::BitwiseNegate));
        assert_eq!(op.binary_op(), Some(BinaryOp::Equals));
        assert_eq!(op.to_raw(), 0x0001_0205);
        assert_eq!(op.to_string(), "equals ~imm");

        let op = Operation::from_raw(0x0000_0106);
        assert_eq!(op.addr_mode, AddrMode::VarIdx);
        assert_eq!(op.binary_op(), Some(BinaryOp::Store));
        assert_eq!(op.to_string(), "store !var");

        assert_eq!(Operation::from_raw(0x0000_0942).to_string(), "op66 ?var");
    }

    #[test]
    fn opcode_names() {
        assert_eq!(Opcode::ValidateCrc.to_string(), "VALIDATE_CRC");
        assert_eq!(Opcode::from_repr(9), Some(Opcode::DmaHw));
        assert_eq!(Opcode::from_repr(11), None);
    }

    #[test]
    fn walks_script() {
        let store0 = Operation::new(AddrMode::VarIdx, UnaryOp::Nop, BinaryOp::Store);
        let image = PatchBuilder::new()
            .instr(&[], Opcode::Ping, &[], &[0])
            .instr(&[(store0, 3)], Opcode::LdToDeviceImm, &[4, 0x208, 2], &[])
            .raw_instr(&[], 0x42, &[], &[])
            .image();

        let listing: Vec<String> = disassemble(&image)
            .map(|i| i.unwrap().to_string())
            .collect();
        assert_eq!(
            listing,
            [
                "0007: PING 00000001 00000000",
                "0012: [store var 00000003] LD_TO_DEVICE_IMM 00000004 00000208 00000002 00000000",
                "0021: <unknown 00000042> 00000000",
            ]
        );
    }

    #[test]
    fn stops_at_empty_instruction() {
        let image = PatchBuilder::new()
            .instr(&[], Opcode::AssertCpuReset, &[], &[])
            .script_words(&[0, 0])
            .image();
        let all: Vec<_> = disassemble(&image).collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_ok());
        assert_eq!(all[1], Err(FirmwareError::EmptyInstruction { idx: 11 }));
    }

    #[test]
    fn rejects_overlong_condition_count() {
        let image = PatchBuilder::new().script_words(&[3, 5, 0]).image();
        assert!(matches!(
            disassemble(&image).next(),
            Some(Err(FirmwareError::Truncated { .. }))
        ));
    }
}
