//! Hand-assembled patch images for tests.

use super::{
    PatchImage,
    script::{Opcode, Operation},
};

pub(crate) struct PatchBuilder {
    magic: u32,
    standard: u32,
    args_addr: u32,
    reserved: Vec<u32>,
    script: Vec<u32>,
    data: Vec<u32>,
}

impl PatchBuilder {
    pub const ARGS_ADDR: u32 = 0x0020_0000;

    pub fn new() -> Self {
        Self {
            magic: 0x1000_0001,
            standard: 0,
            args_addr: Self::ARGS_ADDR,
            reserved: Vec::new(),
            script: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn standard(mut self, standard: u32) -> Self {
        self.standard = standard;
        self
    }

    pub fn args_addr(mut self, addr: u32) -> Self {
        self.args_addr = addr;
        self
    }

    pub fn reserved(mut self, words: &[u32]) -> Self {
        self.reserved = words.to_vec();
        self
    }

    pub fn data(mut self, words: &[u32]) -> Self {
        self.data = words.to_vec();
        self
    }

    /// Append `opcode` guarded by `conds`. `operands` includes any inline
    /// payload.
    pub fn instr(
        self,
        conds: &[(Operation, u32)],
        opcode: Opcode,
        operands: &[u32],
        rvs: &[u32],
    ) -> Self {
        self.raw_instr(conds, opcode as u32, operands, rvs)
    }

    pub fn raw_instr(
        mut self,
        conds: &[(Operation, u32)],
        opcode: u32,
        operands: &[u32],
        rvs: &[u32],
    ) -> Self {
        let len = 2 + 2 * conds.len() + 1 + operands.len() + 1 + rvs.len();
        self.script.push(len as u32);
        self.script.push(conds.len() as u32);
        for (op, value) in conds {
            self.script.push(op.to_raw());
            self.script.push(*value);
        }
        self.script.push(opcode);
        self.script.extend_from_slice(operands);
        self.script.push(rvs.len() as u32);
        self.script.extend_from_slice(rvs);
        self
    }

    /// Append raw script words.
    pub fn script_words(mut self, words: &[u32]) -> Self {
        self.script.extend_from_slice(words);
        self
    }

    pub fn words(&self) -> Vec<u32> {
        let data_offset = 7 + self.reserved.len() + self.script.len();
        let total = data_offset + self.data.len();
        let mut words = vec![
            self.magic,
            (total * 4) as u32,
            self.standard,
            self.args_addr,
            data_offset as u32,
            self.reserved.len() as u32,
        ];
        words.extend_from_slice(&self.reserved);
        words.push(self.script.len() as u32);
        words.extend_from_slice(&self.script);
        words.extend_from_slice(&self.data);
        words
    }

    /// Word index of `data[0]` in the finished image.
    pub fn data_index(&self) -> usize {
        7 + self.reserved.len() + self.script.len()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    pub fn image(&self) -> PatchImage {
        PatchImage::from_bytes(&self.bytes()).unwrap()
    }
}
