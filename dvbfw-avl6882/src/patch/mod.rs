//! Vendor patch images.
//!
//! A patch is a big-endian stream of 32-bit words:
//!
//! ```text
//! [0]       magic[31:28] .. version[7:0]
//! [1]       total length
//! [2]       standard
//! [3]       argument struct address
//! [4]       data section offset, in words
//! [5]       reserved length N
//! [6..6+N]  reserved
//! [6+N]     script length, in words
//! [7+N..]   script, then data
//! ```

use facet::Facet;
use nom::{IResult, Parser, bytes::complete::take, number::complete::be_u32};

use crate::{Error, FirmwareError, Result};

pub mod script;
#[cfg(test)]
pub(crate) mod testing;
pub mod vm;

pub const MAGIC_MASK: u32 = 0xf000_0000;
pub const MAGIC: u32 = 0x1000_0000;
pub const SUPPORTED_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Facet)]
pub struct PatchHeader {
    pub magic: u32,
    pub total_len: u32,
    pub standard: u32,
    pub args_addr: u32,
    pub data_section_offset: u32,
    pub reserved_len: u32,
    pub script_len: u32,
}

fn header(input: &[u8]) -> IResult<&[u8], PatchHeader> {
    let (input, (magic, total_len, standard, args_addr, data_section_offset, reserved_len)) =
        (be_u32, be_u32, be_u32, be_u32, be_u32, be_u32).parse(input)?;
    let (input, _reserved) = take((reserved_len as usize).saturating_mul(4)).parse(input)?;
    let (input, script_len) = be_u32(input)?;
    Ok((
        input,
        PatchHeader {
            magic,
            total_len,
            standard,
            args_addr,
            data_section_offset,
            reserved_len,
            script_len,
        },
    ))
}

impl PatchHeader {
    pub fn parse(image: &[u8]) -> Result<Self, FirmwareError> {
        header(image)
            .map(|(_, header)| header)
            .map_err(|_| FirmwareError::TooShort { len: image.len() })
    }

    pub fn version(&self) -> u8 {
        self.magic as u8
    }

    pub fn validate(&self) -> Result<(), FirmwareError> {
        if self.magic & MAGIC_MASK != MAGIC {
            return Err(FirmwareError::BadMagic(self.magic));
        }
        if self.version() != SUPPORTED_VERSION {
            return Err(FirmwareError::UnsupportedVersion(self.version()));
        }
        Ok(())
    }

    /// Word index of the first instruction.
    pub fn script_start(&self) -> usize {
        7 + self.reserved_len as usize
    }

    /// Word index one past the last instruction.
    pub fn script_end(&self) -> usize {
        self.script_start().saturating_add(self.script_len as usize)
    }
}

/// A validated patch, held as host-order words.
#[derive(Clone, Debug)]
pub struct PatchImage {
    header: PatchHeader,
    words: Vec<u32>,
}

impl PatchImage {
    /// Check the header and convert the image to words.
    ///
    /// A trailing partial word is ignored. Nothing here touches the device, so
    /// a rejected blob never produces bus traffic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = PatchHeader::parse(bytes)?;
        header.validate()?;
        let words = to_words(bytes)?;
        Ok(Self { header, words })
    }

    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, idx: usize) -> Result<u32, FirmwareError> {
        self.words.get(idx).copied().ok_or(FirmwareError::Truncated {
            idx,
            len: self.words.len(),
        })
    }

    pub fn slice(&self, start: usize, len: usize) -> Result<&[u32], FirmwareError> {
        let truncated = || FirmwareError::Truncated {
            idx: start.saturating_add(len),
            len: self.words.len(),
        };
        let end = start.checked_add(len).ok_or_else(truncated)?;
        self.words.get(start..end).ok_or_else(truncated)
    }
}

/// Big-endian words of `bytes`, ignoring a trailing partial word.
pub fn to_words(bytes: &[u8]) -> Result<Vec<u32>> {
    let (chunks, _) = bytes.as_chunks::<4>();
    let mut words = Vec::new();
    words
        .try_reserve_exact(chunks.len())
        .map_err(|_| Error::OutOfMemory {
            words: chunks.len(),
        })?;
    words.extend(chunks.iter().map(|c| u32::from_be_bytes(*c)));
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::{testing::PatchBuilder, *};

    #[test]
    fn header_fields() {
        let bytes = PatchBuilder::new()
            .standard(2)
            .args_addr(0x0020_0000)
            .reserved(&[0xdead_beef, 0xcafe_f00d])
            .data(&[1, 2, 3])
            .bytes();
        let header = PatchHeader::parse(&bytes).unwrap();
        assert_eq!(header.magic, 0x1000_0001);
        assert_eq!(header.version(), 1);
        assert_eq!(header.standard, 2);
        assert_eq!(header.args_addr, 0x0020_0000);
        assert_eq!(header.reserved_len, 2);
        assert_eq!(header.script_len, 0);
        assert_eq!(header.script_start(), 9);
        assert_eq!(header.data_section_offset, 9);
        header.validate().unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = PatchBuilder::new().magic(0x2000_0001).bytes();
        assert_eq!(
            PatchImage::from_bytes(&bytes).unwrap_err().to_string(),
            "invalid firmware: bad magic in header word 20000001"
        );
    }

    #[test]
    fn rejects_other_versions() {
        let bytes = PatchBuilder::new().magic(0x1000_0002).bytes();
        assert!(matches!(
            PatchImage::from_bytes(&bytes),
            Err(Error::InvalidFirmware(FirmwareError::UnsupportedVersion(2)))
        ));
    }

    #[test]
    fn rejects_short_images() {
        let bytes = PatchBuilder::new().reserved(&[0; 4]).bytes();
        assert!(matches!(
            PatchHeader::parse(&bytes[..20]),
            Err(FirmwareError::TooShort { len: 20 })
        ));
        // reserved block runs past the end
        assert!(matches!(
            PatchHeader::parse(&bytes[..30]),
            Err(FirmwareError::TooShort { len: 30 })
        ));
    }

    #[test]
    fn words_are_big_endian_and_truncated() {
        let words = to_words(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde]).unwrap();
        assert_eq!(words, [0x1234_5678]);
    }

    #[test]
    fn out_of_range_access() {
        let image = PatchBuilder::new().data(&[7, 8]).image();
        let len = image.len();
        assert_eq!(image.word(len - 1).unwrap(), 8);
        assert_eq!(
            image.word(len).unwrap_err(),
            FirmwareError::Truncated { idx: len, len }
        );
        assert_eq!(image.slice(len - 2, 2).unwrap(), [7, 8]);
        assert!(image.slice(len - 1, 2).is_err());
        assert!(image.slice(usize::MAX, 2).is_err());
    }
}
