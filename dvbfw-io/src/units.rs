use std::fmt::Display;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bytes<T>(pub T);

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Words32<T>(pub T);

impl<T> From<Words32<T>> for Bytes<T>
where
    T: std::ops::Mul<usize, Output = T>,
{
    fn from(value: Words32<T>) -> Self {
        Self(value.0 * 4)
    }
}

/// A demodulator register address. Only the low 24 bits go over the wire.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegAddr(u32);

impl RegAddr {
    pub const MASK: u32 = 0x00ff_ffff;

    pub const fn new(addr: u32) -> Self {
        Self(addr & Self::MASK)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn offset(self, bytes: u32) -> Self {
        Self::new(self.0.wrapping_add(bytes))
    }

    /// ```text
    /// [0] addr[23:16]
    /// [1] addr[15: 8]
    /// [2] addr[ 7: 0]
    /// ```
    pub const fn to_be_bytes(self) -> [u8; 3] {
        let [_, hi, mid, lo] = self.0.to_be_bytes();
        [hi, mid, lo]
    }

    pub const fn from_be_bytes([hi, mid, lo]: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, hi, mid, lo]))
    }
}

impl From<u32> for RegAddr {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl Display for RegAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

/// Size of a single register access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::VariantArray)]
pub enum Width {
    #[strum(to_string = "u8")]
    U8,
    #[strum(to_string = "u16")]
    U16,
    #[strum(to_string = "u32")]
    U32,
}

impl Width {
    /// Map a byte count from a patch script or driver table to a width.
    ///
    /// Anything other than 2 or 4 is a single byte access. Patch images in the
    /// field rely on this, so it is not an error.
    pub const fn from_len(len: u32) -> Self {
        match len {
            4 => Width::U32,
            2 => Width::U16,
            _ => Width::U8,
        }
    }

    pub const fn len(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }

    /// Append the low `len()` bytes of `value`, most significant first.
    pub fn encode(self, value: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes()[4 - self.len()..]);
    }

    /// Big-endian decode of the first `len()` bytes of `bytes`.
    pub fn decode(self, bytes: &[u8]) -> u32 {
        bytes
            .iter()
            .take(self.len())
            .fold(0, |acc, b| acc << 8 | u32::from(*b))
    }
}

#[cfg(test)]
mod tests {
    use strum::VariantArray;

    use super::*;

    #[test]
    fn width_round_trip_is_big_endian() {
        let cases = [
            (Width::U8, 0xa5, &[0xa5][..]),
            (Width::U16, 0x1234, &[0x12, 0x34][..]),
            (Width::U32, 0xdead_beef, &[0xde, 0xad, 0xbe, 0xef][..]),
        ];
        for (width, value, wire) in cases {
            let mut out = Vec::new();
            width.encode(value, &mut out);
            assert_eq!(out, wire, "{width}");
            assert_eq!(width.decode(&out), value, "{width}");
        }
    }

    #[test]
    fn encode_truncates_to_width() {
        let mut out = Vec::new();
        Width::U16.encode(0x0012_3456, &mut out);
        assert_eq!(out, [0x34, 0x56]);
    }

    #[test]
    fn odd_lengths_are_single_bytes() {
        for len in [0, 1, 3, 5, 8, u32::MAX] {
            assert_eq!(Width::from_len(len), Width::U8, "len {len}");
        }
        for width in Width::VARIANTS {
            assert_eq!(Width::from_len(width.len() as u32), *width);
        }
    }

    #[test]
    fn addr_is_24_bits() {
        let addr = RegAddr::new(0xff29_a648);
        assert_eq!(addr.get(), 0x29_a648);
        assert_eq!(addr.to_be_bytes(), [0x29, 0xa6, 0x48]);
        assert_eq!(RegAddr::from_be_bytes(addr.to_be_bytes()), addr);
        assert_eq!(addr.to_string(), "29A648");
        assert_eq!(RegAddr::new(0xff_fffe).offset(4).get(), 0x00_0002);
    }
}
