use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use color_eyre::eyre::{OptionExt, eyre};
use dvbfw_avl6882::sec::MAX_MESSAGE_LEN;
use dvbfw_io::{RegAddr, ShortHex, Width};

/// `ADDR[:WIDTH]`, address in hex, width in bytes (default 4).
#[derive(Debug, Clone, Copy)]
pub struct RegArg {
    pub addr: RegAddr,
    pub width: Width,
}

impl FromStr for RegArg {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, width) = match s.split_once(':') {
            Some((addr, width)) => (addr, width.parse::<u32>()?),
            None => (s, 4),
        };
        if ![1, 2, 4].contains(&width) {
            return Err(eyre!("width must be 1, 2 or 4, not {width}"));
        }
        let addr = u32::from_str_radix(addr.trim_start_matches("0x"), 16)?;
        if addr > 0x00ff_ffff {
            return Err(eyre!("address {addr:X} does not fit in 24 bits"));
        }
        Ok(Self {
            addr: RegAddr::new(addr),
            width: Width::from_len(width),
        })
    }
}

impl Display for RegArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.addr, self.width.len())
    }
}

impl RegArg {
    pub fn format_value(&self, value: u32) -> String {
        format!("{value:0w$X}", w = self.width.len() * 2)
    }
}

/// `ADDR[:WIDTH]=VALUE`, value in hex with `0x` or decimal.
#[derive(Debug, Clone, Copy)]
pub struct PokeArg {
    pub reg: RegArg,
    pub value: u32,
}

impl FromStr for PokeArg {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (reg, value) = s.split_once('=').ok_or_eyre("no '='")?;
        let value = match value.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => value.parse()?,
        };
        Ok(Self {
            reg: reg.parse()?,
            value,
        })
    }
}

/// DiSEqC master command as hex, e.g. `E01038F0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseqcMsg(pub Vec<u8>);

impl FromStr for DiseqcMsg {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        if bytes.is_empty() || bytes.len() > MAX_MESSAGE_LEN {
            return Err(eyre!(
                "message must be 1 to {MAX_MESSAGE_LEN} bytes, not {}",
                bytes.len()
            ));
        }
        Ok(Self(bytes))
    }
}

impl Display for DiseqcMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        ShortHex(&self.0).fmt(f)
    }
}
