//! AVL6882 register map.
//!
//! Firmware-visible registers live in small blocks (command block at 0x200,
//! per-standard config/status blocks below 0x1000); hardware registers sit
//! at 0x10_0000 and above.

use dvbfw_io::RegAddr;

const fn r(addr: u32) -> RegAddr {
    RegAddr::new(addr)
}

/// Firmware command block.
pub mod fw {
    use super::*;

    pub const BASE: u32 = 0x200;
    /// 16-bit. Host posts a [`super::FwCommand`] here, firmware clears it when
    /// done.
    pub const COMMAND: RegAddr = r(BASE);
    /// 32-bit pointer to the argument struct of the posted command.
    pub const COMMAND_ARGS_ADDR: RegAddr = r(BASE + 0x04);
    /// 32-bit, see [`super::DemodMode`].
    pub const ACTIVE_MODE: RegAddr = r(BASE + 0x08);
}

/// Transport stream output, byte registers in the firmware command block.
pub mod ts {
    use super::*;

    pub const SERIAL: RegAddr = r(fw::BASE + 0x10);
    pub const CLOCK_EDGE: RegAddr = r(fw::BASE + 0x11);
    pub const CONTINUOUS: RegAddr = r(fw::BASE + 0x12);
    pub const SERIAL_OUTPIN: RegAddr = r(fw::BASE + 0x13);
    pub const SERIAL_MSB: RegAddr = r(fw::BASE + 0x14);
    pub const SYNC_PULSE: RegAddr = r(fw::BASE + 0x15);
    pub const ERROR_POLARITY: RegAddr = r(fw::BASE + 0x16);
    pub const VALID_POLARITY: RegAddr = r(fw::BASE + 0x17);
    pub const PACKET_LEN: RegAddr = r(fw::BASE + 0x18);
    pub const PACKET_ORDER: RegAddr = r(fw::BASE + 0x19);
    pub const CLOCK_PHASE: RegAddr = r(fw::BASE + 0x1a);

    /// 32-bit pad enable for the TS pins.
    pub const OUTPUT: RegAddr = r(0x13_0420);
    pub const OUTPUT_ENABLE: u32 = 0;

    pub const PARALLEL: u8 = 0;
    pub const CLOCK_RISING: u8 = 1;
    pub const CONTINUOUS_ENABLE: u8 = 1;
    pub const SERIAL_PIN_DATA0: u8 = 0;
    pub const MSB_FIRST: u8 = 1;
    pub const SYNC_1_PULSE: u8 = 0;
    pub const POLARITY_NORMAL: u8 = 0;
    pub const PACKET_188: u8 = 0;
    pub const ORDER_NORMAL: u8 = 0;
    pub const PHASE_0: u8 = 0;
}

/// Embedded CPU status block.
pub mod cpu {
    use super::*;

    pub const BASE: u32 = 0x0a0;
    /// Holds [`BOOT_SIGNATURE`] once the patched firmware is running.
    pub const READY_WORD: RegAddr = r(BASE);
    /// `major[31:24] minor[23:16] build[15:0]`
    pub const PATCH_VERSION: RegAddr = r(BASE + 0x04);
    /// 16-bit RF AGC level.
    pub const RF_AGC: RegAddr = r(BASE + 0x08);

    pub const BOOT_SIGNATURE: u32 = 0x5aa5_7ff7;
}

/// Hardware control registers.
pub mod hw {
    use super::*;

    /// Held at 1 while the PLLs are reprogrammed.
    pub const BOOT_STRAP: RegAddr = r(0x11_0010);
    pub const DMA_STATUS: RegAddr = r(0x11_0048);
    pub const DMA_READY: u32 = 0x01;
    /// Writing a destination address here starts a hardware DMA.
    pub const DMA_TRIGGER: RegAddr = r(0x11_0050);
    /// 1 holds the embedded CPU in reset.
    pub const CPU_RESET: RegAddr = r(0x11_0840);
    pub const TMP_TOP_VALID: RegAddr = r(0x29_a648);
}

/// Clock generation block.
pub mod pll {
    use super::*;

    pub const SYS_BASE: u32 = 0x10_0000;
    pub const MPEG_BASE: u32 = 0x10_0040;
    pub const ADC_BASE: u32 = 0x10_0080;

    pub const DIVR: u32 = 0x00;
    pub const DIVF: u32 = 0x04;
    pub const DIVQ: u32 = 0x08;
    pub const RANGE: u32 = 0x0c;
    pub const DIVQ2: u32 = 0x14;
    pub const DIVQ3: u32 = 0x18;
    pub const ENABLE2: u32 = 0x1c;
    pub const ENABLE3: u32 = 0x20;

    pub const RESET: RegAddr = r(0x10_0c00);
    pub const DLL_OUT_PHASE: RegAddr = r(0x10_0c40);
    pub const DLL_RD_PHASE: RegAddr = r(0x10_0c44);
    pub const DEGLITCH_MODE: RegAddr = r(0x10_0c48);
    pub const DLL_INIT: RegAddr = r(0x10_0c4c);
}

/// Per-standard configuration (`rc`) and status (`rs`) blocks.
pub mod dvbc {
    use super::*;

    pub const STATUS_BASE: u32 = 0x400;
    pub const CONFIG_BASE: u32 = 0x600;

    pub const MODE_STATUS: RegAddr = r(STATUS_BASE);
    pub const SNR_DB_X100: RegAddr = r(STATUS_BASE + 0x0c);
    pub const POST_VITERBI_BER: RegAddr = r(STATUS_BASE + 0x10);
    /// `MODE_STATUS & 0xff` once locked.
    pub const LOCKED: u32 = 0x15;

    pub const DMD_CLK_HZ: RegAddr = r(CONFIG_BASE);
    pub const FEC_CLK_HZ: RegAddr = r(CONFIG_BASE + 0x04);
    pub const IF_FREQ_HZ: RegAddr = r(CONFIG_BASE + 0x08);
    pub const SYMBOL_RATE_HZ: RegAddr = r(CONFIG_BASE + 0x0c);
    pub const SAMPLE_RATE_HZ: RegAddr = r(CONFIG_BASE + 0x10);
    pub const QAM_MODE_SCAN_CONTROL: RegAddr = r(CONFIG_BASE + 0x14);
    pub const RFAGC_POL: RegAddr = r(CONFIG_BASE + 0x18);
    pub const ADC_SEL: RegAddr = r(CONFIG_BASE + 0x19);
    pub const J83B_MODE: RegAddr = r(CONFIG_BASE + 0x1a);
    pub const INPUT_FORMAT: RegAddr = r(CONFIG_BASE + 0x1b);
    pub const INPUT_SELECT: RegAddr = r(CONFIG_BASE + 0x1c);
    pub const TUNER_TYPE: RegAddr = r(CONFIG_BASE + 0x1d);
    pub const ADC_USE_PLL_CLK: RegAddr = r(CONFIG_BASE + 0x1e);
}

pub mod dvbt {
    use super::*;

    pub const STATUS_BASE: u32 = 0x800;
    pub const CONFIG_BASE: u32 = 0xa00;

    pub const FEC_LOCK: RegAddr = r(STATUS_BASE);
    pub const SNR_DB_X100: RegAddr = r(STATUS_BASE + 0x02);
    pub const POST_VITERBI_BER: RegAddr = r(STATUS_BASE + 0x04);
    pub const POST_LDPC_BER: RegAddr = r(STATUS_BASE + 0x08);

    pub const SAMPLE_RATE_HZ: RegAddr = r(CONFIG_BASE);
    pub const MPEG_CLK_RATE_HZ: RegAddr = r(CONFIG_BASE + 0x04);
    pub const NOM_CARRIER_FREQ_HZ: RegAddr = r(CONFIG_BASE + 0x08);
    pub const FUND_RATE_HZ: RegAddr = r(CONFIG_BASE + 0x0c);
    pub const INPUT_FORMAT: RegAddr = r(CONFIG_BASE + 0x10);
    pub const INPUT_SELECT: RegAddr = r(CONFIG_BASE + 0x11);
    pub const TUNER_TYPE: RegAddr = r(CONFIG_BASE + 0x12);
    pub const RF_AGC_POL: RegAddr = r(CONFIG_BASE + 0x13);
    pub const ADC_SEL: RegAddr = r(CONFIG_BASE + 0x14);
    pub const ADC_USE_PLL_CLK: RegAddr = r(CONFIG_BASE + 0x15);
    pub const L1_PROC_ONLY: RegAddr = r(CONFIG_BASE + 0x16);
    pub const SPECTRUM_INVERT: RegAddr = r(CONFIG_BASE + 0x17);
    pub const ACQUIRE_MODE: RegAddr = r(CONFIG_BASE + 0x18);
    pub const LAYER_SELECT: RegAddr = r(CONFIG_BASE + 0x19);
    pub const DATA_PLP_ID: RegAddr = r(CONFIG_BASE + 0x1a);
    pub const COMMON_PLP_ID: RegAddr = r(CONFIG_BASE + 0x1b);
    pub const COMMON_PLP_PRESENT: RegAddr = r(CONFIG_BASE + 0x1c);
}

pub mod dvbs {
    use super::*;

    pub const STATUS_BASE: u32 = 0xc00;
    pub const CONFIG_BASE: u32 = 0xe00;

    pub const FEC_LOCK: RegAddr = r(STATUS_BASE);
    pub const SNR_DB: RegAddr = r(STATUS_BASE + 0x04);
    pub const POST_VITERBI_BER: RegAddr = r(STATUS_BASE + 0x08);
    pub const POST_LDPC_BER: RegAddr = r(STATUS_BASE + 0x0c);

    pub const INT_SYM_RATE: RegAddr = r(CONFIG_BASE);
    pub const RFAGC_POL: RegAddr = r(CONFIG_BASE + 0x04);
    pub const FORMAT: RegAddr = r(CONFIG_BASE + 0x08);
    pub const INPUT: RegAddr = r(CONFIG_BASE + 0x0c);
    pub const MPEG_CLK_MHZ: RegAddr = r(CONFIG_BASE + 0x10);
    pub const FEC_CLK_MHZ: RegAddr = r(CONFIG_BASE + 0x12);
    pub const ADC_CLK_MHZ: RegAddr = r(CONFIG_BASE + 0x14);
    pub const DMD_CLK_MHZ: RegAddr = r(CONFIG_BASE + 0x16);
    pub const IF_OFFSET_10KHZ: RegAddr = r(CONFIG_BASE + 0x18);
    pub const DECODE_MODE: RegAddr = r(CONFIG_BASE + 0x1a);
    pub const FEC_BYPASS_CODERATE: RegAddr = r(CONFIG_BASE + 0x1c);
    pub const IQ_MODE: RegAddr = r(CONFIG_BASE + 0x1e);
}

/// GPIO pads driving the LNB supply and the AGC outputs.
pub mod gpio {
    use super::*;

    pub const BASE: u32 = 0x11_4000;
    pub const AGC_DVBS: RegAddr = r(BASE + 0x10);
    pub const AGC_DVBTC: RegAddr = r(BASE + 0x14);
    pub const LNB_VOLTAGE: RegAddr = r(BASE + 0x18);
    pub const LNB_POWER: RegAddr = r(BASE + 0x1c);

    pub const LOW: u32 = 0;
    pub const HIGH: u32 = 1;
    pub const HIGH_Z: u32 = 2;
    /// Route the AGC pad to the demodulator.
    pub const AGC_ON: u32 = 6;
}

/// DiSEqC 22 kHz modulator and receiver.
pub mod diseqc {
    use super::*;

    pub const BASE: u32 = 0x16_c000;
    /// ```text
    /// [11:10] continuous tone on
    /// [9:8]   preserved across init
    /// [7:6]   tx gap
    /// [5]     tx fifo reset
    /// [4]     tx waveform
    /// [3]     tx gap enable
    /// [2]     start fifo transmit
    /// [1:0]   tx mode
    /// ```
    pub const TX_CNTRL: RegAddr = r(BASE + 0x00);
    pub const TONE_FRAC_N: RegAddr = r(BASE + 0x04);
    pub const TONE_FRAC_D: RegAddr = r(BASE + 0x08);
    /// `done[6] fifo_count[5:2]`
    pub const TX_ST: RegAddr = r(BASE + 0x0c);
    pub const RX_MSG_TIM: RegAddr = r(BASE + 0x18);
    pub const RX_CNTRL: RegAddr = r(BASE + 0x1c);
    pub const SRST: RegAddr = r(BASE + 0x20);
    pub const SAMP_FRAC_N: RegAddr = r(BASE + 0x28);
    pub const SAMP_FRAC_D: RegAddr = r(BASE + 0x2c);
    /// One byte per 32-bit write.
    pub const TX_FIFO_MAP: RegAddr = r(BASE + 0x40);

    pub const TONE_MODE_MASK: u32 = 0x7;
    pub const MODE_MODULATION: u32 = 0x0;
    pub const MODE_TONE_A: u32 = 0x1;
    pub const MODE_TONE_B: u32 = 0x2;
    pub const TONE_CONTINUOUS: u32 = 0x3;
    pub const TX_START: u32 = 1 << 2;
    pub const TX_GAP_ENABLE: u32 = 1 << 3;
    pub const TX_FIFO_RESET: u32 = 1 << 5;
    pub const TX_KEEP: u32 = 0x0000_0300;
    pub const TONE_ON: u32 = 1 << 10;
    pub const TONE_CLEAR: u32 = 0x0000_0c00;

    pub const TX_DONE: u32 = 1 << 6;

    pub const RX_FIFO_RESET: u32 = 1 << 0;
    pub const RX_ENABLE: u32 = 1 << 1;
    /// Envelope high while a tone is present.
    pub const RX_ENVELOPE_HIGH: u32 = 1 << 3;
}

pub mod tuner_i2c {
    use super::*;

    pub const BASE: u32 = 0x11_8000;
    pub const SRST: RegAddr = r(BASE);
    pub const BIT_RPT_CNTRL: RegAddr = r(BASE + 0x04);
    pub const CNTRL: RegAddr = r(BASE + 0x08);
    pub const BIT_RPT_CLK_DIV: RegAddr = r(BASE + 0x0c);

    pub const REPEATER_ON: u32 = 0x07;
    pub const REPEATER_OFF: u32 = 0x06;
    /// Repeater bit clock divider for a 250 MHz core clock.
    pub const CLK_DIV: u32 = 0x2a * 250_000 / 240_000;
}

/// Error statistics monitor.
pub mod esm {
    use super::*;

    pub const BASE: u32 = 0x13_2050;
    pub const CNTRL: RegAddr = r(BASE);
    pub const MODE: RegAddr = r(BASE + 0x04);
    pub const TICK_TYPE: RegAddr = r(BASE + 0x08);
    pub const TIME_TICK_LOW: RegAddr = r(BASE + 0x0c);
    pub const TIME_TICK_HIGH: RegAddr = r(BASE + 0x10);
    pub const BYTE_TICK_LOW: RegAddr = r(BASE + 0x14);
    pub const BYTE_TICK_HIGH: RegAddr = r(BASE + 0x18);
    pub const TICK_CLEAR: RegAddr = r(BASE + 0x1c);

    pub const MODE_AUTO: u32 = 1;
    pub const TICK_TIME: u32 = 1;
    /// Ticks per millisecond of the 270 MHz counter clock.
    pub const TICKS_PER_MS: u64 = 270_000;

    pub const CNTRL_RESET: u32 = 0x1;
    pub const CNTRL_PER_ENABLE: u32 = 0x8;
}

/// Commands understood by the demodulator firmware at [`fw::COMMAND`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
pub enum FwCommand {
    Idle = 0,
    LdDefault = 1,
    Acquire = 2,
    Halt = 3,
    Debug = 4,
    Sleep = 7,
    Wake = 8,
    BlindScan = 9,
    SdramTest = 10,
    InitSdram = 11,
    InitAdc = 12,
    ChangeMode = 13,
    Dma = 21,
    CalcCrc = 22,
    Ping = 23,
    Decompress = 24,
}

/// Contents of [`fw::ACTIVE_MODE`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::FromRepr)]
pub enum DemodMode {
    Dvbc = 0,
    Dvbsx = 1,
    Dvbtx = 2,
}

/// Values written into the per-standard config blocks.
pub mod values {
    pub const AGC_NORMAL: u32 = 0;
    pub const AGC_INVERTED: u32 = 1;
    pub const OFFBIN: u32 = 0;
    pub const ADC_IN: u32 = 0;
    pub const IF_Q: u32 = 1;
    pub const DVBC_IF: u32 = 0;
    pub const DVBC_J83A: u32 = 0;
    pub const DVBC_J83B: u32 = 1;
    pub const DVBTX_REAL_IF: u32 = 0;
    pub const SPECTRUM_AUTO: u32 = 2;
    pub const DVBTX_LOCK_ALL: u32 = 0;
    pub const DVBTX_LOCK_T_ONLY: u32 = 1;
}
