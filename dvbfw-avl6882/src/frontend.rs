//! Demodulator front end: mode switching, acquisition and status.

use dvbfw_io::{Session, Transport};
use tracing::{debug, info, instrument, warn};

use crate::{
    Error, Result, Sticky,
    boot::{DeliverySystem, Family, PatchSet, PatchVersion, load_firmware},
    config::BootConfig,
    protocol,
    registers::{
        DemodMode, FwCommand, cpu, diseqc, dvbc, dvbs, dvbt, esm, fw, gpio, ts, tuner_i2c, values,
    },
    sec::{self, MiniCmd},
};

bitflags::bitflags! {
    /// Same bit values as the Linux DVB `fe_status`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FeStatus: u32 {
        const SIGNAL = 0x01;
        const CARRIER = 0x02;
        const VITERBI = 0x04;
        const SYNC = 0x08;
        const LOCK = 0x10;
    }
}

/// Carrier-to-noise estimate, only available with lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cnr {
    /// 0.001 dB units.
    pub milli_db: u32,
    /// 0..=0xffff
    pub relative: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalStats {
    /// Negated RF AGC level.
    pub strength_db: i32,
    pub strength_relative: u32,
    pub cnr: Option<Cnr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Voltage {
    Off,
    V13,
    V18,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Tone {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TuneParams {
    pub system: DeliverySystem,
    pub frequency_hz: u32,
    pub symbol_rate: u32,
    pub bandwidth_hz: u32,
    /// DVB-T2 data PLP.
    pub stream_id: u8,
}

pub const NO_BER: u32 = 100_000_000;

/// Window of the automatic error counter.
const ERROR_STAT_WINDOW_MS: u32 = 3000;

/// DVB-T fundamental rate for a channel bandwidth.
pub fn fund_rate_hz(bandwidth_hz: u32) -> u32 {
    match bandwidth_hz {
        ..=1_700_000 => 1_845_070,
        ..=5_000_000 => 5_714_285,
        ..=6_000_000 => 6_857_143,
        ..=7_000_000 => 8_000_000,
        _ => 9_142_857,
    }
}

pub struct Demod<T> {
    session: Session<T>,
    patches: PatchSet,
    config: BootConfig,
    /// Firmware mode currently loaded.
    mode: Option<DeliverySystem>,
    /// System of the last acquisition.
    tuned: Option<DeliverySystem>,
    version: Option<PatchVersion>,
}

impl<T: Transport> Demod<T> {
    pub fn new(session: Session<T>, patches: PatchSet, config: BootConfig) -> Self {
        Self {
            session,
            patches,
            config,
            mode: None,
            tuned: None,
            version: None,
        }
    }

    pub fn session(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    pub fn mode(&self) -> Option<DeliverySystem> {
        self.mode
    }

    pub fn patch_version(&self) -> Option<PatchVersion> {
        self.version
    }

    /// Load the firmware serving `system` and run its default init.
    ///
    /// Does nothing when that firmware is already running.
    #[instrument(skip(self))]
    pub fn set_mode(&mut self, system: DeliverySystem) -> Result<()> {
        let system = system.firmware_mode();
        if self.mode == Some(system) {
            return Ok(());
        }
        self.mode = None;
        self.tuned = None;

        let version = load_firmware(&mut self.session, &self.patches, system, &self.config)?;
        self.version = Some(version);

        let poll = self.config.command_poll;
        let mut sticky = Sticky::new();
        for cmd in [FwCommand::LdDefault, FwCommand::InitSdram, FwCommand::InitAdc] {
            sticky.record(protocol::exec(&mut self.session, cmd, poll));
        }
        match system {
            DeliverySystem::DvbcAnnexA => self.init_dvbc(&mut sticky, values::DVBC_J83A),
            DeliverySystem::DvbcAnnexB => self.init_dvbc(&mut sticky, values::DVBC_J83B),
            DeliverySystem::Dvbs | DeliverySystem::Dvbs2 => self.init_dvbs(&mut sticky),
            DeliverySystem::Dvbt | DeliverySystem::Dvbt2 => self.init_dvbt(&mut sticky),
        }

        // LNB off, 13 V
        sticky.record(self.session.write_u32(gpio::LNB_POWER, gpio::HIGH));
        sticky.record(self.session.write_u32(gpio::LNB_VOLTAGE, gpio::LOW));

        self.init_ts_output(&mut sticky);
        self.init_tuner_repeater(&mut sticky);
        self.init_error_stats(&mut sticky);

        if let Err(e) = sticky.finish() {
            warn!(error = %e, "demod init failed");
            return Err(e);
        }
        info!(%system, "demod mode set");
        self.mode = Some(system);
        Ok(())
    }

    fn init_dvbc(&mut self, sticky: &mut Sticky, j83: u32) {
        let symbol_rate = if j83 == values::DVBC_J83B {
            5_360_000
        } else {
            6_875_000
        };
        let s = &mut self.session;
        sticky.record(s.write_u32(dvbc::DMD_CLK_HZ, 250_000_000));
        sticky.record(s.write_u32(dvbc::FEC_CLK_HZ, 250_000_000));
        sticky.record(s.write_u8(dvbc::RFAGC_POL, values::AGC_NORMAL as u8));
        sticky.record(s.write_u32(dvbc::IF_FREQ_HZ, 5_000_000));
        sticky.record(s.write_u8(dvbc::ADC_SEL, values::IF_Q as u8));
        sticky.record(s.write_u32(dvbc::SYMBOL_RATE_HZ, symbol_rate));
        sticky.record(s.write_u8(dvbc::J83B_MODE, j83 as u8));
        sticky.record(s.write_u8(dvbc::INPUT_FORMAT, values::ADC_IN as u8));
        sticky.record(s.write_u8(dvbc::INPUT_SELECT, values::OFFBIN as u8));
        sticky.record(s.write_u8(dvbc::TUNER_TYPE, values::DVBC_IF as u8));
        sticky.record(s.write_u8(dvbc::ADC_USE_PLL_CLK, 0));
        sticky.record(s.write_u32(dvbc::SAMPLE_RATE_HZ, 30_000_000));
        sticky.record(s.write_u32(gpio::AGC_DVBTC, gpio::AGC_ON));
    }

    fn init_dvbs(&mut self, sticky: &mut Sticky) {
        let s = &mut self.session;
        sticky.record(s.write_u16(dvbs::MPEG_CLK_MHZ, 27_000));
        sticky.record(s.write_u16(dvbs::FEC_CLK_MHZ, 25_000));
        sticky.record(s.write_u16(dvbs::ADC_CLK_MHZ, 12_500));
        sticky.record(s.write_u16(dvbs::DMD_CLK_MHZ, 16_666));
        sticky.record(s.write_u32(dvbs::RFAGC_POL, values::AGC_INVERTED));
        sticky.record(s.write_u32(dvbs::FORMAT, values::OFFBIN));
        sticky.record(s.write_u32(dvbs::INPUT, values::ADC_IN));
        sticky.record(s.write_u16(dvbs::IF_OFFSET_10KHZ, 0));
        sticky.record(s.write_u32(gpio::AGC_DVBS, gpio::AGC_ON));
        sticky.record(sec::init(s));
    }

    fn init_dvbt(&mut self, sticky: &mut Sticky) {
        let s = &mut self.session;
        sticky.record(s.write_u32(dvbt::SAMPLE_RATE_HZ, 30_000_000));
        sticky.record(s.write_u32(dvbt::MPEG_CLK_RATE_HZ, 270_000_000));
        sticky.record(s.write_u8(dvbt::INPUT_FORMAT, values::OFFBIN as u8));
        sticky.record(s.write_u8(dvbt::INPUT_SELECT, values::ADC_IN as u8));
        sticky.record(s.write_u8(dvbt::TUNER_TYPE, values::DVBTX_REAL_IF as u8));
        sticky.record(s.write_u8(dvbt::RF_AGC_POL, 0));
        sticky.record(s.write_u32(dvbt::NOM_CARRIER_FREQ_HZ, 5_000_000));
        sticky.record(s.write_u8(dvbt::ADC_SEL, values::IF_Q as u8));
        sticky.record(s.write_u8(dvbt::ADC_USE_PLL_CLK, 0));
        sticky.record(s.write_u32(gpio::AGC_DVBTC, gpio::AGC_ON));
    }

    /// Parallel 188-byte TS with a rising-edge clock, then enable the pads.
    fn init_ts_output(&mut self, sticky: &mut Sticky) {
        let s = &mut self.session;
        for (reg, value) in [
            (ts::SERIAL, ts::PARALLEL),
            (ts::CLOCK_EDGE, ts::CLOCK_RISING),
            (ts::CONTINUOUS, ts::CONTINUOUS_ENABLE),
            (ts::SERIAL_OUTPIN, ts::SERIAL_PIN_DATA0),
            (ts::SERIAL_MSB, ts::MSB_FIRST),
            (ts::SYNC_PULSE, ts::SYNC_1_PULSE),
            (ts::ERROR_POLARITY, ts::POLARITY_NORMAL),
            (ts::VALID_POLARITY, ts::POLARITY_NORMAL),
            (ts::PACKET_LEN, ts::PACKET_188),
            (ts::PACKET_ORDER, ts::ORDER_NORMAL),
            (ts::CLOCK_PHASE, ts::PHASE_0),
        ] {
            sticky.record(s.write_u8(reg, value));
        }
        sticky.record(s.write_u32(ts::OUTPUT, ts::OUTPUT_ENABLE));
    }

    /// Reset the tuner I2C repeater with the gate closed.
    fn init_tuner_repeater(&mut self, sticky: &mut Sticky) {
        let s = &mut self.session;
        sticky.record(s.write_u32(tuner_i2c::SRST, 1));
        sticky.record(s.write_u32(tuner_i2c::BIT_RPT_CNTRL, tuner_i2c::REPEATER_OFF));
        if let Some(cntrl) = sticky.record(s.read_u32(tuner_i2c::CNTRL)) {
            sticky.record(s.write_u32(tuner_i2c::CNTRL, cntrl & !1));
        }
        sticky.record(s.write_u32(tuner_i2c::BIT_RPT_CLK_DIV, tuner_i2c::CLK_DIV));
        sticky.record(s.write_u32(tuner_i2c::SRST, 0));
    }

    /// Time-based automatic error counting, then a PER counter reset.
    fn init_error_stats(&mut self, sticky: &mut Sticky) {
        let s = &mut self.session;
        let ticks = esm::TICKS_PER_MS * u64::from(ERROR_STAT_WINDOW_MS);
        sticky.record(s.write_u32(esm::MODE, esm::MODE_AUTO));
        sticky.record(s.write_u32(esm::TICK_TYPE, esm::TICK_TIME));
        sticky.record(s.write_u32(esm::TIME_TICK_LOW, ticks as u32));
        sticky.record(s.write_u32(esm::TIME_TICK_HIGH, (ticks >> 32) as u32));
        sticky.record(s.write_u32(esm::BYTE_TICK_LOW, 0));
        sticky.record(s.write_u32(esm::BYTE_TICK_HIGH, 0));
        for clear in [0, 1, 0] {
            sticky.record(s.write_u32(esm::TICK_CLEAR, clear));
        }

        if let Some(cntrl) = sticky.record(s.read_u32(esm::CNTRL)) {
            sticky.record(s.write_u32(esm::CNTRL, cntrl | esm::CNTRL_RESET));
        }
        if let Some(cntrl) = sticky.record(s.read_u32(esm::CNTRL)) {
            let cntrl = cntrl | esm::CNTRL_PER_ENABLE;
            sticky.record(s.write_u32(esm::CNTRL, cntrl));
            sticky.record(s.write_u32(esm::CNTRL, cntrl | esm::CNTRL_RESET));
            sticky.record(s.write_u32(esm::CNTRL, cntrl & !esm::CNTRL_RESET));
        }
    }

    /// Program acquisition for `params` and start it.
    ///
    /// DVB-C below 6 MS/s is retuned as annex B with a 6 MHz channel, and
    /// `params` is updated to match.
    #[instrument(skip_all, fields(system = %params.system, freq = params.frequency_hz))]
    pub fn set_frontend(&mut self, params: &mut TuneParams) -> Result<()> {
        let mut active = self.session.read_u32(fw::ACTIVE_MODE)?;

        if params.system == DeliverySystem::DvbcAnnexA && params.symbol_rate < 6_000_000 {
            debug!(symbol_rate = params.symbol_rate, "low symbol rate, using annex B");
            params.system = DeliverySystem::DvbcAnnexB;
            params.bandwidth_hz = 6_000_000;
        }

        // DVB-C reads the same as a zeroed register, so the mode register
        // alone cannot tell whether firmware was ever loaded.
        let wanted = params.system.family().demod_mode();
        let loaded = self.mode == Some(params.system.firmware_mode());
        if !loaded || active != wanted as u32 {
            if active != wanted as u32 {
                self.mode = None;
            }
            self.set_mode(params.system)?;
            active = self.session.read_u32(fw::ACTIVE_MODE)?;
        }
        if active != wanted as u32 {
            return Err(Error::ModeNotEntered {
                wanted,
                actual: active,
            });
        }

        let mut sticky = Sticky::new();
        match params.system {
            DeliverySystem::DvbcAnnexA | DeliverySystem::DvbcAnnexB => {
                let j83 = match params.system {
                    DeliverySystem::DvbcAnnexB => values::DVBC_J83B,
                    _ => values::DVBC_J83A,
                };
                let s = &mut self.session;
                sticky.record(s.write_u32(dvbc::QAM_MODE_SCAN_CONTROL, 0x0101));
                sticky.record(s.write_u32(dvbc::SYMBOL_RATE_HZ, params.symbol_rate));
                sticky.record(s.write_u8(dvbc::J83B_MODE, j83 as u8));
            }
            DeliverySystem::Dvbs | DeliverySystem::Dvbs2 => {
                let s = &mut self.session;
                sticky.record(s.write_u16(dvbs::FEC_LOCK, 0));
                sticky.record(s.write_u16(dvbs::DECODE_MODE, 0x14));
                // auto code rate, automatic spectrum inversion
                sticky.record(s.write_u16(dvbs::FEC_BYPASS_CODERATE, 0));
                sticky.record(s.write_u16(dvbs::IQ_MODE, 1));
                sticky.record(s.write_u16(dvbs::DECODE_MODE, 0x14));
                sticky.record(s.write_u16(dvbs::FEC_BYPASS_CODERATE, 0));
                sticky.record(s.write_u32(dvbs::INT_SYM_RATE, params.symbol_rate));
            }
            DeliverySystem::Dvbt | DeliverySystem::Dvbt2 => {
                let s = &mut self.session;
                sticky.record(s.write_u32(dvbt::FUND_RATE_HZ, fund_rate_hz(params.bandwidth_hz)));
                sticky.record(s.write_u8(dvbt::L1_PROC_ONLY, 0));
                sticky.record(s.write_u8(dvbt::SPECTRUM_INVERT, values::SPECTRUM_AUTO as u8));
                if params.system == DeliverySystem::Dvbt {
                    sticky.record(s.write_u8(dvbt::ACQUIRE_MODE, values::DVBTX_LOCK_T_ONLY as u8));
                    sticky.record(s.write_u8(dvbt::LAYER_SELECT, 0));
                    sticky.record(s.write_u8(dvbt::DATA_PLP_ID, 0));
                    sticky.record(s.write_u8(dvbt::COMMON_PLP_ID, 0));
                    sticky.record(s.write_u8(dvbt::COMMON_PLP_PRESENT, 0));
                } else {
                    sticky.record(s.write_u8(dvbt::ACQUIRE_MODE, values::DVBTX_LOCK_ALL as u8));
                    sticky.record(s.write_u8(dvbt::DATA_PLP_ID, params.stream_id));
                    sticky.record(s.write_u8(dvbt::COMMON_PLP_ID, 0));
                    sticky.record(s.write_u8(dvbt::COMMON_PLP_PRESENT, 2));
                }
            }
        }
        sticky.record(protocol::exec(
            &mut self.session,
            FwCommand::Acquire,
            self.config.command_poll,
        ));
        sticky.finish()?;
        self.tuned = Some(params.system);
        Ok(())
    }

    fn family(&self) -> Option<Family> {
        self.tuned.or(self.mode).map(DeliverySystem::family)
    }

    /// Lock state and signal figures of the running firmware.
    pub fn read_status(&mut self) -> Result<(FeStatus, SignalStats)> {
        let Some(family) = self.family() else {
            return Ok((FeStatus::empty(), SignalStats::default()));
        };
        let s = &mut self.session;
        let (locked, snr, mul) = match family {
            Family::Cable => {
                let locked = s.read_u32(dvbc::MODE_STATUS)? & 0xff == dvbc::LOCKED;
                let snr = if locked {
                    s.read_u16(dvbc::SNR_DB_X100)?.into()
                } else {
                    0
                };
                (locked, snr, 131)
            }
            Family::Satellite => {
                let locked = s.read_u16(dvbs::FEC_LOCK)? != 0;
                let snr = if locked { s.read_u32(dvbs::SNR_DB)? } else { 0 };
                (locked, if snr > 10_000 { 0 } else { snr }, 328)
            }
            Family::Terrestrial => {
                let locked = s.read_u8(dvbt::FEC_LOCK)? != 0;
                let snr = if locked {
                    s.read_u16(dvbt::SNR_DB_X100)?.into()
                } else {
                    0
                };
                (locked, snr, 131)
            }
        };

        let agc = u32::from(s.read_u16(cpu::RF_AGC)?);
        let mut status = FeStatus::SIGNAL;
        let mut stats = SignalStats {
            strength_db: -(agc as i32),
            strength_relative: 100u32.saturating_sub(agc / 1000) * 656,
            cnr: None,
        };
        if locked {
            status |= FeStatus::CARRIER | FeStatus::VITERBI | FeStatus::SYNC | FeStatus::LOCK;
            stats.cnr = Some(Cnr {
                milli_db: snr * 10,
                relative: ((snr / 10) * mul).min(0xffff) as u16,
            });
        }
        Ok((status, stats))
    }

    /// Bit error rate estimate, scaled by 10^7. Reads as [`NO_BER`] before
    /// any firmware is running.
    pub fn read_ber(&mut self) -> Result<u32> {
        let Some(system) = self.tuned.or(self.mode) else {
            return Ok(NO_BER);
        };
        let s = &mut self.session;
        Ok(match system {
            DeliverySystem::DvbcAnnexA | DeliverySystem::DvbcAnnexB => {
                s.read_u32(dvbc::POST_VITERBI_BER)?
            }
            DeliverySystem::Dvbs => s.read_u32(dvbs::POST_VITERBI_BER)?,
            DeliverySystem::Dvbs2 => s.read_u32(dvbs::POST_LDPC_BER)?,
            DeliverySystem::Dvbt => s.read_u32(dvbt::POST_VITERBI_BER)?,
            DeliverySystem::Dvbt2 => s.read_u32(dvbt::POST_LDPC_BER)? / 100,
        })
    }

    /// Switch the LNB supply. Enters satellite mode first.
    pub fn set_voltage(&mut self, voltage: Voltage) -> Result<()> {
        self.set_mode(DeliverySystem::Dvbs)?;
        let (power, level) = match voltage {
            Voltage::Off => (gpio::HIGH, gpio::LOW),
            Voltage::V13 => (gpio::LOW, gpio::LOW),
            Voltage::V18 => (gpio::LOW, gpio::HIGH_Z),
        };
        let mut sticky = Sticky::new();
        sticky.record(self.session.write_u32(gpio::LNB_POWER, power));
        sticky.record(self.session.write_u32(gpio::LNB_VOLTAGE, level));
        sticky.finish()
    }

    /// Continuous 22 kHz tone. Enters satellite mode first.
    pub fn set_tone(&mut self, tone: Tone) -> Result<()> {
        self.set_mode(DeliverySystem::Dvbs)?;
        let mut reg = self.session.read_u32(diseqc::TX_CNTRL)?;
        match tone {
            Tone::On => {
                reg &= !diseqc::TONE_MODE_MASK;
                reg |= diseqc::TONE_CONTINUOUS | diseqc::TONE_ON;
            }
            Tone::Off => reg &= !diseqc::TONE_CLEAR,
        }
        Ok(self.session.write_u32(diseqc::TX_CNTRL, reg)?)
    }

    /// Send a DiSEqC master command. Enters satellite mode first.
    pub fn send_diseqc(&mut self, msg: &[u8]) -> Result<()> {
        self.set_mode(DeliverySystem::Dvbs)?;
        sec::send_message(&mut self.session, msg, self.config.diseqc_poll)
    }

    /// Send a tone burst. Enters satellite mode first.
    pub fn send_burst(&mut self, cmd: MiniCmd) -> Result<()> {
        self.set_mode(DeliverySystem::Dvbs)?;
        sec::send_burst(&mut self.session, cmd, self.config.diseqc_poll)
    }

    /// Open or close the I2C repeater to the tuner.
    pub fn i2c_gate(&mut self, open: bool) -> Result<()> {
        debug!(open, "tuner gate");
        if open {
            // the repeater sometimes misses the first write
            self.session
                .write_u32(tuner_i2c::BIT_RPT_CNTRL, tuner_i2c::REPEATER_ON)?;
            self.session
                .write_u32(tuner_i2c::BIT_RPT_CNTRL, tuner_i2c::REPEATER_ON)?;
        } else {
            self.session
                .write_u32(tuner_i2c::BIT_RPT_CNTRL, tuner_i2c::REPEATER_OFF)?;
        }
        Ok(())
    }
}
