//! DiSEqC signalling to the satellite equipment on the LNB line.
//!
//! Messages and tone bursts are loaded into the modulator FIFO one byte per
//! register write and sent in one go. A running continuous 22 kHz tone is
//! paused around the transmission and restored afterwards.

use std::time::Duration;

use dvbfw_io::{Session, ShortHex, Transport};
use tracing::{debug, instrument, trace};

use crate::{Error, Result, Sticky, config::PollConfig, registers::diseqc};

/// Depth of the transmit FIFO.
pub const MAX_MESSAGE_LEN: usize = 8;

/// Quiet time after stopping the continuous tone and after a transmission.
const GUARD: Duration = Duration::from_millis(20);

const TONE_KHZ: u32 = 22;
const DDC_HZ: u32 = 166_666_667;
/// 200 × 10 kHz.
const SAMPLE_HZ: u32 = 2_000_000;
/// Pulses in a tone burst.
const BURST_PULSES: usize = 2;

/// Tone burst (mini DiSEqC) selecting satellite A or B.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, clap::ValueEnum)]
pub enum MiniCmd {
    A,
    B,
}

impl MiniCmd {
    fn tx_mode(self) -> u32 {
        match self {
            MiniCmd::A => diseqc::MODE_TONE_A,
            MiniCmd::B => diseqc::MODE_TONE_B,
        }
    }
}

/// Set up the modulator for 22 kHz signalling: 15 ms gap between messages,
/// normal waveforms and a 150 ms receive timeout.
pub fn init<T: Transport>(session: &mut Session<T>) -> Result<()> {
    let mut sticky = Sticky::new();
    sticky.record(session.write_u32(diseqc::SRST, 1));

    sticky.record(session.write_u32(diseqc::SAMP_FRAC_N, SAMPLE_HZ));
    sticky.record(session.write_u32(diseqc::SAMP_FRAC_D, DDC_HZ));
    sticky.record(session.write_u32(diseqc::TONE_FRAC_N, TONE_KHZ << 1));
    sticky.record(session.write_u32(diseqc::TONE_FRAC_D, DDC_HZ / 1000));

    let keep = sticky.record(session.read_u32(diseqc::TX_CNTRL)).unwrap_or(0) & diseqc::TX_KEEP;
    let tx = keep | diseqc::TX_GAP_ENABLE;
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx | diseqc::TX_FIFO_RESET));
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx));

    sticky.record(session.write_u32(
        diseqc::RX_CNTRL,
        diseqc::RX_ENABLE | diseqc::RX_ENVELOPE_HIGH,
    ));
    sticky.record(session.write_u32(diseqc::RX_MSG_TIM, 0));

    sticky.record(session.write_u32(diseqc::SRST, 0));
    sticky.finish()
}

/// Send a DiSEqC master command of at most [`MAX_MESSAGE_LEN`] bytes.
#[instrument(skip(session, msg, poll), fields(msg = %ShortHex(msg)))]
pub fn send_message<T: Transport>(
    session: &mut Session<T>,
    msg: &[u8],
    poll: PollConfig,
) -> Result<()> {
    if msg.len() > MAX_MESSAGE_LEN {
        return Err(Error::DiseqcTooLong {
            len: msg.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    transmit(session, diseqc::MODE_MODULATION, msg, true, poll)
}

#[instrument(skip(session, poll))]
pub fn send_burst<T: Transport>(session: &mut Session<T>, cmd: MiniCmd, poll: PollConfig) -> Result<()> {
    transmit(session, cmd.tx_mode(), &[1; BURST_PULSES], false, poll)
}

fn transmit<T: Transport>(
    session: &mut Session<T>,
    mode: u32,
    fifo: &[u8],
    reset_rx: bool,
    poll: PollConfig,
) -> Result<()> {
    let mut sticky = Sticky::new();
    let tone = pause_tone(session, &mut sticky);

    if reset_rx {
        let rx = sticky.record(session.read_u32(diseqc::RX_CNTRL)).unwrap_or(0);
        sticky.record(session.write_u32(diseqc::RX_CNTRL, rx | diseqc::RX_FIFO_RESET));
        sticky.record(session.write_u32(diseqc::RX_CNTRL, rx & !diseqc::RX_FIFO_RESET));
    }

    let tx = sticky.record(session.read_u32(diseqc::TX_CNTRL)).unwrap_or(0);
    let tx = (tx & !diseqc::TONE_MODE_MASK) | mode;
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx));
    for &byte in fifo {
        sticky.record(session.write_u32(diseqc::TX_FIFO_MAP, byte.into()));
    }
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx | diseqc::TX_START));

    if sticky.record(wait_tx_done(session, poll)).is_none() {
        return sticky.finish();
    }
    session.delay(GUARD);

    if tone {
        resume_tone(session, &mut sticky);
    }
    sticky.finish()
}

/// Stop a running continuous tone. Returns whether one was running.
fn pause_tone<T: Transport>(session: &mut Session<T>, sticky: &mut Sticky) -> bool {
    let Some(tx) = sticky.record(session.read_u32(diseqc::TX_CNTRL)) else {
        return false;
    };
    if tx & diseqc::TONE_ON == 0 {
        return false;
    }
    debug!("pausing continuous tone");
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx & !diseqc::TONE_CLEAR));
    session.delay(GUARD);
    true
}

fn resume_tone<T: Transport>(session: &mut Session<T>, sticky: &mut Sticky) {
    let Some(tx) = sticky.record(session.read_u32(diseqc::TX_CNTRL)) else {
        return;
    };
    let tx = (tx & !diseqc::TONE_MODE_MASK) | diseqc::TONE_CONTINUOUS;
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx));
    sticky.record(session.write_u32(diseqc::TX_CNTRL, tx | diseqc::TONE_ON));
}

/// Poll the transmit status until the FIFO has drained.
fn wait_tx_done<T: Transport>(session: &mut Session<T>, poll: PollConfig) -> Result<()> {
    for attempt in 1..=poll.retries {
        session.delay(poll.interval());
        match session.read_u32(diseqc::TX_ST) {
            Ok(st) if st & diseqc::TX_DONE != 0 => return Ok(()),
            Ok(st) => trace!(attempt, st, "diseqc tx busy"),
            Err(e) => debug!(attempt, error = %e, "diseqc status read failed"),
        }
    }
    Err(Error::Timeout {
        addr: diseqc::TX_ST,
        polls: poll.retries,
    })
}

#[cfg(test)]
mod tests {
    use dvbfw_io::fake::FakeBus;

    use super::*;
    use crate::sim::{DiseqcTx, SimDemod};

    fn session(sim: SimDemod) -> Session<FakeBus<SimDemod>> {
        Session::new(FakeBus::new(sim))
    }

    fn word(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    #[test]
    fn init_programs_modulator() {
        let mut sim = SimDemod::new();
        sim.memory_mut().write_u32(diseqc::TX_CNTRL, 0x3ff);
        let mut session = session(sim);
        init(&mut session).unwrap();

        let bus = session.transport();
        assert_eq!(bus.writes_to(diseqc::SRST), [&word(1)[..], &word(0)[..]]);
        assert_eq!(
            bus.writes_to(diseqc::TX_CNTRL),
            [&word(0x328)[..], &word(0x308)[..]]
        );
        let mem = bus.peripheral().memory();
        assert_eq!(mem.read_u32(diseqc::TONE_FRAC_N), 44);
        assert_eq!(mem.read_u32(diseqc::TONE_FRAC_D), 166_666);
        assert_eq!(mem.read_u32(diseqc::SAMP_FRAC_D), 166_666_667);
        assert_eq!(mem.read_u32(diseqc::RX_CNTRL), 0x0a);
    }

    #[test]
    fn message_goes_out_through_fifo() {
        let mut session = session(SimDemod::new());
        let msg = [0xe0, 0x10, 0x38, 0xf0];
        send_message(&mut session, &msg, PollConfig::DISEQC).unwrap();

        let bus = session.transport();
        assert_eq!(
            bus.peripheral().diseqc_sent(),
            [DiseqcTx {
                mode: diseqc::MODE_MODULATION,
                data: msg.to_vec()
            }]
        );
        assert_eq!(
            bus.writes_to(diseqc::RX_CNTRL),
            [&word(1)[..], &word(0)[..]]
        );
        assert_eq!(bus.delays(), [Duration::from_millis(1), GUARD]);
    }

    #[test]
    fn oversize_message_is_rejected_before_any_traffic() {
        let mut session = session(SimDemod::new());
        let err = send_message(&mut session, &[0; 9], PollConfig::DISEQC).unwrap_err();
        assert!(matches!(err, Error::DiseqcTooLong { len: 9, max: 8 }));
        assert!(session.transport().transactions().is_empty());
    }

    #[test]
    fn burst_sends_tone_pulses() {
        let mut session = session(SimDemod::new());
        send_burst(&mut session, MiniCmd::B, PollConfig::DISEQC).unwrap();
        send_burst(&mut session, MiniCmd::A, PollConfig::DISEQC).unwrap();

        let bus = session.transport();
        assert_eq!(
            bus.peripheral().diseqc_sent(),
            [
                DiseqcTx {
                    mode: diseqc::MODE_TONE_B,
                    data: vec![1, 1]
                },
                DiseqcTx {
                    mode: diseqc::MODE_TONE_A,
                    data: vec![1, 1]
                },
            ]
        );
        // bursts leave the receiver alone
        assert!(bus.writes_to(diseqc::RX_CNTRL).is_empty());
    }

    #[test]
    fn continuous_tone_is_paused_and_restored() {
        let mut sim = SimDemod::new();
        let running = diseqc::TX_KEEP | diseqc::TONE_ON | diseqc::TONE_CONTINUOUS;
        sim.memory_mut().write_u32(diseqc::TX_CNTRL, running);
        let mut session = session(sim);
        send_message(&mut session, &[0xe0, 0x10, 0x00], PollConfig::DISEQC).unwrap();

        let bus = session.transport();
        assert_eq!(
            bus.writes_to(diseqc::TX_CNTRL),
            [
                &word(0x303)[..],
                &word(0x300)[..],
                &word(0x304)[..],
                &word(0x303)[..],
                &word(0x703)[..],
            ]
        );
        assert_eq!(bus.delays(), [GUARD, Duration::from_millis(1), GUARD]);
        assert_eq!(bus.peripheral().memory().read_u32(diseqc::TX_CNTRL), running);
    }

    #[test]
    fn stuck_transmitter_times_out() {
        let mut session = session(SimDemod::new().with_stuck_diseqc());
        let poll = PollConfig {
            retries: 3,
            interval_ms: 1,
        };
        let err = send_burst(&mut session, MiniCmd::A, poll).unwrap_err();
        assert!(matches!(err, Error::Timeout { polls: 3, .. }));
        assert_eq!(session.transport().reads_of(diseqc::TX_ST), 3);
        assert!(session.transport().peripheral().diseqc_sent().is_empty());
    }
}
