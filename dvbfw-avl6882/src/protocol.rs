//! Synchronous command protocol with the demodulator firmware.
//!
//! The firmware polls [`fw::COMMAND`]: the host posts a non-zero
//! [`FwCommand`] there and the firmware writes zero back once it has finished.
//! All waits are bounded polling loops.

use dvbfw_io::{Session, Transport};
use tracing::{debug, trace};

use crate::{
    Error, Result,
    config::PollConfig,
    registers::{FwCommand, cpu, fw, hw},
};

/// Poll until the command register reads zero.
///
/// The register is read up to `poll.retries` times with `poll.interval()`
/// between attempts. A failed read counts as a busy poll.
pub fn wait_idle<T: Transport>(session: &mut Session<T>, poll: PollConfig) -> Result<()> {
    for attempt in 1..=poll.retries {
        match session.read_u16(fw::COMMAND) {
            Ok(0) => return Ok(()),
            Ok(cmd) => trace!(attempt, cmd, "demod busy"),
            Err(e) => debug!(attempt, error = %e, "command register read failed"),
        }
        session.delay(poll.interval());
    }
    Err(Error::Timeout {
        addr: fw::COMMAND,
        polls: poll.retries,
    })
}

/// Post `cmd` and wait for the firmware to finish it.
///
/// Waits for any earlier command first, so a command is never posted over an
/// outstanding one.
pub fn exec<T: Transport>(session: &mut Session<T>, cmd: FwCommand, poll: PollConfig) -> Result<()> {
    debug!(%cmd, "firmware command");
    wait_idle(session, poll)?;
    session.write_u16(fw::COMMAND, cmd as u16)?;
    wait_idle(session, poll)
}

/// Poll until the CPU is out of reset and the patched firmware has published
/// [`cpu::BOOT_SIGNATURE`].
pub fn wait_boot<T: Transport>(session: &mut Session<T>, poll: PollConfig) -> Result<()> {
    for attempt in 1..=poll.retries {
        let status = session.read_u32(hw::CPU_RESET);
        let ready = session.read_u32(cpu::READY_WORD);
        match (status, ready) {
            (Ok(0), Ok(cpu::BOOT_SIGNATURE)) => return Ok(()),
            (status, ready) => trace!(attempt, ?status, ?ready, "demod not booted"),
        }
        session.delay(poll.interval());
    }
    Err(Error::Timeout {
        addr: cpu::READY_WORD,
        polls: poll.retries,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dvbfw_io::fake::{FakeBus, Memory};

    use super::*;
    use crate::sim::SimDemod;

    #[test]
    fn idle_returns_without_sleeping() {
        let mut session = Session::new(FakeBus::new(Memory::default()));
        wait_idle(&mut session, PollConfig::COMMAND).unwrap();
        assert_eq!(session.transport().reads_of(fw::COMMAND), 1);
        assert!(session.transport().delays().is_empty());
    }

    #[test]
    fn busy_times_out_after_exact_retries() {
        let mut mem = Memory::default();
        mem.write_u16(fw::COMMAND, FwCommand::Acquire as u16);
        let mut session = Session::new(FakeBus::new(mem));

        let poll = PollConfig {
            retries: 7,
            interval_ms: 5,
        };
        let err = wait_idle(&mut session, poll).unwrap_err();
        assert!(matches!(err, Error::Timeout { polls: 7, .. }));
        assert_eq!(session.transport().reads_of(fw::COMMAND), 7);
        assert_eq!(
            session.transport().delays(),
            [Duration::from_millis(5); 7]
        );
    }

    #[test]
    fn failed_reads_count_as_busy() {
        let mut session = Session::new(FakeBus::new(Memory::default()));
        session.transport_mut().short_read_at(fw::COMMAND);
        let err = wait_idle(&mut session, PollConfig::COMMAND).unwrap_err();
        assert!(matches!(err, Error::Timeout { polls: 10, .. }));
        assert_eq!(session.transport().delays().len(), 10);
    }

    #[test]
    fn exec_posts_between_waits() {
        let mut session = Session::new(FakeBus::new(SimDemod::new()));
        exec(&mut session, FwCommand::Ping, PollConfig::COMMAND).unwrap();

        let bus = session.transport();
        assert_eq!(bus.writes_to(fw::COMMAND), [&[0, FwCommand::Ping as u8][..]]);
        assert_eq!(bus.reads_of(fw::COMMAND), 2);
        assert_eq!(bus.peripheral().commands(), [FwCommand::Ping as u16]);
    }

    #[test]
    fn exec_does_not_post_over_busy_firmware() {
        let mut sim = SimDemod::new();
        sim.memory_mut().write_u16(fw::COMMAND, FwCommand::Acquire as u16);
        let mut session = Session::new(FakeBus::new(sim));

        let err = exec(&mut session, FwCommand::Ping, PollConfig::COMMAND).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(session.transport().writes_to(fw::COMMAND).is_empty());
    }

    #[test]
    fn exec_reports_write_failure() {
        let mut session = Session::new(FakeBus::new(SimDemod::new()));
        session.transport_mut().short_write_at(fw::COMMAND);
        let err = exec(&mut session, FwCommand::Ping, PollConfig::COMMAND).unwrap_err();
        assert!(matches!(err, Error::Io(dvbfw_io::Error::ShortWrite { .. })));
    }

    #[test]
    fn boot_wait_needs_signature_and_released_cpu() {
        let mut mem = Memory::default();
        mem.write_u32(cpu::READY_WORD, cpu::BOOT_SIGNATURE);
        mem.write_u32(hw::CPU_RESET, 1);
        let mut session = Session::new(FakeBus::new(mem));

        let err = wait_boot(&mut session, PollConfig::BOOT).unwrap_err();
        assert!(matches!(err, Error::Timeout { polls: 100, .. }));
        assert_eq!(session.transport().delays().len(), 100);

        session.transport_mut().clear_transactions();
        session
            .transport_mut()
            .peripheral_mut()
            .write_u32(hw::CPU_RESET, 0);
        wait_boot(&mut session, PollConfig::BOOT).unwrap();
        assert_eq!(session.transport().reads_of(cpu::READY_WORD), 1);
        assert!(session.transport().delays().is_empty());
    }
}
