//! Firmware boot sequence.

use std::fmt::Display;

use dvbfw_io::{RegAddr, Session, Transport};
use facet::Facet;
use tracing::{debug, info, instrument};

use crate::{
    Result, Sticky,
    config::{BootConfig, PllConfig},
    patch::{PatchImage, vm::Vm},
    protocol,
    registers::{DemodMode, cpu, hw, pll},
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::VariantArray, clap::ValueEnum,
)]
#[strum(serialize_all = "kebab-case")]
pub enum DeliverySystem {
    DvbcAnnexA,
    DvbcAnnexB,
    Dvbs,
    Dvbs2,
    Dvbt,
    Dvbt2,
}

impl DeliverySystem {
    pub fn family(self) -> Family {
        match self {
            DeliverySystem::DvbcAnnexA | DeliverySystem::DvbcAnnexB => Family::Cable,
            DeliverySystem::Dvbs | DeliverySystem::Dvbs2 => Family::Satellite,
            DeliverySystem::Dvbt | DeliverySystem::Dvbt2 => Family::Terrestrial,
        }
    }

    /// The system whose firmware serves `self`. Second generation systems run
    /// on their first generation firmware.
    pub fn firmware_mode(self) -> Self {
        match self {
            DeliverySystem::Dvbs2 => DeliverySystem::Dvbs,
            DeliverySystem::Dvbt2 => DeliverySystem::Dvbt,
            other => other,
        }
    }
}

/// Delivery systems sharing one patch image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::VariantArray)]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    Cable,
    Satellite,
    Terrestrial,
}

/// Tuning limits, in Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrequencyRange {
    pub min_hz: u32,
    pub max_hz: u32,
    /// Zero where the tuner picks its own step.
    pub step_hz: u32,
}

impl Family {
    pub fn demod_mode(self) -> DemodMode {
        match self {
            Family::Cable => DemodMode::Dvbc,
            Family::Satellite => DemodMode::Dvbsx,
            Family::Terrestrial => DemodMode::Dvbtx,
        }
    }

    pub fn frequency_range(self) -> FrequencyRange {
        match self {
            Family::Cable => FrequencyRange {
                min_hz: 47_000_000,
                max_hz: 862_000_000,
                step_hz: 62_500,
            },
            Family::Satellite => FrequencyRange {
                min_hz: 950_000_000,
                max_hz: 2_150_000_000,
                step_hz: 0,
            },
            Family::Terrestrial => FrequencyRange {
                min_hz: 174_000_000,
                max_hz: 862_000_000,
                step_hz: 250_000,
            },
        }
    }
}

/// Patch images for each family, as shipped by the board vendor.
#[derive(Clone, Debug, Default)]
pub struct PatchSet {
    pub cable: Vec<u8>,
    pub satellite: Vec<u8>,
    pub terrestrial: Vec<u8>,
}

impl PatchSet {
    pub fn get(&self, family: Family) -> &[u8] {
        match family {
            Family::Cable => &self.cable,
            Family::Satellite => &self.satellite,
            Family::Terrestrial => &self.terrestrial,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum BootStage {
    Unloaded,
    PllConfigured,
    PatchRunning,
    BootPolling,
    Ready,
    Failed,
}

/// Contents of [`cpu::PATCH_VERSION`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Facet)]
pub struct PatchVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl From<u32> for PatchVersion {
    fn from(value: u32) -> Self {
        Self {
            major: (value >> 24) as u8,
            minor: (value >> 16) as u8,
            build: value as u16,
        }
    }
}

impl Display for PatchVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} build {}", self.major, self.minor, self.build)
    }
}

fn write_pll<T: Transport>(
    session: &mut Session<T>,
    sticky: &mut Sticky,
    base: u32,
    config: &PllConfig,
) {
    let fields = [
        (pll::DIVR, config.divr),
        (pll::DIVF, config.divf),
        (pll::DIVQ, config.divq),
        (pll::RANGE, config.range),
        (pll::DIVQ2, config.divq2),
        (pll::DIVQ3, config.divq3),
        (pll::ENABLE2, config.enable2),
        (pll::ENABLE3, config.enable3),
    ];
    for (offset, value) in fields {
        sticky.record(session.write_u32(RegAddr::new(base + offset), value));
    }
}

/// Program the PLLs, strobe their reset and bring up the DLL.
#[instrument(skip_all)]
pub fn setup_pll<T: Transport>(session: &mut Session<T>, config: &BootConfig) -> Result<()> {
    let mut sticky = Sticky::new();
    write_pll(session, &mut sticky, pll::SYS_BASE, &config.sys_pll);
    write_pll(session, &mut sticky, pll::MPEG_BASE, &config.mpeg_pll);
    write_pll(session, &mut sticky, pll::ADC_BASE, &config.adc_pll);

    sticky.record(session.write_u32(pll::RESET, 0));
    sticky.record(session.write_u32(pll::RESET, 1));
    session.delay(config.pll_settle());

    sticky.record(session.write_u32(pll::DLL_OUT_PHASE, config.dll_out_phase));
    sticky.record(session.write_u32(pll::DLL_RD_PHASE, config.dll_rd_phase));
    sticky.record(session.write_u32(pll::DEGLITCH_MODE, config.deglitch_mode));
    sticky.record(session.write_u32(pll::DLL_INIT, 1));
    sticky.record(session.write_u32(pll::DLL_INIT, 0));
    sticky.finish()
}

/// Drives one firmware load, remembering how far it got.
pub struct Loader<'c> {
    config: &'c BootConfig,
    stage: BootStage,
}

impl<'c> Loader<'c> {
    pub fn new(config: &'c BootConfig) -> Self {
        Self {
            config,
            stage: BootStage::Unloaded,
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    fn enter(&mut self, stage: BootStage) {
        debug!(from = %self.stage, to = %stage, "boot stage");
        self.stage = stage;
    }

    /// Load the patch for `system` and wait for the firmware to come up.
    #[instrument(skip_all, fields(%system))]
    pub fn load<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        patches: &PatchSet,
        system: DeliverySystem,
    ) -> Result<PatchVersion> {
        let result = self.run(session, patches, system);
        if result.is_err() {
            self.enter(BootStage::Failed);
        }
        result
    }

    fn run<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        patches: &PatchSet,
        system: DeliverySystem,
    ) -> Result<PatchVersion> {
        let family = system.family();
        let blob = patches.get(family);
        info!(%family, len = blob.len(), "loading patch");
        let image = PatchImage::from_bytes(blob)?;

        let mut sticky = Sticky::new();
        sticky.record(session.write_u32(hw::BOOT_STRAP, 1));
        sticky.record(setup_pll(session, self.config));
        sticky.finish()?;
        self.enter(BootStage::PllConfigured);

        let mut sticky = Sticky::new();
        sticky.record(session.write_u32(cpu::READY_WORD, 0));
        sticky.record(session.write_u32(hw::BOOT_STRAP, 0));
        self.enter(BootStage::PatchRunning);
        let mut vm = Vm::new(&image).with_poll(self.config.command_poll);
        sticky.record(vm.run(session));
        sticky.finish()?;

        self.enter(BootStage::BootPolling);
        protocol::wait_boot(session, self.config.boot_poll)?;
        let version = PatchVersion::from(session.read_u32(cpu::PATCH_VERSION)?);
        info!(%version, "firmware running");
        self.enter(BootStage::Ready);
        Ok(version)
    }
}

/// Load and start the firmware for `system`.
pub fn load_firmware<T: Transport>(
    session: &mut Session<T>,
    patches: &PatchSet,
    system: DeliverySystem,
    config: &BootConfig,
) -> Result<PatchVersion> {
    Loader::new(config).load(session, patches, system)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use dvbfw_io::fake::FakeBus;

    use super::*;
    use crate::{
        Error, FirmwareError,
        patch::{
            script::{AddrMode, BinaryOp, Opcode, Operation, UnaryOp},
            testing::PatchBuilder,
        },
        registers::fw,
        sim::SimDemod,
    };

    /// A patch shaped like a vendor one: hold the CPU, load code, check it,
    /// release the CPU if the check passed.
    pub(crate) fn firmware(mode: DemodMode) -> Vec<u8> {
        let check = Operation::new(AddrMode::VarIdx, UnaryOp::Nop, BinaryOp::Load);
        PatchBuilder::new()
            .instr(&[], Opcode::AssertCpuReset, &[], &[])
            .instr(&[], Opcode::LdToDevice, &[2, 0x1_0000, 0], &[])
            .instr(&[], Opcode::LdToDeviceImm, &[4, fw::ACTIVE_MODE.get(), mode as u32], &[])
            .instr(&[], Opcode::Ping, &[], &[0])
            .instr(&[(check, 0)], Opcode::ReleaseCpuReset, &[], &[])
            .data(&[0x1234_5678, 0x9abc_def0])
            .bytes()
    }

    pub(crate) fn patches() -> PatchSet {
        PatchSet {
            cable: firmware(DemodMode::Dvbc),
            satellite: firmware(DemodMode::Dvbsx),
            terrestrial: firmware(DemodMode::Dvbtx),
        }
    }

    fn session(sim: SimDemod) -> Session<FakeBus<SimDemod>> {
        Session::new(FakeBus::new(sim))
    }

    #[test]
    fn boots_and_reports_version() {
        let mut session = session(SimDemod::new().with_patch_version(0x0102_0304));
        let config = BootConfig::default();
        let mut loader = Loader::new(&config);
        let version = loader
            .load(&mut session, &patches(), DeliverySystem::Dvbt2)
            .unwrap();
        assert_eq!(
            version,
            PatchVersion {
                major: 1,
                minor: 2,
                build: 0x0304
            }
        );
        assert_eq!(version.to_string(), "1.2 build 772");
        assert_eq!(loader.stage(), BootStage::Ready);

        let bus = session.transport();
        assert_eq!(
            bus.writes_to(hw::BOOT_STRAP),
            [&[0, 0, 0, 1][..], &[0, 0, 0, 0][..]]
        );
        assert_eq!(bus.writes_to(pll::RESET), [&[0, 0, 0, 0][..], &[0, 0, 0, 1][..]]);
        assert_eq!(bus.delays(), [Duration::from_millis(20)]);
        assert_eq!(
            bus.peripheral().memory().read_u32(fw::ACTIVE_MODE),
            DemodMode::Dvbtx as u32
        );
        assert_eq!(
            bus.peripheral().memory().read_u32(RegAddr::new(0x1_0004)),
            0x9abc_def0
        );
    }

    #[test]
    fn pll_values_land() {
        let mut session = session(SimDemod::new());
        let config = BootConfig::default();
        setup_pll(&mut session, &config).unwrap();
        let mem = session.transport().peripheral().memory();
        assert_eq!(mem.read_u32(RegAddr::new(pll::SYS_BASE + pll::DIVF)), 99);
        assert_eq!(mem.read_u32(RegAddr::new(pll::MPEG_BASE + pll::RANGE)), 3);
        assert_eq!(mem.read_u32(RegAddr::new(pll::ADC_BASE + pll::ENABLE3)), 1);
        assert_eq!(mem.read_u32(pll::DLL_OUT_PHASE), 96);
        assert_eq!(mem.read_u32(pll::DEGLITCH_MODE), 1);
        assert_eq!(
            session.transport().writes_to(pll::DLL_INIT),
            [&[0, 0, 0, 1][..], &[0, 0, 0, 0][..]]
        );
    }

    #[test]
    fn bad_magic_touches_nothing() {
        let mut session = session(SimDemod::new());
        let patches = PatchSet {
            terrestrial: PatchBuilder::new().magic(0x2000_0001).bytes(),
            ..PatchSet::default()
        };
        let config = BootConfig::default();
        let mut loader = Loader::new(&config);
        let err = loader
            .load(&mut session, &patches, DeliverySystem::Dvbt)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidFirmware(FirmwareError::BadMagic(0x2000_0001))
        ));
        assert_eq!(loader.stage(), BootStage::Failed);
        assert!(session.transport().transactions().is_empty());
    }

    #[test]
    fn missing_patch_is_rejected() {
        let mut session = session(SimDemod::new());
        let err = load_firmware(
            &mut session,
            &PatchSet::default(),
            DeliverySystem::Dvbs,
            &BootConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidFirmware(FirmwareError::TooShort { len: 0 })
        ));
    }

    #[test]
    fn dead_cpu_times_out() {
        let mut session = session(SimDemod::new().with_failing_ping());
        let config = BootConfig::default();
        let mut loader = Loader::new(&config);
        let err = loader
            .load(&mut session, &patches(), DeliverySystem::DvbcAnnexA)
            .unwrap_err();
        // PING failed, so the script never released the CPU
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(loader.stage(), BootStage::Failed);
        assert!(session.transport().writes_to(hw::CPU_RESET).len() == 1);
    }

    #[test]
    fn boot_signature_timeout() {
        let mut session = session(SimDemod::new().without_boot());
        let config = BootConfig::default();
        let err = load_firmware(&mut session, &patches(), DeliverySystem::Dvbs2, &config)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { polls: 100, addr } if addr == cpu::READY_WORD));
    }

    #[test]
    fn delivery_system_mapping() {
        assert_eq!(DeliverySystem::Dvbs2.firmware_mode(), DeliverySystem::Dvbs);
        assert_eq!(DeliverySystem::Dvbt2.firmware_mode(), DeliverySystem::Dvbt);
        assert_eq!(
            DeliverySystem::DvbcAnnexB.firmware_mode(),
            DeliverySystem::DvbcAnnexB
        );
        assert_eq!(DeliverySystem::DvbcAnnexB.family(), Family::Cable);
        assert_eq!(DeliverySystem::DvbcAnnexA.to_string(), "dvbc-annex-a");
        assert_eq!(Family::Satellite.demod_mode(), DemodMode::Dvbsx);
        assert_eq!(Family::Cable.frequency_range().step_hz, 62_500);
    }
}
