use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use dvbfw_avl6882::{
    BootConfig, DeliverySystem, Demod, MiniCmd, PatchImage, PatchSet,
    frontend::TuneParams,
    patch::{PatchHeader, script},
    sim::{Signal, SimDemod},
};
use dvbfw_io::{Session, ShortHex, fake::FakeBus};
use facet_pretty::FacetPretty;

use crate::cli_helpers::{DiseqcMsg, PokeArg, RegArg};

mod cli_helpers;

type SimSession = Session<FakeBus<SimDemod>>;

#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Args)]
struct GlobalOpts {
    /// Boot configuration as JSON, built-in defaults otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Largest bus frame in bytes, overrides the config
    #[arg(long, global = true)]
    max_frame: Option<u32>,

    /// Disable the progress bar
    #[arg(long, global = true)]
    no_progress_bar: bool,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Print the header of a patch image
    Inspect(PatchFile),
    /// List the script of a patch image
    Disasm(PatchFile),
    /// Print the effective boot configuration
    Config,
    /// Boot the simulated demodulator, then access registers
    Boot(Boot),
    /// Boot, acquire and report status on the simulated demodulator
    Tune(Tune),
    /// Send DiSEqC commands and tone bursts through the simulated demodulator
    Diseqc(Diseqc),
}

#[derive(clap::Args)]
struct PatchFile {
    patch: PathBuf,
}

#[derive(clap::Args)]
struct Patches {
    #[arg(long)]
    dvbc: Option<PathBuf>,
    #[arg(long)]
    dvbs: Option<PathBuf>,
    #[arg(long)]
    dvbt: Option<PathBuf>,
}

impl Patches {
    fn load(&self) -> Result<PatchSet> {
        let read = |path: &Option<PathBuf>| -> Result<Vec<u8>> {
            Ok(match path {
                Some(path) => std::fs::read(path)?,
                None => Vec::new(),
            })
        };
        Ok(PatchSet {
            cable: read(&self.dvbc)?,
            satellite: read(&self.dvbs)?,
            terrestrial: read(&self.dvbt)?,
        })
    }
}

#[derive(clap::Args)]
struct Boot {
    #[arg(long, value_enum, default_value_t = DeliverySystem::Dvbt2)]
    system: DeliverySystem,
    #[command(flatten)]
    patches: Patches,
    /// Register writes after boot, `ADDR[:WIDTH]=VALUE`
    #[arg(long)]
    poke: Vec<PokeArg>,
    /// Register reads after boot and pokes, `ADDR[:WIDTH]`
    #[arg(long)]
    peek: Vec<RegArg>,
}

#[derive(clap::Args)]
struct Tune {
    #[arg(long, value_enum, default_value_t = DeliverySystem::Dvbt2)]
    system: DeliverySystem,
    #[command(flatten)]
    patches: Patches,
    #[arg(long, default_value_t = 474_000_000)]
    frequency: u32,
    #[arg(long, default_value_t = 6_900_000)]
    symbol_rate: u32,
    #[arg(long, default_value_t = 8_000_000)]
    bandwidth: u32,
    #[arg(long, default_value_t = 0)]
    stream_id: u8,
    /// SNR the simulator reports on lock, in 0.01 dB
    #[arg(long, default_value_t = 2500)]
    sim_snr: u32,
}

#[derive(clap::Args)]
struct Diseqc {
    #[command(flatten)]
    patches: Patches,
    /// Master commands in hex, sent in order
    #[arg(long)]
    msg: Vec<DiseqcMsg>,
    /// Tone burst sent after the messages
    #[arg(long, value_enum)]
    burst: Option<MiniCmd>,
}

fn main() -> Result<()> {
    init_logging()?;
    let Args { global, command } = Args::parse();

    let mut config = match &global.config {
        Some(path) => BootConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => BootConfig::default(),
    };
    if let Some(max_frame) = global.max_frame {
        config.max_frame = max_frame;
    }

    match command {
        CliCommand::Inspect(args) => inspect(&std::fs::read(args.patch)?),
        CliCommand::Disasm(args) => disasm(&std::fs::read(args.patch)?),
        CliCommand::Config => {
            println!("{}", config.pretty());
            Ok(())
        }
        CliCommand::Boot(args) => {
            let patches = args.patches.load()?;
            let mut session = sim_session(&config, SimDemod::new())?;
            let version = with_progress(&mut session, global.no_progress_bar, |session| {
                dvbfw_avl6882::load_firmware(session, &patches, args.system, &config)
            })?;
            println!("patch {version}");
            for poke in &args.poke {
                session.write_register(poke.reg.addr, poke.value, poke.reg.width)?;
            }
            for peek in &args.peek {
                let value = session.read_register(peek.addr, peek.width)?;
                println!("{peek} = {}", peek.format_value(value));
            }
            Ok(())
        }
        CliCommand::Tune(args) => tune(args, config),
        CliCommand::Diseqc(args) => diseqc(args, config),
    }
}

fn sim_session(config: &BootConfig, sim: SimDemod) -> Result<SimSession> {
    Ok(Session::new(FakeBus::new(sim)).with_max_frame(config.max_frame as usize)?)
}

fn with_progress<R>(
    session: &mut SimSession,
    disabled: bool,
    f: impl FnOnce(&mut SimSession) -> R,
) -> R {
    if disabled {
        return f(session);
    }
    let notify = Arc::new(AtomicUsize::new(0));
    let done = &AtomicBool::new(false);
    let pb = &setup_progress_bar();
    std::thread::scope(|s| {
        let written = notify.clone();
        s.spawn(move || {
            while !done.load(Ordering::Acquire) {
                pb.set_position(written.load(Ordering::Acquire) as _);
                std::thread::sleep(Duration::from_millis(20));
            }
            pb.set_position(written.load(Ordering::Acquire) as _);
        });

        let r = session.with_notifications(notify, f);
        done.store(true, Ordering::Release);
        r
    })
}

fn setup_progress_bar() -> indicatif::ProgressBar {
    let template = "{spinner:.green} {elapsed:>3} {bytes} written ({bytes_per_sec})";
    let style = indicatif::ProgressStyle::with_template(template).unwrap();
    let pb = indicatif::ProgressBar::no_length()
        .with_finish(indicatif::ProgressFinish::Abandon)
        .with_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn inspect(bytes: &[u8]) -> Result<()> {
    let header = PatchHeader::parse(bytes)?;
    println!("{}", header.pretty());
    match header.validate() {
        Ok(()) => println!("valid, script at words {}..{}", header.script_start(), header.script_end()),
        Err(e) => println!("invalid: {e}"),
    }
    let reserved = bytes
        .get(24..24 + header.reserved_len as usize * 4)
        .unwrap_or_default();
    if !reserved.is_empty() {
        println!("reserved: {}", ShortHex(reserved));
    }
    Ok(())
}

fn disasm(bytes: &[u8]) -> Result<()> {
    let image = PatchImage::from_bytes(bytes)?;
    for instruction in script::disassemble(&image) {
        println!("{}", instruction?);
    }
    Ok(())
}

fn tune(args: Tune, config: BootConfig) -> Result<()> {
    let patches = args.patches.load()?;
    let signal = Signal {
        snr_db_x100: args.sim_snr,
        rf_agc: 20_000,
    };
    let session = sim_session(&config, SimDemod::new().with_signal(signal))?;
    let mut demod = Demod::new(session, patches, config);

    let range = args.system.family().frequency_range();
    if !(range.min_hz..=range.max_hz).contains(&args.frequency) {
        return Err(eyre!(
            "{} Hz is outside {}..={} Hz for {}",
            args.frequency,
            range.min_hz,
            range.max_hz,
            args.system,
        ));
    }

    demod.set_mode(args.system)?;
    if let Some(version) = demod.patch_version() {
        println!("patch {version}");
    }

    let mut params = TuneParams {
        system: args.system,
        frequency_hz: args.frequency,
        symbol_rate: args.symbol_rate,
        bandwidth_hz: args.bandwidth,
        stream_id: args.stream_id,
    };
    demod.set_frontend(&mut params)?;
    if params.system != args.system {
        println!("tuned as {}", params.system);
    }

    let (status, stats) = demod.read_status()?;
    println!("status: {status:?}");
    println!(
        "strength: {} dB ({})",
        stats.strength_db, stats.strength_relative
    );
    match stats.cnr {
        Some(cnr) => println!(
            "cnr: {}.{:03} dB ({})",
            cnr.milli_db / 1000,
            cnr.milli_db % 1000,
            cnr.relative
        ),
        None => println!("cnr: n/a"),
    }
    println!("ber: {}", demod.read_ber()?);
    Ok(())
}

fn diseqc(args: Diseqc, config: BootConfig) -> Result<()> {
    let patches = args.patches.load()?;
    let session = sim_session(&config, SimDemod::new())?;
    let mut demod = Demod::new(session, patches, config);

    for msg in &args.msg {
        demod.send_diseqc(&msg.0)?;
        println!("sent {msg}");
    }
    if let Some(burst) = args.burst {
        demod.send_burst(burst)?;
        println!("sent burst {burst}");
    }
    let sent = demod.session().transport().peripheral().diseqc_sent().len();
    println!("{sent} transmissions");
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;
    Ok(())
}
