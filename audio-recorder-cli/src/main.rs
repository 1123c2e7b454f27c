mod commands;
mod config;
mod console_observer;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use audio_recorder_core::SampleEncoding;

use commands::AppContext;
use config::{FileConfig, SessionOverrides};

#[derive(Parser)]
#[command(name = "audio-recorder")]
#[command(version)]
#[command(about = "Record audio input devices to FLAC or WAV files", long_about = None)]
struct Cli {
    /// Folder recordings are written to [default: recordings]
    #[arg(long, global = true)]
    folder: Option<PathBuf>,

    /// TOML file with [settings] and [session] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio input devices
    Devices,

    /// Record one session, stopping on Enter or after --duration
    Record {
        #[command(flatten)]
        session: SessionArgs,

        /// Stop after this many seconds
        #[arg(long, value_parser = parse_seconds)]
        duration: Option<Duration>,
    },

    /// List recordings in the folder
    #[command(alias = "ls")]
    List,

    /// Interactive prompt with start/stop/status commands
    Shell {
        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(Args, Debug, Default)]
struct SessionArgs {
    /// Input device index (see `devices`)
    #[arg(short, long)]
    device: Option<usize>,

    /// Number of channels to capture
    #[arg(short, long)]
    channels: Option<u16>,

    /// Sample rate in Hz
    #[arg(short, long)]
    rate: Option<u32>,

    /// Frames per capture callback
    #[arg(long)]
    chunk_size: Option<u32>,

    /// Output encoding [default: flac16]
    #[arg(short, long)]
    encoding: Option<EncodingArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EncodingArg {
    Flac16,
    Flac24,
    Pcm16,
    Pcm24,
    Float32,
}

impl From<EncodingArg> for SampleEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Flac16 => SampleEncoding::Flac16,
            EncodingArg::Flac24 => SampleEncoding::Flac24,
            EncodingArg::Pcm16 => SampleEncoding::Pcm16,
            EncodingArg::Pcm24 => SampleEncoding::Pcm24,
            EncodingArg::Float32 => SampleEncoding::Float32,
        }
    }
}

impl From<SessionArgs> for SessionOverrides {
    fn from(args: SessionArgs) -> Self {
        Self {
            device_index: args.device,
            channel_count: args.channels,
            sample_rate: args.rate,
            chunk_size: args.chunk_size,
            encoding: args.encoding.map(SampleEncoding::from),
        }
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("duration must be a positive number of seconds".into());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref())?;
    let ctx = AppContext {
        folder: file.resolve_folder(cli.folder),
        settings: file.settings.clone(),
        json: cli.json,
    };

    match cli.command {
        Commands::Devices => commands::devices(&ctx),
        Commands::List => commands::list(&ctx),
        Commands::Record { session, duration } => {
            let config = SessionOverrides::from(session).apply(&file.session);
            commands::record(&ctx, config, duration)
        }
        Commands::Shell { session } => {
            let config = SessionOverrides::from(session).apply(&file.session);
            commands::shell(&ctx, config)
        }
    }
}
