use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trackcam::CameraType;
use trackcam::config::{DEFAULT_EXTENT_OFFSET, DEFAULT_MAX_REGION_SIZE, DEFAULT_PROCESS_NAME};

mod commands;
mod input;
mod shutdown;

#[derive(Parser)]
#[command(name = "trackcam")]
#[command(about = "TrackIR head tracking for Open Rails cameras")]
#[command(version)]
struct Args {
    /// Debug logging for trackcam crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scanner worker: find one camera type's structure in game memory
    Scan {
        #[arg(long)]
        camera_type: CameraType,

        /// Validation threshold for the extent field
        #[arg(long, default_value_t = 10.0)]
        radius: f32,

        /// Pattern tokens, e.g. `6D ?? 40`
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        aob: Vec<String>,

        #[arg(long, default_value = DEFAULT_PROCESS_NAME)]
        process_name: String,

        #[arg(long, default_value_t = DEFAULT_MAX_REGION_SIZE)]
        max_region_size: u64,

        /// Offset of the extent field from a match (hex)
        #[arg(long, default_value_t = format!("{DEFAULT_EXTENT_OFFSET:#x}"))]
        extent_offset: String,

        /// Exit when this process is gone
        #[arg(long)]
        parent_pid: Option<u32>,
    },

    /// Writer worker: apply head pose to the camera addresses
    Write {
        /// Camera configuration blob written by the controller
        #[arg(long)]
        config_file: PathBuf,

        /// `0` means no address
        #[arg(long, default_value = "0")]
        cab_address: String,

        #[arg(long, default_value = "0")]
        external_address: String,

        #[arg(long, default_value = "0")]
        interior_address: String,

        #[arg(long, default_value = "cab")]
        active_camera: CameraType,

        #[arg(long, default_value = DEFAULT_PROCESS_NAME)]
        process_name: String,

        #[arg(long)]
        parent_pid: Option<u32>,

        /// Write a centred pose instead of reading the tracking device
        #[arg(long)]
        dry_run: bool,
    },

    /// Controller: supervise scanners and the writer until quit
    Run {
        #[arg(short, long, default_value = "trackcam.json")]
        config: PathBuf,

        /// Directory for per-day session logs
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,

        /// Skip the session log
        #[arg(long)]
        no_log: bool,
    },

    /// Check privileges and tracking device availability
    Check {
        #[arg(long, default_value = DEFAULT_PROCESS_NAME)]
        process_name: String,
    },

    /// Print the camera patterns in effect
    Patterns {
        /// Controller config whose patterns to show (defaults if absent)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the worker event protocol; logs go to stderr.
    let level = if args.verbose { "trackcam=debug" } else { "trackcam=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    match args.command {
        Command::Scan {
            camera_type,
            radius,
            aob,
            process_name,
            max_region_size,
            extent_offset,
            parent_pid,
        } => commands::scan::run(commands::scan::ScanArgs {
            camera: camera_type,
            radius,
            aob,
            process_name,
            max_region_size,
            extent_offset,
            parent_pid,
        }),
        Command::Write {
            config_file,
            cab_address,
            external_address,
            interior_address,
            active_camera,
            process_name,
            parent_pid,
            dry_run,
        } => commands::write::run(commands::write::WriteArgs {
            config_file,
            addresses: [
                (CameraType::Cab, cab_address),
                (CameraType::External, external_address),
                (CameraType::Interior, interior_address),
            ],
            active_camera,
            process_name,
            parent_pid,
            dry_run,
        }),
        Command::Run {
            config,
            log_dir,
            no_log,
        } => commands::run::run(&config, (!no_log).then_some(log_dir.as_path())),
        Command::Check { process_name } => commands::check::run(&process_name),
        Command::Patterns { config } => commands::patterns::run(config.as_deref()),
    }
}
