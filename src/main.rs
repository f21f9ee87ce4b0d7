//! Segment Monitor
//!
//! Reads 7-segment displays filmed by fixed cameras, stores one consensus
//! value per display and capture burst, and raises alerts when a display
//! settles into a different severity tier.

mod capture;
mod config;
mod logging;
mod monitor;
mod notify;
mod ocr;
mod paths;
mod process;
mod settings;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::parse_burst_dir;
use crate::config::{default_config_path, load_config, AppConfig, LoadedConfig};
use crate::monitor::queue::BurstWorkItem;
use crate::monitor::runner::build_pipeline;
use crate::ocr::Reading;
use crate::store::{parse_timestamp, Database, SettingsImport};

#[derive(Parser)]
#[command(name = "segment-monitor")]
#[command(about = "Read 7-segment displays from camera frames and alert on changes")]
#[command(version)]
struct Cli {
    /// Path to config.json (defaults to the file next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, recognize and store continuously.
    Run {
        /// Stop after this many seconds instead of waiting for `q`.
        #[arg(long)]
        run_for_secs: Option<u64>,
    },

    /// Replay one capture burst directory through the pipeline.
    Process {
        /// Camera port; taken from the PORT_<port> parent directory when omitted.
        #[arg(long)]
        port: Option<String>,

        /// Burst directory named after its capture time (YYYYMMDDhhmmss).
        burst_dir: PathBuf,
    },

    /// Write displays, thresholds and mail recipients into the store.
    ImportSettings {
        /// Settings file (JSON).
        file: PathBuf,
    },

    /// Write the records of one display in a time range as CSV.
    Export {
        /// Display id.
        #[arg(long)]
        setting: String,

        /// Start of the range, "YYYY-MM-DD hh:mm:ss".
        #[arg(long)]
        from: String,

        /// End of the range (inclusive), "YYYY-MM-DD hh:mm:ss".
        #[arg(long)]
        to: String,

        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Manually override a stored value.
    Correct {
        /// Record id.
        #[arg(long)]
        record: i64,

        /// New value, or NaN.
        #[arg(long)]
        value: String,
    },
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("[PANIC]{} {}", location, msg);
    }));
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.data_paths().database_path();
    Database::open(&path).with_context(|| format!("failed to open database {}", path.display()))
}

fn run_process(config: &AppConfig, port: Option<String>, burst_dir: &Path) -> Result<()> {
    let (dir_port, captured_at) = parse_burst_dir(burst_dir)?;
    let port = port.unwrap_or(dir_port);

    let db = open_database(config)?;
    let pipeline = build_pipeline(&db, config)?;
    let item = BurstWorkItem::new(&port, burst_dir.to_path_buf(), captured_at);

    for outcome in pipeline.process_burst(&item)? {
        println!(
            "{}\t{}\t{}\t{}",
            outcome.setting_id,
            outcome.reading,
            outcome.tier,
            outcome
                .record_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "not stored".to_string())
        );
    }
    Ok(())
}

fn run_import(config: &AppConfig, file: &Path) -> Result<()> {
    let import = SettingsImport::load(file)?;
    let db = open_database(config)?;
    let summary = db.import_settings(&import)?;
    info!(
        "Imported {} display(s), {} threshold setting(s), {} mail recipient(s)",
        summary.displays, summary.thresholds, summary.recipients
    );
    for display in db.list_display_settings()? {
        info!(
            "  {} on port {}{}",
            display.id,
            display.camera_port,
            if display.disabled { " (disabled)" } else { "" }
        );
    }
    Ok(())
}

fn run_export(config: &AppConfig, setting: &str, from: &str, to: &str, out: &Path) -> Result<()> {
    let from = parse_timestamp(from)?;
    let to = parse_timestamp(to)?;
    let db = open_database(config)?;
    // Records of a removed display can still be exported
    if db.get_display_setting(setting)?.is_none() {
        warn!("Display {} is not configured", setting);
    }

    let records = db.records_in_range(setting, &from, &to)?;
    store::export::write_csv(out, &records)?;
    info!("Exported {} record(s) of {} to {}", records.len(), setting, out.display());
    Ok(())
}

fn run_correct(config: &AppConfig, record: i64, value: &str) -> Result<()> {
    let db = open_database(config)?;
    let reading = Reading::parse(value);
    if reading.is_unreadable() && !value.trim().eq_ignore_ascii_case("nan") {
        anyhow::bail!("'{}' is neither a number nor NaN", value);
    }
    db.correct_value(record, reading)?;
    info!("Record {} corrected to {}", record, reading);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let LoadedConfig { config, warning } = load_config(&config_path);
    logging::init_logging(&config.data_paths().logs_dir())?;
    install_panic_hook();
    if let Some(warning) = warning {
        warn!("{}", warning);
    } else if config_path.exists() {
        info!("Config loaded from {}", config_path.display());
    } else {
        info!("{} not found. Using default config.", config_path.display());
    }
    info!("Data directory: {}", config.data_paths().root().display());

    match cli.command {
        Commands::Run { run_for_secs } => {
            monitor::run_monitor(&config, run_for_secs.map(Duration::from_secs))
        }
        Commands::Process { port, burst_dir } => run_process(&config, port, &burst_dir),
        Commands::ImportSettings { file } => run_import(&config, &file),
        Commands::Export { setting, from, to, out } => run_export(&config, &setting, &from, &to, &out),
        Commands::Correct { record, value } => run_correct(&config, record, &value),
    }
}
