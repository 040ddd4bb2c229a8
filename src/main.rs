//! Binary entrypoint for the meshbackup CLI.
//!
//! `meshbackup [PORT]` connects to the device on `PORT` (default `/dev/cu.usbmodem1301`),
//! requests a preferences backup to SD card and disconnects. Exit status is 0 on success and 1
//! on any failure, which is reported as `Error: <description>` on stdout.
//!
//! See the library crate docs for module-level details: `meshbackup::`.
use clap::Parser;
use log::{debug, warn};

use meshbackup::config::Config;
use meshbackup::logutil::open_log_file;
use meshbackup::runner::EXIT_FAILURE;

#[derive(Parser)]
#[command(name = "meshbackup")]
#[command(about = "Ask a Meshtastic device to back up its preferences to SD card")]
#[command(version)]
struct Cli {
    /// Meshtastic device port (e.g., /dev/ttyUSB0); defaults to the config or /dev/cu.usbmodem1301
    port: Option<String>,

    /// Configuration file path (optional; built-in defaults apply when absent)
    #[arg(short, long)]
    config: Option<String>,

    /// Baud rate override
    #[arg(short = 'b', long)]
    baud: Option<u32>,

    /// Write a starter configuration file to the --config path (or meshbackup.toml) and exit
    #[arg(long)]
    init_config: bool,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.init_config {
        let path = cli.config.as_deref().unwrap_or("meshbackup.toml");
        match Config::create_default(path).await {
            Ok(()) => println!("Configuration file created at {}", path),
            Err(e) => fail(&e),
        }
        return;
    }

    let mut config = match cli.config.as_deref() {
        Some(path) => match Config::load(path).await {
            Ok(cfg) => cfg,
            Err(e) => fail(&e),
        },
        None => Config::default(),
    };
    if let Some(baud) = cli.baud {
        config.device.baud_rate = baud;
    }

    init_logging(&config, cli.verbose);
    let port = config.resolve_port(cli.port.as_deref());
    debug!("meshbackup v{} using port {}", env!("CARGO_PKG_VERSION"), port);

    #[cfg(feature = "serial")]
    {
        use meshbackup::meshtastic::SerialOpener;
        use meshbackup::runner::BackupCommandRunner;

        let runner = BackupCommandRunner::new(SerialOpener::new(config.link_settings()))
            .with_settle_delay(config.settle_delay());
        let code = runner
            .run_to_exit_code(&port, &mut std::io::stdout())
            .await;
        std::process::exit(code);
    }

    #[cfg(not(feature = "serial"))]
    {
        println!("Error: serial support not compiled in (build with --features serial)");
        std::process::exit(EXIT_FAILURE);
    }
}

fn fail(e: &anyhow::Error) -> ! {
    println!("Error: {}", e);
    std::process::exit(EXIT_FAILURE);
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .logging
            .level_filter()
            .unwrap_or(log::LevelFilter::Warn),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // stdout carries the operator-facing progress lines only
    builder.target(env_logger::Target::Stderr);

    let mut open_failure = None;
    let file = config
        .logging
        .file
        .as_deref()
        .and_then(|path| match open_log_file(path) {
            Ok(f) => Some(f),
            Err(e) => {
                open_failure = Some((path.to_string(), e));
                None
            }
        });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console as well when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
    if let Some((path, e)) = open_failure {
        warn!("Could not open log file {}: {} (logging to stderr only)", path, e);
    }
}
