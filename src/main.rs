//! IP camera discovery and PTZ control for the local network.
//!
//! Usage:
//!   ptz-scout scan [prefix] [--json]        # sweep a /24, Ctrl-C cancels
//!   ptz-scout ptz <host> <action>           # one-shot: up, stop, preset 2, ...
//!   ptz-scout console                       # interactive scan/select/control
//!   ptz-scout ocr <frame.png>               # run the configured OCR backend
//!   ptz-scout -c ./ptz-scout.conf --stderr --protocol onvif console

mod config;
mod discovery;
mod error;
mod http;
mod model;
mod ocr;
mod ptz;
mod shell;
mod util;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::config::ScoutConfig;
use crate::discovery::ChannelObserver;
use crate::model::ScanEvent;
use crate::ptz::Protocol;
use crate::shell::{render_devices, ConsoleCommand, PtzAction, Shell, CONSOLE_HELP};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "ptz-scout", about = "IP camera discovery and pan-tilt-zoom control")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log to stderr instead of syslog.
    #[arg(long)]
    stderr: bool,

    /// Camera account name (overrides the config file).
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Camera account password (overrides the config file).
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Control protocol: tapo or onvif (overrides the config file).
    #[arg(long)]
    protocol: Option<Protocol>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sweep a /24 for cameras.
    Scan {
        /// Subnet prefix such as 192.168.1 or 192.168.1.0/24; defaults to the local subnet.
        prefix: Option<String>,
        /// Print the final report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send one PTZ command to a camera.
    Ptz {
        host: String,
        /// up, down, left, right, in, out, stop, connect or `preset N`.
        #[arg(required = true, num_args = 1..)]
        action: Vec<String>,
    },
    /// Interactive console.
    Console,
    /// Recognise text in a PNG frame.
    Ocr { image: PathBuf },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ptz-scout: config error: {e}");
            process::exit(1);
        }
    };
    if let Some(u) = &cli.username {
        cfg.username = u.clone();
    }
    if let Some(p) = &cli.password {
        cfg.password = p.clone();
    }
    if let Some(proto) = cli.protocol {
        cfg.protocol = proto;
    }
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("ptz-scout: config validation: {e}");
        process::exit(1);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    if let Err(e) = setup_logging(use_syslog) {
        eprintln!("ptz-scout: logging setup failed: {e}");
        process::exit(1);
    }

    let cfg = Arc::new(cfg);
    info!("ptz-scout starting (protocol={})", cfg.protocol);

    let outcome = match cli.command {
        Command::Scan { prefix, json } => run_scan(cfg, prefix, json).await,
        Command::Ptz { host, action }  => run_ptz(cfg, &host, &action.join(" ")).await,
        Command::Console               => run_console(cfg).await,
        Command::Ocr { image }         => run_ocr(&cfg, image).await,
    };
    if let Err(e) = outcome {
        error!("{e:#}");
        eprintln!("ptz-scout: {e:#}");
        process::exit(1);
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

/// Print scan events as they arrive until the scan finishes.
fn spawn_event_printer(mut rx: UnboundedReceiver<ScanEvent>, stop_on_finish: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ScanEvent::DeviceFound(record) => println!("found   {record}"),
                ScanEvent::Finished(report) => {
                    println!("{}", report.summary());
                    if stop_on_finish {
                        break;
                    }
                }
            }
        }
    })
}

async fn run_scan(cfg: Arc<ScoutConfig>, prefix: Option<String>, json: bool) -> anyhow::Result<()> {
    let (observer, rx) = ChannelObserver::channel();
    let mut shell = Shell::new(Arc::clone(&cfg), Arc::new(observer)).context("building scanner")?;

    let prefix = prefix.unwrap_or_else(|| cfg.subnet.clone());
    let prefix = shell.start_scan(&prefix)?;
    println!("scanning {prefix}.0/24 (Ctrl-C to cancel)");

    let printer = spawn_event_printer(rx, true);
    if let Some(cancel) = shell.cancel_handle() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let Some(report) = shell.wait_scan().await else {
        bail!("scan did not start");
    };
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_devices(&report.devices));
    }
    Ok(())
}

async fn run_ptz(cfg: Arc<ScoutConfig>, host: &str, action: &str) -> anyhow::Result<()> {
    let action: PtzAction = action.parse()?;
    let (observer, _rx) = ChannelObserver::channel();
    let mut shell = Shell::new(cfg, Arc::new(observer))?;
    shell.select_device(host, None)?;
    shell
        .ptz(action)
        .await
        .with_context(|| format!("{action} on {host}"))?;
    println!("{action}: ok");
    shell.shutdown();
    Ok(())
}

async fn run_console(cfg: Arc<ScoutConfig>) -> anyhow::Result<()> {
    let (observer, rx) = ChannelObserver::channel();
    let mut shell = Shell::new(cfg, Arc::new(observer))?;
    let printer = spawn_event_printer(rx, false);

    println!("{CONSOLE_HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match line.parse::<ConsoleCommand>() {
            Ok(c) => c,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let quit = cmd == ConsoleCommand::Quit;
        match shell.execute(cmd).await {
            Ok(text) if !text.is_empty() => println!("{text}"),
            Ok(_) => {}
            Err(e) => println!("error: {e}"),
        }
        if quit {
            break;
        }
    }

    shell.shutdown();
    shell.wait_scan().await;
    drop(shell);
    let _ = printer.await;
    Ok(())
}

async fn run_ocr(cfg: &ScoutConfig, image: PathBuf) -> anyhow::Result<()> {
    let png = tokio::fs::read(&image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;

    let mut ocr = ocr::make_ocr(cfg)?;
    ocr.set_log_sink(Box::new(|line: &str| info!("{line}")));
    if !ocr.initialize() {
        bail!("OCR backend could not be initialised");
    }
    let text = ocr.process_frame(&png).await?;
    if text.is_empty() {
        println!("(no text recognised)");
    } else {
        println!("{text}");
    }
    Ok(())
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process:  "ptz-scout".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .init();
    }
    Ok(())
}
