//! xTools CLI - Command-line interface
//!
//! Headless front end for the communication core: inspects transports,
//! computes checksums, previews frames and runs a configured device.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xtools_core::cli::{render_traffic, CliResult, ExitCodes};
use xtools_core::config::{self, AppConfig, LoggingConfig};
use xtools_core::core::chart::ChartSink;
use xtools_core::core::codec::{encode, TextFormat};
use xtools_core::core::emitter::Emitter;
use xtools_core::core::logger::{DataLogger, Direction};
use xtools_core::core::protocol::{calc_checksum, ChecksumAlgorithm, ChecksumContext, FrameParameters};
use xtools_core::core::repeater::RepeaterSet;
use xtools_core::core::responder::Responder;
use xtools_core::core::session::DeviceSession;
use xtools_core::core::transport::{TransportEvent, TransportKind, TransportRegistry};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// xTools CLI
#[derive(Parser, Debug)]
#[command(
    name = "xtools-cli",
    version,
    about = "Serial, network and HID communication workbench",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Configuration file (defaults to the user config dir)
    #[arg(short, long, env = "XTOOLS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List transport types built into this binary
    Types,

    /// List available serial ports
    ListPorts,

    /// Compute a checksum
    Crc {
        /// Algorithm id or name (e.g. 7, "CRC-16/MODBUS")
        #[arg(short, long, default_value = "CRC-16/MODBUS")]
        algorithm: String,

        /// Input text format id or name
        #[arg(short = 't', long, default_value = "hex")]
        text_format: String,

        /// Emit the result least significant byte first
        #[arg(long)]
        little_endian: bool,

        /// First byte covered
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Last byte covered
        #[arg(long)]
        end: Option<usize>,

        /// List the algorithms instead
        #[arg(long)]
        list: bool,

        /// Input data
        data: Option<String>,
    },

    /// Preview an outgoing frame
    Frame {
        /// Payload text
        payload: String,

        /// Payload text format id or name
        #[arg(short = 't', long, default_value = "utf-8")]
        text_format: String,

        /// Prefix in the escape language, e.g. "\xAA"
        #[arg(long, default_value = "")]
        prefix: String,

        /// Suffix in the escape language
        #[arg(long, default_value = "")]
        suffix: String,

        /// Cook escape sequences in the payload
        #[arg(short, long)]
        escape: bool,

        /// Append a checksum computed with this algorithm
        #[arg(long)]
        crc: Option<String>,

        /// Emit the checksum least significant byte first
        #[arg(long)]
        little_endian: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Open the configured device and print traffic until Ctrl-C
    Run {
        /// Override the configured transport type (id or name)
        #[arg(long = "type")]
        kind: Option<String>,

        /// Send this text once the device is open (uses the input frame settings)
        #[arg(short, long)]
        send: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_kind(value: &str) -> Option<TransportKind> {
    if let Ok(id) = value.parse::<u32>() {
        return TransportKind::from_id(id);
    }
    let wanted = normalize(value);
    TransportKind::all()
        .iter()
        .copied()
        .find(|k| normalize(&k.to_string()) == wanted)
}

fn parse_text_format(value: &str) -> Option<TextFormat> {
    if let Ok(id) = value.parse::<u32>() {
        return TextFormat::from_id(id);
    }
    let wanted = normalize(value);
    TextFormat::all()
        .iter()
        .copied()
        .find(|f| normalize(f.name()) == wanted)
}

fn parse_algorithm(value: &str) -> Option<ChecksumAlgorithm> {
    match value.parse::<u32>() {
        Ok(id) => ChecksumAlgorithm::from_id(id),
        Err(_) => ChecksumAlgorithm::from_name(value).or_else(|| {
            let wanted = normalize(value);
            ChecksumAlgorithm::all()
                .iter()
                .copied()
                .find(|a| normalize(a.name()) == wanted)
        }),
    }
}

fn invalid(what: &str, value: &str) -> CliResult {
    CliResult::error(ExitCodes::INVALID_ARGS, format!("Unknown {what}: {value}"))
}

fn json_result<T: serde::Serialize>(value: &T) -> CliResult {
    match serde_json::to_string_pretty(value).context("failed to render JSON") {
        Ok(text) => CliResult::success_with_message(text),
        Err(e) => CliResult::error(ExitCodes::INTERNAL_ERROR, format!("{e:#}")),
    }
}

/// Install the subscriber. The returned guard flushes the file writer.
fn init_tracing(cli: &Cli, logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let (file, guard) = match logging
        .file
        .then(|| logging.directory.clone().or_else(config::log_dir))
        .flatten()
    {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "xtools.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            let layer = if logging.json { layer.json().boxed() } else { layer.boxed() };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}

fn config_path(cli: &Cli) -> Result<PathBuf, CliResult> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => AppConfig::default_path().map_err(CliResult::from),
    }
}

fn load_config(path: &Path) -> Result<AppConfig, CliResult> {
    AppConfig::load_from(path).map_err(CliResult::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let path = config_path(&cli).ok();
    let app_config = path
        .as_deref()
        .and_then(|p| AppConfig::load_from(p).ok())
        .unwrap_or_default();
    let _guard = init_tracing(&cli, &app_config.logging);

    let result = match &cli.command {
        Commands::Types => list_types(&cli),
        Commands::ListPorts => list_ports(&cli),
        Commands::Crc {
            algorithm,
            text_format,
            little_endian,
            start,
            end,
            list,
            data,
        } => {
            if *list {
                list_algorithms(&cli)
            } else {
                checksum(&cli, algorithm, text_format, *little_endian, *start, *end, data.as_deref())
            }
        }
        Commands::Frame {
            payload,
            text_format,
            prefix,
            suffix,
            escape,
            crc,
            little_endian,
        } => frame(&cli, payload, text_format, prefix, suffix, *escape, crc.as_deref(), *little_endian),
        Commands::InitConfig { force } => init_config(&cli, *force),
        Commands::Run { kind, send, timeout } => run(&cli, kind.as_deref(), send.as_deref(), *timeout).await,
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                println!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn list_types(cli: &Cli) -> CliResult {
    let registry = TransportRegistry::with_builtin();
    let kinds = registry.supported_types();

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = kinds
                .iter()
                .map(|k| {
                    serde_json::json!({
                        "id": k.id(),
                        "name": registry.display_name(*k),
                        "default": registry.default_config(*k),
                    })
                })
                .collect();
            json_result(&json)
        }
        OutputFormat::Text => {
            for kind in kinds {
                let endpoint = registry
                    .default_config(kind)
                    .map(|c| c.endpoint())
                    .unwrap_or_default();
                println!("{:>2}  {:<18} {}", kind.id(), kind, endpoint);
            }
            CliResult::success()
        }
    }
}

#[cfg(feature = "serial")]
fn list_ports(cli: &Cli) -> CliResult {
    let ports = match xtools_core::core::transport::list_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::from(e),
    };

    if ports.is_empty() {
        return CliResult::success_with_message("No serial ports found.");
    }

    match cli.format {
        OutputFormat::Json => json_result(&ports),
        OutputFormat::Text => {
            for port in &ports {
                match &port.description {
                    Some(desc) => println!("{} [{}] {}", port.name, port.kind, desc),
                    None => println!("{} [{}]", port.name, port.kind),
                }
            }
            CliResult::success()
        }
    }
}

#[cfg(not(feature = "serial"))]
fn list_ports(_cli: &Cli) -> CliResult {
    CliResult::error(ExitCodes::UNSUPPORTED, "Built without serial port support")
}

fn list_algorithms(cli: &Cli) -> CliResult {
    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ChecksumAlgorithm::all()
                .iter()
                .map(|a| serde_json::json!({ "id": a.id(), "name": a.name(), "width": a.width() }))
                .collect();
            json_result(&json)
        }
        OutputFormat::Text => {
            for alg in ChecksumAlgorithm::all() {
                println!("{:>2}  {:<20} {:>2} bits", alg.id(), alg.name(), alg.width());
            }
            CliResult::success()
        }
    }
}

fn checksum(
    cli: &Cli,
    algorithm: &str,
    text_format: &str,
    little_endian: bool,
    start: usize,
    end: Option<usize>,
    data: Option<&str>,
) -> CliResult {
    let Some(algorithm) = parse_algorithm(algorithm) else {
        return invalid("checksum algorithm", algorithm);
    };
    let Some(format) = parse_text_format(text_format) else {
        return invalid("text format", text_format);
    };
    let Some(data) = data else {
        return CliResult::error(ExitCodes::INVALID_ARGS, "No input data");
    };

    let bytes = encode(data, format);
    let ctx = ChecksumContext::new(algorithm, &bytes)
        .range(start, end.unwrap_or(usize::MAX))
        .big_endian(!little_endian);
    let result = hex::encode_upper(calc_checksum(&ctx));

    match cli.format {
        OutputFormat::Json => CliResult::success_with_message(
            serde_json::json!({ "algorithm": algorithm.name(), "checksum": result }).to_string(),
        ),
        OutputFormat::Text => CliResult::success_with_message(format!("{}: {}", algorithm.name(), result)),
    }
}

#[allow(clippy::too_many_arguments)]
fn frame(
    cli: &Cli,
    payload: &str,
    text_format: &str,
    prefix: &str,
    suffix: &str,
    escape: bool,
    crc: Option<&str>,
    little_endian: bool,
) -> CliResult {
    let Some(format) = parse_text_format(text_format) else {
        return invalid("text format", text_format);
    };
    let mut params = FrameParameters::new(payload, format)
        .prefix(prefix)
        .suffix(suffix)
        .escape(escape);
    if let Some(name) = crc {
        let Some(algorithm) = parse_algorithm(name) else {
            return invalid("checksum algorithm", name);
        };
        params = params.crc(algorithm, !little_endian);
    }

    let frame = params.compose();
    let bytes = hex::encode_upper(frame.to_bytes());
    match cli.format {
        OutputFormat::Json => CliResult::success_with_message(
            serde_json::json!({
                "preview": frame.preview(),
                "crc": params.append_crc.then(|| frame.crc_label()),
                "bytes": bytes,
            })
            .to_string(),
        ),
        OutputFormat::Text => {
            println!("{}", frame.preview());
            if params.append_crc {
                println!("{}", frame.crc_label());
            }
            CliResult::success_with_message(bytes)
        }
    }
}

fn init_config(cli: &Cli, force: bool) -> CliResult {
    let path = match config_path(cli) {
        Ok(path) => path,
        Err(e) => return e,
    };
    if path.exists() && !force {
        return CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{} already exists, use --force to overwrite", path.display()),
        );
    }
    match AppConfig::default().save_to(&path) {
        Ok(()) => CliResult::success_with_message(format!("Wrote {}", path.display())),
        Err(e) => CliResult::from(e),
    }
}

async fn run(cli: &Cli, kind: Option<&str>, send: Option<&str>, timeout: Option<u64>) -> CliResult {
    let mut app = match config_path(cli).and_then(|p| load_config(&p)) {
        Ok(app) => app,
        Err(e) => return e,
    };
    if let Some(value) = kind {
        let Some(kind) = parse_kind(value) else {
            return invalid("transport type", value);
        };
        app.switch_to(kind);
    }

    let registry = Arc::new(TransportRegistry::with_builtin());
    let mut session = DeviceSession::new(registry.clone(), app.transport.clone());
    let mut events = session.subscribe();
    let cancel = CancellationToken::new();

    let data_log = if app.data_log.enabled {
        match DataLogger::open(app.data_log.clone()) {
            Ok(logger) => Some(Arc::new(logger).spawn(session.subscribe(), cancel.child_token())),
            Err(e) => {
                warn!(path = %app.data_log.path.display(), "data log disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    if let Err(e) = session.open_device().await {
        error!("failed to open {}: {}", app.transport.endpoint(), e);
        cancel.cancel();
        return CliResult::from(e);
    }

    let handle = session.handle();
    let emitter = (!app.emitter.is_empty())
        .then(|| Emitter::new(app.emitter.clone()).spawn(handle.clone(), cancel.child_token()));
    let mut tasks = Vec::new();
    if !app.responder.is_empty() {
        tasks.push(Responder::new(app.responder.clone()).spawn(
            session.read_router().subscribe("responder"),
            handle.clone(),
            cancel.child_token(),
        ));
    }
    if let Some(interval) = app.input.cycle_interval_ms {
        tasks.push(handle.spawn_cycle(
            app.input.frame.clone(),
            Duration::from_millis(interval),
            cancel.child_token(),
        ));
    }
    let mut repeaters =
        RepeaterSet::open_all(&registry, &app.repeaters, session.read_router(), &handle).await;
    let chart = ChartSink::for_transport(&app.transport).map(|sink| {
        let sink = Arc::new(sink);
        session.read_router().attach("chart", sink.clone());
        sink
    });

    if let Some(text) = send {
        let mut frame = app.input.frame.clone();
        frame.payload = text.to_string();
        if !handle.send_frame(&frame) {
            warn!("initial frame was not sent");
        }
    }

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let output = &app.output;
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break CliResult::success();
            }
            () = &mut deadline => break CliResult::success(),
            event = events.recv() => match event {
                Ok(TransportEvent::BytesRead { bytes, from, .. }) => {
                    print_traffic(cli, Direction::Rx, &from, &bytes, output.text_format, output.timestamps);
                }
                Ok(TransportEvent::BytesWritten { bytes, to }) if output.show_tx => {
                    print_traffic(cli, Direction::Tx, &to, &bytes, output.text_format, output.timestamps);
                }
                Ok(TransportEvent::PeerConnected(peer)) => info!("peer {} connected from {}", peer.id, peer.address),
                Ok(TransportEvent::PeerDisconnected(id)) => info!("peer {} disconnected", id),
                Ok(TransportEvent::Warning(msg)) => warn!("{}", msg),
                Ok(TransportEvent::Error(msg)) => {
                    break CliResult::error(ExitCodes::CONNECTION_FAILED, msg);
                }
                Ok(TransportEvent::Closed) => {
                    break CliResult::error(ExitCodes::CONNECTION_FAILED, "Device closed");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("output skipped {} events", n),
                Err(RecvError::Closed) => break CliResult::success(),
            },
        }
    };

    cancel.cancel();
    repeaters.close_all().await;
    for task in tasks {
        let _ = task.await;
    }
    if let Some(task) = emitter {
        let _ = task.await;
    }
    let (rx, tx) = session.statistics();
    session.close_device().await;
    if let Some(task) = data_log {
        let _ = task.await;
    }
    if let Some(chart) = chart {
        info!(samples = chart.samples(), latest = ?chart.latest(), "chart series");
    }
    info!(rx_bytes = rx.bytes, tx_bytes = tx.bytes, "session finished");
    result
}

fn print_traffic(cli: &Cli, direction: Direction, endpoint: &str, bytes: &Bytes, format: TextFormat, timestamps: bool) {
    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "direction": direction,
                "endpoint": endpoint,
                "hex": hex::encode_upper(bytes),
            })
        ),
        OutputFormat::Text => println!("{}", render_traffic(direction, endpoint, bytes, format, timestamps)),
    }
}
