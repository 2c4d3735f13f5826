use anyhow::{Context, Result};
use clap::Parser;
use eyecap::{AppOptions, EyecapConfig, RecorderApp};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "eyecap")]
#[command(about = "Guided multi-stage eye image recorder for WebSocket cameras")]
#[command(version)]
#[command(long_about = "Connects to a camera that streams frames over WebSocket, walks the \
subject through a sequence of prompted recording stages and saves rotated, cropped 240x240 \
JPEG frames per stage together with a JSON session report.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "eyecap.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, value_name = "PATH", help = "Also write logs to this file")]
    log_file: Option<String>,

    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, value_name = "URL", help = "Device address, overrides device.address")]
    address: Option<String>,

    #[arg(long, help = "Subject name, overrides user.username")]
    username: Option<String>,

    #[arg(long, help = "Subject contact, overrides user.contact")]
    contact: Option<String>,

    #[arg(long, value_name = "DIR", help = "Recording folder, overrides storage.path")]
    save_path: Option<String>,

    #[arg(long, help = "Start a session as soon as the device is connected")]
    auto_start: bool,

    #[arg(long, help = "Disable keyboard controls")]
    no_keyboard: bool,

    #[arg(long, help = "Exit after all stages have completed")]
    exit_on_complete: bool,

    #[arg(long, help = "Ring the terminal bell on prompts and countdown ticks")]
    bell: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting eyecap v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = EyecapConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    apply_overrides(&mut config, &args);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let options = AppOptions {
        keyboard: !args.no_keyboard,
        auto_start: args.auto_start,
        exit_on_complete: args.exit_on_complete,
        bell: args.bell,
    };

    let mut app = RecorderApp::new(config, options).map_err(|e| {
        error!("Failed to create recorder: {}", e);
        e
    })?;

    app.initialize().await?;
    app.start().await.map_err(|e| {
        error!("Failed to start recorder: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("eyecap exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn apply_overrides(config: &mut EyecapConfig, args: &Args) {
    if let Some(address) = &args.address {
        config.device.address = address.clone();
    }
    if let Some(username) = &args.username {
        config.user.username = username.clone();
    }
    if let Some(contact) = &args.contact {
        config.user.contact = contact.clone();
    }
    if let Some(path) = &args.save_path {
        config.storage.path = path.clone();
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        // Prompts and stage progress are logged at info
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("eyecap={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn print_default_config() -> Result<()> {
    println!("# eyecap configuration file");
    println!("# Every key can also be set as EYECAP_<SECTION>__<KEY>");
    println!("# Add [[stages]] tables to replace the built-in five-stage eye plan");
    println!();

    let rendered = toml::to_string_pretty(&EyecapConfig::default())
        .context("failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}
