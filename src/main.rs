use bloom::cli::{self, WebArgs};
use bloom::config::Settings;
use bloom::logging::{self, LogFile, LoggingOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, trace};

/// Provision this host into a Kubernetes node
#[derive(Parser)]
#[command(name = "bloom", version)]
#[command(about = "Provision this host into a Kubernetes node with a live web dashboard", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file used to pre-fill the wizard (or run headless)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Submit the configuration without waiting for the browser and exit when done
    #[arg(long)]
    one_shot: bool,

    /// Archive the existing log and start over with the wizard
    #[arg(long)]
    reconfigure: bool,

    /// Port for the web interface (fails if in use). Default: first free from 62078
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Directory holding bloom.yaml and bloom.log
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the installation in the terminal without the web interface
    Cli,
    /// Show the status of the installation recorded in bloom.log
    Status,
    /// List the steps that can be used in DISABLED_STEPS / ENABLED_STEPS
    Steps,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let mut settings = Settings::new(args.work_dir.clone().unwrap_or_else(|| PathBuf::from(".")));
    settings.merge_env_vars();
    if let Some(port) = args.port {
        settings.base_port = port;
        settings.fixed_port = true;
    }

    let log_file = LogFile::new(settings.log_path());
    let writes_log = matches!(args.command, None | Some(Commands::Cli));
    if matches!(args.command, Some(Commands::Cli)) {
        if let Err(e) = log_file.open() {
            eprintln!("Warning: could not open {}: {}", log_file.path().display(), e);
        }
    }

    let options = LoggingOptions {
        verbosity: args.verbose,
        quiet_console: matches!(args.command, Some(Commands::Cli)),
        log_file: writes_log.then(|| log_file.clone()),
    };
    if let Err(e) = logging::init(options) {
        eprintln!("Warning: could not initialize logging: {e}");
    }

    debug!("Bloom started with verbosity level: {}", args.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let catalog = cli::default_catalog();
    let result = match args.command {
        Some(Commands::Steps) => {
            cli::list_steps(&catalog);
            Ok(0)
        }
        Some(Commands::Status) => cli::run_status(&settings).map(|()| 0),
        Some(Commands::Cli) => run_headless(&settings, args.config, catalog).await,
        None => {
            let web = WebArgs {
                config: args.config,
                one_shot: args.one_shot,
                reconfigure: args.reconfigure,
            };
            cli::run_web(settings, web, log_file, catalog)
                .await
                .map(|outcome| outcome.exit_code())
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run_headless(
    settings: &Settings,
    config: Option<PathBuf>,
    catalog: Vec<bloom::step::Step>,
) -> anyhow::Result<i32> {
    let snapshot = cli::load_prefill(settings, config.as_deref())?.unwrap_or_default();
    let outcome = cli::run_headless(settings, snapshot, catalog).await?;
    Ok(outcome.exit_code())
}
