use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use normq::{
    client::{parse_rules, run_with_broker, RunRequest},
    config::{ClientConfig, ConfigOverrides, DisplayMode},
    ClientError,
};
use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Files or directories to check (default: current directory)
    files_or_directories: Vec<PathBuf>,

    /// Rules to disable (comma separated)
    #[arg(short = 'R', long)]
    rules: Option<String>,

    /// Print client and server versions
    #[arg(short = 'v', long)]
    version: bool,

    /// Print the rules known to the server
    #[arg(long, conflicts_with = "version")]
    list_rules: bool,

    /// Broker host name
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Rewrite the current line and highlight output
    #[arg(long, conflicts_with = "plain")]
    color: bool,

    /// Plain output without escape sequences
    #[arg(long)]
    plain: bool,

    /// Maximum number of unanswered requests (default: CPU cores)
    #[arg(short = 'j', long)]
    jobs: Option<NonZeroUsize>,

    /// Additional configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let display = if self.plain {
            Some(DisplayMode::Plain)
        } else if self.color {
            Some(DisplayMode::Color)
        } else {
            None
        };

        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            jobs: self.jobs,
            log_level: self.log_level.clone(),
            display,
        }
    }

    fn request(&self) -> RunRequest {
        if self.version {
            RunRequest::Version
        } else if self.list_rules {
            RunRequest::ListRules
        } else {
            RunRequest::Check {
                paths: self.files_or_directories.clone(),
                rules: self.rules.as_deref().map(parse_rules).unwrap_or_default(),
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            let unreachable = err
                .downcast_ref::<ClientError>()
                .is_some_and(ClientError::is_unreachable);
            if unreachable {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = ClientConfig::load_from(cli.config.as_deref())?.merge_with_cli(cli.overrides());
    config.validate()?;
    setup_logging(&config.log_level)?;
    debug!(
        host = %config.host,
        port = config.port,
        jobs = %config.jobs,
        "Effective configuration"
    );

    let request = cli.request();
    let summary = run_with_broker(&config, &request)?;

    info!(
        files = summary.files_submitted,
        replies = summary.replies_handled,
        rejected = summary.rejected,
        stopped = summary.stopped,
        "Run complete"
    );
    Ok(())
}

fn setup_logging(level: &str) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives),
        Err(_) => EnvFilter::try_new(format!("normq={level},warn")),
    }
    .with_context(|| format!("invalid log level {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}
