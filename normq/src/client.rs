//! One client run: scan, submit, drain.
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::amqp::AmqpSession;
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::ClientResult;
use crate::protocol::ControlAction;
use crate::scanner::FileScanner;
use crate::sink::ResultSink;
use crate::transport::Transport;

/// Version reported by `--version`
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a run should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Check the given files and directories (empty means the working directory)
    Check {
        paths: Vec<PathBuf>,
        rules: Vec<String>,
    },
    /// Print client and server versions
    Version,
    /// Print the rules known to the server
    ListRules,
}

/// Counts describing a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_submitted: usize,
    pub controls_submitted: usize,
    pub files_skipped: usize,
    pub replies_handled: usize,
    pub rejected: usize,
    pub stopped: bool,
}

/// Splits a `--rules` argument on commas; items are kept as given
pub fn parse_rules(list: &str) -> Vec<String> {
    list.split(',').map(str::to_string).collect()
}

/// Runs `request` over `transport`, rendering through `sink`.
///
/// Returns once every submitted request has been answered.
pub fn run<T: Transport>(
    request: &RunRequest,
    transport: T,
    sink: Arc<ResultSink>,
    scanner: &FileScanner,
    capacity: NonZeroUsize,
) -> ClientResult<RunSummary> {
    let mut dispatcher = Dispatcher::new(transport, Arc::clone(&sink), capacity);
    let mut rejected = 0;

    match request {
        RunRequest::Version => {
            sink.line(&format!("Client: {CLIENT_VERSION}"))?;
            sink.label("Server:")?;
            dispatcher.submit_control(ControlAction::Version)?;
        }
        RunRequest::ListRules => {
            sink.label("Server Rules:")?;
            dispatcher.submit_control(ControlAction::Help)?;
        }
        RunRequest::Check { paths, rules } => {
            let outcome = scanner.scan(paths.as_slice())?;
            info!("Checking {} files", outcome.files.len());
            for path in &outcome.rejected {
                sink.emit_warning(path)?;
            }
            rejected = outcome.rejected.len();
            dispatcher.dispatch_files(&outcome.files, rules)?;
        }
    }

    dispatcher.drain()?;
    sink.finish()?;

    let stats = dispatcher.stats();
    let summary = RunSummary {
        files_submitted: stats.files_submitted,
        controls_submitted: stats.controls_submitted,
        files_skipped: stats.files_skipped,
        replies_handled: sink.replies_handled(),
        rejected,
        stopped: sink.stop_requested(),
    };
    debug!("Run finished: {:?}", summary);
    Ok(summary)
}

/// Connects to the configured broker and runs `request`, printing to stdout
pub fn run_with_broker(config: &ClientConfig, request: &RunRequest) -> ClientResult<RunSummary> {
    let scanner = FileScanner::new()?;
    let sink = Arc::new(ResultSink::stdout(config.display)?);

    let session = AmqpSession::connect(config)?;
    let summary = {
        let transport = session.transport()?;
        run(request, transport, sink, &scanner, config.jobs)?
    };
    session.close()?;
    Ok(summary)
}
