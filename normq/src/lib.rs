pub mod amqp;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod protocol;
pub mod scanner;
pub mod sink;
pub mod transport;

pub use client::{run, run_with_broker, RunRequest, RunSummary};
pub use config::{ClientConfig, DisplayMode};
pub use dispatcher::Dispatcher;
pub use errors::{ClientError, ClientResult};
pub use scanner::{FileScanner, ScanOutcome};
pub use sink::ResultSink;
pub use transport::{MemoryTransport, Transport};
