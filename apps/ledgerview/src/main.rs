use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};
use ledgerview::client::{LedgerviewClient, Step};
use ledgerview::config::Config;
use ledgerview::connection::WebSocketConnection;
use ledgerview::model::ListKind;
use ledgerview::state::{SessionState, common_journal_prefix};
use ledgerview::telemetry::{self, LogConfig, LogLevel};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "ledgerview",
    about = "Follow a reconciliation backend's pending, uncleared, invalid and error lists",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "LEDGERVIEW_SERVER",
        help = "Websocket URL of the reconciliation backend"
    )]
    server: Option<String>,

    #[arg(
        long,
        value_name = "ROWS",
        help = "Rows kept synchronized per list before a viewport is reported"
    )]
    viewport: Option<u64>,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "LEDGERVIEW_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "LEDGERVIEW_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.logging.to_config())?;

    let mut config = Config::from_env();
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(viewport) = cli.viewport {
        config.viewport = viewport;
    }
    debug!(server = %config.server_url, "connecting");

    let connection = WebSocketConnection::connect(&config.server_url).await?;
    let mut client = LedgerviewClient::new(Arc::new(connection), &config);

    let mut last_status = String::new();
    loop {
        match client.step().await {
            Step::Disconnected => break,
            Step::Delta(_) | Step::Progress => {
                let status = format_status(client.session());
                if status != last_status {
                    println!("{status}");
                    last_status = status;
                }
            }
        }
    }
    Ok(())
}

fn format_status(session: &SessionState) -> String {
    if session.closed() {
        return "connection closed, waiting to reconnect".to_string();
    }
    let mut parts = Vec::new();
    for kind in ListKind::ALL {
        if let Some(gc) = session.list(kind) {
            parts.push(format!("{kind} {} (gen {})", gc.count(), gc.generation()));
        }
    }
    if let Some(view) = session.candidates() {
        parts.push(format!(
            "candidates {} for pending #{}",
            view.data.candidates.len(),
            view.pending_index
        ));
    } else {
        parts.push("candidates unavailable".to_string());
    }
    let prefix = common_journal_prefix(session.journal_filenames());
    if !prefix.is_empty() {
        parts.push(format!("journal {prefix}*"));
    }
    if let Some(message) = session.message() {
        parts.push(message.to_string());
    }
    parts.join(" | ")
}
