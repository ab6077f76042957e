use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use packetcomms_frame::{TypeRegistry, CONTROL_NAME, INVALID_NAME};
use packetcomms_mux::{ConnectionConfig, MuxerConfig};

use crate::endpoint::Endpoint;
use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one connection and print every received message.
    Listen(ListenArgs),
    /// Connect and post a payload as one or more messages.
    Send(SendArgs),
    /// Accept one connection and write one message type to stdout as a byte stream.
    Stream(StreamArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Stream(args) => stream::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Where to connect and which message types both peers agree on.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Address: HOST:PORT for TCP, or unix:PATH.
    pub addr: Endpoint,
    /// Message type names in id order (comma-separated). Must match the peer.
    #[arg(long, value_delimiter = ',', required = true)]
    pub types: Vec<String>,
    /// Idle time before a heartbeat is sent (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub heartbeat: String,
}

impl LinkArgs {
    pub fn registry(&self) -> CliResult<Arc<TypeRegistry>> {
        build_registry(&self.types)
    }

    pub fn connection_config(&self) -> CliResult<ConnectionConfig> {
        Ok(ConnectionConfig {
            muxer: MuxerConfig {
                heartbeat_interval: parse_duration(&self.heartbeat)?,
                ..MuxerConfig::default()
            },
            ..ConnectionConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Print only these types (comma-separated). Default: every type.
    #[arg(long, value_delimiter = ',')]
    pub only: Option<Vec<String>>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Message type to post.
    #[arg(long = "type", short = 't', value_name = "NAME")]
    pub type_name: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<std::path::PathBuf>,
    /// Split the payload into messages of at most N bytes.
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,
    /// Post the payload N times.
    #[arg(long, default_value = "1")]
    pub repeat: usize,
    /// How long to wait for the peer's hello and for the send queue to drain.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Message type carrying the stream.
    #[arg(long = "type", short = 't', value_name = "NAME")]
    pub type_name: String,
    /// Give up when no data arrives for this long (e.g. 2s, 500ms).
    #[arg(long, default_value = "5s")]
    pub stall_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn build_registry(names: &[String]) -> CliResult<Arc<TypeRegistry>> {
    for (index, name) in names.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(CliError::new(USAGE, "--types entries must not be empty"));
        }
        if name == INVALID_NAME || name == CONTROL_NAME {
            return Err(CliError::new(USAGE, format!("type name '{name}' is reserved")));
        }
        if names[..index].contains(name) {
            return Err(CliError::new(USAGE, format!("type name '{name}' is listed twice")));
        }
    }
    Ok(Arc::new(TypeRegistry::new(names.iter().cloned())))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
