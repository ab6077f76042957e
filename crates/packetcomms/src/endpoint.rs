use std::fmt;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use packetcomms_frame::TypeRegistry;
use packetcomms_mux::{Connection, ConnectionConfig, Demuxer};
use tracing::{debug, info};

use crate::exit::{io_error, mux_error, CliResult};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// A TCP `HOST:PORT` or a `unix:PATH` socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Some(path) = input.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("unix: address needs a socket path".to_string());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if !input.contains(':') {
            return Err(format!("'{input}' is not HOST:PORT or unix:PATH"));
        }
        Ok(Self::Tcp(input.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl Endpoint {
    pub fn connect(&self, registry: Arc<TypeRegistry>, config: ConnectionConfig) -> CliResult<Connection> {
        let context = format!("connect to {self} failed");
        let connection = match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr).map_err(|err| io_error(&context, err))?;
                let _ = stream.set_nodelay(true);
                Connection::with_config(stream, registry, config)
            }
            Self::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(|err| io_error(&context, err))?;
                Connection::with_config(stream, registry, config)
            }
        };
        connection.map_err(|err| mux_error(&context, err))
    }

    /// Wait for one inbound connection and build it, running `subscribe`
    /// before our Hello is sent. Returns `Ok(None)` if `running` is cleared
    /// first.
    pub fn accept_one<F, R>(
        &self,
        registry: Arc<TypeRegistry>,
        config: ConnectionConfig,
        running: &AtomicBool,
        subscribe: F,
    ) -> CliResult<Option<(Connection, R)>>
    where
        F: FnOnce(&Demuxer) -> R,
    {
        let context = format!("accept on {self} failed");
        let built = match self {
            Self::Tcp(addr) => {
                let listener = TcpListener::bind(addr).map_err(|err| io_error(&context, err))?;
                listener
                    .set_nonblocking(true)
                    .map_err(|err| io_error(&context, err))?;
                if let Ok(local) = listener.local_addr() {
                    info!(addr = %local, "listening");
                }
                let Some(stream) = accept_polling(running, || listener.accept().map(|(s, _)| s))
                    .map_err(|err| io_error(&context, err))?
                else {
                    return Ok(None);
                };
                stream
                    .set_nonblocking(false)
                    .map_err(|err| io_error(&context, err))?;
                let _ = stream.set_nodelay(true);
                Connection::with_subscriptions(stream, registry, config, subscribe)
            }
            Self::Unix(path) => {
                let listener = bind_unix(path).map_err(|err| io_error(&context, err))?;
                info!(path = %path.display(), "listening");
                let accepted = accept_polling(running, || listener.accept().map(|(s, _)| s));
                let _ = std::fs::remove_file(path);
                let Some(stream) = accepted.map_err(|err| io_error(&context, err))? else {
                    return Ok(None);
                };
                stream
                    .set_nonblocking(false)
                    .map_err(|err| io_error(&context, err))?;
                Connection::with_subscriptions(stream, registry, config, subscribe)
            }
        };
        built.map(Some).map_err(|err| mux_error(&context, err))
    }
}

fn accept_polling<S>(running: &AtomicBool, mut accept: impl FnMut() -> io::Result<S>) -> io::Result<Option<S>> {
    while running.load(Ordering::SeqCst) {
        match accept() {
            Ok(stream) => return Ok(Some(stream)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    debug!("accept interrupted");
    Ok(None)
}

/// Bind a Unix listener, replacing a stale socket file nobody is serving.
fn bind_unix(path: &std::path::Path) -> io::Result<UnixListener> {
    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).is_ok() {
                return Err(err);
            }
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
            UnixListener::bind(path)?
        }
        Err(err) => return Err(err),
    };
    listener.set_nonblocking(true)?;
    Ok(listener)
}
