//! Accept loop over a listening socket, spawning one [`Session`] per
//! connection (C6).

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{AsyncRead, AsyncWrite};
use miltergate_bytes::{debug, warn};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::session::Session;
use crate::Milter;

/// Where to listen for incoming milter connections.
///
/// MTAs are configured with either a `inet:` or `unix:` milter socket
/// spec; this mirrors that choice.
#[derive(Debug, Clone)]
pub enum BindAddr {
    /// Listen on a TCP socket.
    Tcp(SocketAddr),
    /// Listen on a Unix domain socket. The path must not already exist.
    Unix(PathBuf),
}

/// Tunables for [`listen`].
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Treat `Abort` like `Quit`, matching what postfix expects. See
    /// [`Session::default_postfix`].
    pub quit_on_abort: bool,
    /// Largest single frame payload this server will accept or emit.
    pub max_buffer_size: usize,
    /// How long to wait for the next frame from the MTA before giving up
    /// on a connection.
    pub read_timeout: Duration,
    /// How long to wait for the MTA to accept a reply before giving up on
    /// a connection.
    pub write_timeout: Duration,
    /// A process-wide shutdown signal. Once it reports `true`, both
    /// `listen_tcp` and `listen_unix` stop accepting new connections and
    /// `listen` returns `Ok(())`; connections already spawned run to
    /// completion on their own.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            quit_on_abort: true,
            max_buffer_size: 2_usize.pow(16) + 128,
            read_timeout: Duration::from_secs(7210),
            write_timeout: Duration::from_secs(600),
            shutdown: None,
        }
    }
}

/// Resolves once `shutdown` reports a change, or never if there is none.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(signal) => {
            let _ = signal.changed().await;
        }
        None => std::future::pending().await,
    }
}

/// Accept connections on `bind` until the listener itself fails.
///
/// `connect` is called once per accepted connection to build the
/// [`Milter`] implementation that will own it; each connection is then
/// driven to completion on its own [`tokio::task`]. A single
/// connection's I/O error, codec error, or propagated implementation
/// error is logged and dropped — it never brings down the listener or
/// any sibling connection.
///
/// # Errors
/// Returns an error only when accepting a new connection itself fails
/// (the listening socket is gone, out of file descriptors, and so on).
pub async fn listen<M, F>(bind: BindAddr, connect: F, config: ListenConfig) -> io::Result<()>
where
    M: Milter + 'static,
    F: Fn() -> M + Send + Sync + 'static,
{
    let connect = Arc::new(connect);

    match bind {
        BindAddr::Tcp(addr) => listen_tcp(addr, &connect, &config).await,
        BindAddr::Unix(path) => listen_unix(&path, &connect, &config).await,
    }
}

async fn listen_tcp<M, F>(
    addr: SocketAddr,
    connect: &Arc<F>,
    config: &ListenConfig,
) -> io::Result<()>
where
    M: Milter + 'static,
    F: Fn() -> M + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    debug!("Listening on {addr}");
    let mut shutdown = config.shutdown.clone();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = result?;
                debug!("Accepted connection from {peer}");
                spawn_connection(stream.compat(), Arc::clone(connect), config.clone());
            }
            () = wait_for_shutdown(&mut shutdown) => {
                debug!("Shutdown signalled, no longer accepting connections on {addr}");
                return Ok(());
            }
        }
    }
}

async fn listen_unix<M, F>(
    path: &PathBuf,
    connect: &Arc<F>,
    config: &ListenConfig,
) -> io::Result<()>
where
    M: Milter + 'static,
    F: Fn() -> M + Send + Sync + 'static,
{
    let listener = UnixListener::bind(path)?;
    debug!("Listening on {}", path.display());
    let mut shutdown = config.shutdown.clone();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, _peer) = result?;
                debug!("Accepted connection");
                spawn_connection(stream.compat(), Arc::clone(connect), config.clone());
            }
            () = wait_for_shutdown(&mut shutdown) => {
                debug!("Shutdown signalled, no longer accepting connections on {}", path.display());
                return Ok(());
            }
        }
    }
}

fn spawn_connection<M, F, RW>(socket: RW, connect: Arc<F>, config: ListenConfig)
where
    M: Milter + 'static,
    F: Fn() -> M + Send + Sync + 'static,
    RW: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut milter = connect();
        let mut session = Session::new(&mut milter, config.quit_on_abort, config.max_buffer_size)
            .with_timeouts(config.read_timeout, config.write_timeout);

        if let Err(err) = session.run(socket).await {
            warn!("Connection ended with an error: {err}");
        }
    });
}
