//! Connection dispatcher.
//!
//! One acceptor loop hands connections to at most `workers` concurrent
//! exchange tasks. Each task reads exactly one request, answers it and closes
//! the socket. `EXIT` (or Ctrl-C) starts a coordinated shutdown: the acceptor
//! stops, in-flight exchanges get a grace period to finish, and only then is
//! the registry written back, once.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use crate::codec::{read_request, write_response, CodecResult, Lookup, ProtocolError, Request, Response};
use crate::config::ServerConfig;
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::store::FileStore;

/// Cloneable trigger for the coordinated shutdown.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}

/// What the shutdown phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub entries: usize,
    pub persisted: bool,
    pub aborted: usize,
}

struct ServerContext {
    store: FileStore,
    logger: Arc<dyn Logger>,
    io_timeout: Option<Duration>,
    max_blob: usize,
    shutdown: ShutdownHandle,
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    workers: usize,
    grace: Duration,
}

/// Bind `addr` with an explicit listen backlog.
pub async fn bind_listener(addr: &str, backlog: u32) -> Result<TcpListener> {
    let sock_addr = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolve {}", addr))?
        .next()
        .with_context(|| format!("no address for {}", addr))?;
    let socket = match sock_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket
        .bind(sock_addr)
        .with_context(|| format!("bind {}", sock_addr))?;
    Ok(socket.listen(backlog)?)
}

impl Server {
    pub fn new(
        listener: TcpListener,
        store: FileStore,
        logger: Arc<dyn Logger>,
        config: &ServerConfig,
    ) -> Self {
        let ctx = ServerContext {
            store,
            logger,
            io_timeout: config.io_timeout(),
            max_blob: config.max_blob_size,
            shutdown: ShutdownHandle::new(),
        };
        Self {
            listener,
            ctx: Arc::new(ctx),
            workers: config.workers.max(1),
            grace: config.shutdown_grace(),
        }
    }

    /// Open the store, the audit log and the listener described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(&config.data_dir, &config.registry_path).await?;
        // Choose logger once; an unusable audit path only disables auditing
        let logger: Arc<dyn Logger> = match config.audit_log {
            Some(ref p) => match TextLogger::new(p) {
                Ok(l) => Arc::new(l),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "audit log unavailable");
                    Arc::new(NoopLogger)
                }
            },
            None => Arc::new(NoopLogger),
        };
        let listener = bind_listener(&config.bind, config.backlog).await?;
        Ok(Self::new(listener, store, logger, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.ctx.shutdown.clone()
    }

    /// Serve until a client sends `EXIT`.
    pub async fn run(self) -> Result<ShutdownReport> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until_ctrl_c(self) -> Result<ShutdownReport> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
            info!("interrupted");
        })
        .await
    }

    /// Serve until a client sends `EXIT` or `signal` completes.
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()> + Send,
    {
        let handle = self.shutdown_handle();
        let serve = self.serve();
        tokio::pin!(serve);
        tokio::pin!(signal);
        tokio::select! {
            res = &mut serve => return res,
            _ = &mut signal => handle.trigger(),
        }
        serve.await
    }

    async fn serve(self) -> Result<ShutdownReport> {
        let Server {
            listener,
            ctx,
            workers,
            grace,
        } = self;
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut stop = ctx.shutdown.subscribe();

        info!(addr = ?listener.local_addr().ok(), workers, "filevault listening");

        loop {
            // A free worker slot comes first; excess peers wait in the backlog
            let permit = tokio::select! {
                _ = stopped(&mut stop) => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };
            let (stream, peer) = tokio::select! {
                _ = stopped(&mut stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            while let Some(res) = tasks.try_join_next() {
                log_join(res);
            }
            let _ = stream.set_nodelay(true);
            let ctx = Arc::clone(&ctx);
            let span = tracing::info_span!("conn", %peer);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    handle_connection(stream, &ctx).await;
                }
                .instrument(span),
            );
        }

        drop(listener);
        info!(in_flight = tasks.len(), "shutting down");

        let mut aborted = 0;
        let drained = timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_join(res);
            }
        })
        .await;
        if drained.is_err() {
            aborted = tasks.len();
            warn!(aborted, grace_ms = grace.as_millis() as u64, "aborting stalled exchanges");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        let saved = ctx.store.persist().await;
        let entries = ctx.store.snapshot().len();
        let persisted = match saved {
            Ok(()) => {
                info!(entries, path = %ctx.store.registry_path().display(), "registry saved");
                true
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "registry save failed");
                false
            }
        };
        ctx.logger.shutdown(entries, persisted);

        Ok(ShutdownReport {
            entries,
            persisted,
            aborted,
        })
    }
}

fn log_join(res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            warn!(error = %e, "exchange task panicked");
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) {
    match exchange(&mut stream, ctx).await {
        Ok(()) => {}
        Err(e) => match e.downcast_ref::<ProtocolError>() {
            Some(pe) if pe.is_disconnect() => debug!("peer closed before a full request"),
            _ => warn!(error = %format!("{:#}", e), "exchange abandoned"),
        },
    }
    let _ = stream.shutdown().await;
}

async fn timed<T, F>(deadline: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = CodecResult<T>>,
{
    match deadline {
        None => Ok(fut.await?),
        Some(d) => match timeout(d, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => bail!("{} timeout ({} ms)", what, d.as_millis()),
        },
    }
}

fn target(lookup: Lookup, identifier: &str) -> String {
    format!("{}:{}", lookup.as_str(), identifier)
}

/// One request, one response.
async fn exchange(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let request = timed(ctx.io_timeout, "read", read_request(stream, ctx.max_blob)).await?;
    let action = request.action().as_str();
    debug!(action, "request");

    let response = match request {
        Request::Exit => {
            info!("exit requested");
            ctx.shutdown.trigger();
            return Ok(());
        }
        Request::Put { filename, content } => {
            let bytes = content.len();
            match ctx.store.create(&filename, content).await {
                Ok(id) => {
                    info!(id, filename = %filename, bytes, "stored");
                    ctx.logger.stored(id, &filename, bytes);
                    Response::Stored(id)
                }
                Err(e) => {
                    debug!(filename = %filename, error = %e, "put rejected");
                    ctx.logger.rejected(action, &filename, e.status());
                    e.to_response()
                }
            }
        }
        Request::Get { lookup, identifier } => match ctx.store.fetch(lookup, &identifier).await {
            Ok(content) => {
                ctx.logger.fetched(&target(lookup, &identifier), content.len());
                Response::Content(content)
            }
            Err(e) => {
                debug!(error = %e, "get rejected");
                ctx.logger.rejected(action, &target(lookup, &identifier), e.status());
                e.to_response()
            }
        },
        Request::Delete { lookup, identifier } => match ctx.store.delete(lookup, &identifier).await {
            Ok(()) => {
                info!(file = %target(lookup, &identifier), "deleted");
                ctx.logger.deleted(&target(lookup, &identifier));
                Response::Deleted
            }
            Err(e) => {
                debug!(error = %e, "delete rejected");
                ctx.logger.rejected(action, &target(lookup, &identifier), e.status());
                e.to_response()
            }
        },
    };

    debug!(status = response.status(), "response");
    timed(ctx.io_timeout, "write", write_response(stream, &response)).await
}
