//! The rotator daemon: one shared listener, a fixed pool of accept workers.

use crate::proxy::RotationPool;
use crate::server::session;
use crate::socks5::server::AuthPolicy;
use crate::util::{Result, SocksRotError, bind_listener, configure_tcp_stream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Runtime configuration, fixed after startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub workers: usize,
    /// Caps every negotiation step; never applied to an established relay.
    pub io_timeout: Duration,
    pub retry_on_upstream_failure: bool,
    pub auth: AuthPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 1080,
            workers: 8,
            io_timeout: Duration::from_secs(10),
            retry_on_upstream_failure: false,
            auth: AuthPolicy::default(),
        }
    }
}

/// The listening daemon. Owns the upstream pool and the shutdown signal.
pub struct Server {
    config: ServerConfig,
    pool: Arc<RotationPool>,
    listener: Arc<TcpListener>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Resolve the configured address and bind the shared listener.
    pub async fn bind(config: ServerConfig, pool: RotationPool) -> Result<Self> {
        let addr = tokio::net::lookup_host((config.listen_host.as_str(), config.listen_port))
            .await?
            .next()
            .ok_or_else(|| {
                SocksRotError::Config(format!(
                    "listen address {}:{} did not resolve",
                    config.listen_host, config.listen_port
                ))
            })?;

        let listener = bind_listener(addr, config.workers.max(1) as u32)?;
        info!("[Server] Listening on {}", listener.local_addr()?);

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            pool: Arc::new(pool),
            listener: Arc::new(listener),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Request a graceful stop.
    ///
    /// Accepting workers return immediately; a worker that is mid-session
    /// finishes its relay first and observes the flag on its next loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Start the worker pool and run until every worker has stopped.
    ///
    /// Returns an error if any worker died on a non-shutdown accept
    /// failure; the remaining workers keep serving until shutdown either
    /// way.
    pub async fn run(&self) -> Result<()> {
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            info!("starting worker {id}");
            let worker = Worker {
                id,
                config: self.config.clone(),
                pool: Arc::clone(&self.pool),
                listener: Arc::clone(&self.listener),
                shutdown: self.shutdown.subscribe(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        let mut first_failure = None;
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(())) => info!("stopping worker {id}"),
                Ok(Err(err)) => {
                    error!("worker {id} died: {err}");
                    first_failure.get_or_insert(err);
                }
                Err(join_err) => {
                    error!("worker {id} panicked: {join_err}");
                    first_failure.get_or_insert_with(|| std::io::Error::other(join_err).into());
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// One accept worker. Handles a single session at a time, like the rest of
/// its pool siblings, all sharing the same listener.
struct Worker {
    id: usize,
    config: ServerConfig,
    pool: Arc<RotationPool>,
    listener: Arc<TcpListener>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) -> Result<()> {
        loop {
            let (client, peer) = tokio::select! {
                _ = self.shutdown.changed() => return Ok(()),
                accepted = self.listener.accept() => accepted.map_err(|err| {
                    error!("worker {}: accept failed: {err}", self.id);
                    SocksRotError::from(err)
                })?,
            };

            info!("connection from {peer}");
            configure_tcp_stream(&client, "client");

            if let Err(err) = session::run_session(client, peer, &self.config, &self.pool).await {
                warn!("session from {peer} failed: {err}");
            }
        }
    }
}
