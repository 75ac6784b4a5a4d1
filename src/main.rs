use std::process::ExitCode;
use std::sync::Arc;

use base64::engine::general_purpose;
use base64::Engine;
use dotenv::dotenv;
use log::{error, info};
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::auth::SessionAuthenticator;
use crate::chunk::world::World;
use crate::config::Config;
use crate::crypto::KeyPair;
use crate::err::ProtError;
use crate::jobs::{Job, JobQueue, RetryPolicy};
use crate::registry::Registry;

mod auth;
mod chat;
mod chunk;
mod config;
mod connection;
mod crypto;
mod entity;
mod err;
mod jobs;
mod packets;
mod protocol_types;
pub(crate) mod protocol_util;
mod registry;
mod serve;

/// Everything the workers share. Built once at startup and handed around as `Arc<Server>`.
pub(crate) struct Server {
    pub(crate) config: Config,
    pub(crate) keys: KeyPair,
    pub(crate) registry: Registry,
    pub(crate) world: World,
    pub(crate) jobs: JobQueue,
    pub(crate) auth: SessionAuthenticator,
    /// `data:` URI of the server icon.
    pub(crate) favicon: Option<String>,
}

impl Server {
    pub(crate) fn new(config: Config) -> Result<(Self, UnboundedReceiver<Job>), ProtError> {
        let keys = KeyPair::generate()?;
        let (jobs, receiver) = JobQueue::new();
        let auth =
            SessionAuthenticator::new(config.session_host.clone(), config.session_timeout)?;
        let server = Self {
            config,
            keys,
            registry: Registry::new(),
            world: World::new(),
            jobs,
            auth,
            favicon: None,
        };
        Ok((server, receiver))
    }

    pub(crate) fn eviction_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_after: self.config.eviction_retry,
            max_attempts: self.config.eviction_max_attempts,
        }
    }
}

async fn load_favicon(config: &Config) -> Result<Option<String>, String> {
    let Some(path) = &config.favicon else {
        return Ok(None);
    };
    let icon = fs::read(path)
        .await
        .map_err(|e| format!("Couldn't read favicon {path}: {e}"))?;
    Ok(Some(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(icon.as_slice())
    )))
}

async fn start_server() -> Result<(), String> {
    let config = Config::from_env()?;
    let favicon = load_favicon(&config).await?;
    let (mut server, jobs) =
        Server::new(config).map_err(|e| format!("Couldn't set up server: {e}"))?;
    server.favicon = favicon;
    let server = Arc::new(server);

    let address = server.config.bind();
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| format!("Couldn't bind {address}: {e}"))?;
    info!(
        "Listening on {address} ({} mode)",
        if server.config.online_mode { "online" } else { "offline" }
    );

    let worker = tokio::spawn(jobs::run_worker(server.clone(), jobs));
    let timers = jobs::start_timers(&server);
    let acceptor = tokio::spawn(serve::accept_loop(server.clone(), listener));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Couldn't listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    acceptor.abort();
    let _ = acceptor.await;
    for timer in timers {
        timer.abort();
    }
    serve::shutdown(&server).await;
    worker.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();
    match start_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    use std::time::Duration;

    Config {
        online_mode: false,
        keep_alive_interval: Duration::from_millis(20),
        eviction_retry: Duration::from_millis(10),
        session_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

#[cfg(test)]
pub(crate) fn test_server_with(config: Config) -> (Arc<Server>, UnboundedReceiver<Job>) {
    let (server, jobs) = Server::new(config).unwrap();
    (Arc::new(server), jobs)
}

#[cfg(test)]
pub(crate) fn test_server() -> (Arc<Server>, UnboundedReceiver<Job>) {
    test_server_with(test_config())
}
