use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

pub(crate) const DEFAULT_SESSION_HOST: &str = "https://sessionserver.mojang.com";

/// Server settings, read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) bind_address: IpAddr,
    pub(crate) port: u16,
    pub(crate) online_mode: bool,
    pub(crate) max_players: usize,
    pub(crate) motd: String,
    /// Path of a 64x64 PNG shown in the server list.
    pub(crate) favicon: Option<String>,
    pub(crate) session_host: String,
    /// Upper bound for one session server lookup.
    pub(crate) session_timeout: Duration,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) latency_interval: Duration,
    pub(crate) eviction_interval: Duration,
    pub(crate) eviction_retry: Duration,
    pub(crate) eviction_max_attempts: u32,
    pub(crate) log_packets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 25565,
            online_mode: true,
            max_players: 20,
            motd: "A craftcore server".into(),
            favicon: None,
            session_host: DEFAULT_SESSION_HOST.into(),
            session_timeout: Duration::from_millis(5_000),
            keep_alive_interval: Duration::from_millis(10_000),
            latency_interval: Duration::from_millis(5_000),
            eviction_interval: Duration::from_millis(30_000),
            eviction_retry: Duration::from_millis(5_000),
            eviction_max_attempts: 3,
            log_packets: false,
        }
    }
}

impl Config {
    pub(crate) fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| -> Result<Duration, String> {
            parse(&lookup, name, default.as_millis() as u64).map(Duration::from_millis)
        };
        Ok(Self {
            bind_address: parse(&lookup, "BIND_ADDRESS", defaults.bind_address)?,
            port: parse(&lookup, "PORT", defaults.port)?,
            online_mode: parse(&lookup, "ONLINE_MODE", defaults.online_mode)?,
            max_players: parse(&lookup, "MAX_PLAYERS", defaults.max_players)?,
            motd: lookup("MOTD").unwrap_or(defaults.motd),
            favicon: lookup("FAVICON").filter(|path| !path.is_empty()),
            session_host: lookup("SESSION_HOST")
                .map(|host| host.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.session_host),
            session_timeout: millis("SESSION_TIMEOUT_MS", defaults.session_timeout)?,
            keep_alive_interval: millis("KEEP_ALIVE_INTERVAL_MS", defaults.keep_alive_interval)?,
            latency_interval: millis("LATENCY_INTERVAL_MS", defaults.latency_interval)?,
            eviction_interval: millis("EVICTION_INTERVAL_MS", defaults.eviction_interval)?,
            eviction_retry: millis("EVICTION_RETRY_MS", defaults.eviction_retry)?,
            eviction_max_attempts: parse(
                &lookup,
                "EVICTION_MAX_ATTEMPTS",
                defaults.eviction_max_attempts,
            )?,
            log_packets: lookup("LOG_PACKETS").is_some_and(|s| s == "true"),
        })
    }

    pub(crate) fn bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| format!("Invalid value {value:?} for {name}: {e}")),
        None => Ok(default),
    }
}
