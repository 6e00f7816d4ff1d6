//! Gateway configuration and CLI argument parsing
//!
//! Settings come from, in order of precedence:
//! 1. CLI arguments
//! 2. Environment variables (`ROUTECRAB_` prefix)
//! 3. Default values
//!
//! Static backends can additionally be listed in a config file (TOML, YAML
//! or JSON) passed with `--config-file`:
//!
//! ```toml
//! [[backends]]
//! name = "billing"
//! address = "10.0.0.5:9000"
//! ```
//!
//! # Example Usage
//!
//! ```bash
//! routecrab --backend billing=10.0.0.5:9000,users=10.0.0.6:9000 --rate-store memory://
//!
//! export ROUTECRAB_PORT=8080
//! export ROUTECRAB_JWT_SECRET=change-me
//! routecrab --port 9090  # Uses port 9090
//! ```

use crate::auth::{DenyAllInspector, Inspector, JwtInspector};
use crate::discovery::{BackendRef, PollerConfig};
use crate::dispatch::DispatchOptions;
use crate::rpc::ClientConfig;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub backends: Vec<BackendRef>,
    pub discovery: PollerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub dispatch: DispatchOptions,
    pub rpc: ClientConfig,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

/// Rate store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `memory://` or `http(s)://host:port`; none disables rate limiting
    pub url: Option<String>,
    /// Initial capacity of the in-process store
    pub capacity: usize,
    /// Expired key cleanup interval of the in-process store (seconds)
    pub cleanup_interval: u64,
    /// Channel buffer size of the in-process store actor
    pub buffer_size: usize,
    /// Request timeout against a remote store
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            capacity: 100_000,
            cleanup_interval: 300,
            buffer_size: 100_000,
            timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    /// PEM file with the RS256 public key
    pub jwt_public_key: Option<PathBuf>,
    pub jwt_issuer: Option<String>,
    /// Identity the gateway presents to backends for its own calls
    pub service_name: String,
}

impl AuthConfig {
    /// Build the configured identity inspector
    pub fn inspector(&self) -> Result<Arc<dyn Inspector>> {
        let issuer = self.jwt_issuer.as_deref();
        if let Some(secret) = &self.jwt_secret {
            return Ok(Arc::new(JwtInspector::hs256(secret.as_bytes(), issuer)));
        }
        if let Some(path) = &self.jwt_public_key {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read JWT public key {}", path.display()))?;
            let inspector = JwtInspector::rs256_pem(&pem, issuer)
                .with_context(|| format!("Invalid JWT public key {}", path.display()))?;
            return Ok(Arc::new(inspector));
        }

        tracing::warn!("No JWT verifier configured, every caller is anonymous");
        Ok(Arc::new(DenyAllInspector))
    }
}

/// Contents of `--config-file`
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backends: Vec<BackendRef>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }
}

/// Command-line arguments for the gateway
///
/// All arguments can also be set via environment variables with the
/// ROUTECRAB_ prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "routecrab",
    about = "HTTP edge gateway with dynamic route discovery",
    long_about = "An HTTP edge gateway that discovers backend routes and proxies matching requests over a MessagePack RPC transport.\n\nAt least one backend must be configured, via --backend or a config file.\n\nEnvironment variables with ROUTECRAB_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP listener
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "ROUTECRAB_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "ROUTECRAB_PORT"
    )]
    pub port: u16,
    #[arg(
        long,
        value_name = "SEGMENT",
        help = "Path segment of the gateway's own endpoints (routes, health, metrics)",
        default_value = "router",
        env = "ROUTECRAB_ROUTER_BASE"
    )]
    pub router_base: String,

    // Discovery
    #[arg(
        long = "backend",
        value_name = "NAME=HOST:PORT",
        help = "Static backend, repeatable or comma-separated",
        value_delimiter = ',',
        env = "ROUTECRAB_BACKENDS"
    )]
    pub backends: Vec<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Config file listing backends (TOML, YAML or JSON)",
        env = "ROUTECRAB_CONFIG_FILE"
    )]
    pub config_file: Option<PathBuf>,
    #[arg(
        long,
        value_name = "SECS",
        help = "Discovery interval (seconds)",
        default_value_t = 10,
        env = "ROUTECRAB_DISCOVERY_INTERVAL"
    )]
    pub discovery_interval: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Manifest call timeout (seconds)",
        default_value_t = 5,
        env = "ROUTECRAB_DISCOVERY_TIMEOUT"
    )]
    pub discovery_timeout: u64,

    // Rate store
    #[arg(
        long,
        value_name = "URL",
        help = "Rate store: memory:// or http(s)://host:port",
        env = "ROUTECRAB_RATE_STORE"
    )]
    pub rate_store: Option<String>,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial in-process store capacity",
        default_value_t = 100_000,
        env = "ROUTECRAB_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "In-process store cleanup interval (seconds)",
        default_value_t = 300,
        env = "ROUTECRAB_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,
    #[arg(
        long,
        value_name = "SIZE",
        help = "In-process store channel buffer size",
        default_value_t = 100_000,
        env = "ROUTECRAB_BUFFER_SIZE"
    )]
    pub buffer_size: usize,
    #[arg(
        long,
        value_name = "MS",
        help = "Remote store request timeout (milliseconds)",
        default_value_t = 1000,
        env = "ROUTECRAB_STORE_TIMEOUT_MS"
    )]
    pub store_timeout_ms: u64,

    // Auth
    #[arg(
        long,
        value_name = "SECRET",
        help = "HS256 secret for bearer tokens",
        env = "ROUTECRAB_JWT_SECRET",
        hide_env_values = true
    )]
    pub jwt_secret: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "RS256 public key (PEM) for bearer tokens",
        env = "ROUTECRAB_JWT_PUBLIC_KEY"
    )]
    pub jwt_public_key: Option<PathBuf>,
    #[arg(
        long,
        value_name = "ISSUER",
        help = "Required token issuer",
        env = "ROUTECRAB_JWT_ISSUER"
    )]
    pub jwt_issuer: Option<String>,
    #[arg(
        long,
        value_name = "NAME",
        help = "Identity presented to backends for gateway calls",
        default_value = "routecrab",
        env = "ROUTECRAB_SERVICE_NAME"
    )]
    pub service_name: String,

    // Dispatch
    #[arg(
        long,
        help = "Take the client IP from X-Forwarded-For / X-Real-IP",
        env = "ROUTECRAB_TRUST_PROXY_HEADERS"
    )]
    pub trust_proxy_headers: bool,
    #[arg(
        long,
        value_name = "BYTES",
        help = "Maximum request body size",
        default_value_t = 2 * 1024 * 1024,
        env = "ROUTECRAB_BODY_LIMIT"
    )]
    pub body_limit: usize,

    // Backend RPC
    #[arg(
        long,
        value_name = "MS",
        help = "Backend connect timeout (milliseconds)",
        default_value_t = 1000,
        env = "ROUTECRAB_CONNECT_TIMEOUT_MS"
    )]
    pub connect_timeout_ms: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Backend request timeout (seconds)",
        default_value_t = 30,
        env = "ROUTECRAB_REQUEST_TIMEOUT"
    )]
    pub request_timeout: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Idle connections kept per backend",
        default_value_t = 16,
        env = "ROUTECRAB_MAX_IDLE_PER_BACKEND"
    )]
    pub max_idle_per_backend: usize,

    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "ROUTECRAB_LOG_LEVEL"
    )]
    pub log_level: String,

    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let mut backends = args
            .backends
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| entry.parse::<BackendRef>().map_err(|e| anyhow!("Invalid --backend: {e}")))
            .collect::<Result<Vec<_>>>()?;

        if let Some(path) = &args.config_file {
            backends.extend(FileConfig::load(path)?.backends);
        }

        let config = Config {
            http: HttpConfig {
                host: args.host,
                port: args.port,
            },
            backends,
            discovery: PollerConfig {
                interval: Duration::from_secs(args.discovery_interval),
                call_timeout: Duration::from_secs(args.discovery_timeout),
            },
            store: StoreConfig {
                url: args.rate_store.filter(|url| !url.is_empty()),
                capacity: args.store_capacity,
                cleanup_interval: args.store_cleanup_interval,
                buffer_size: args.buffer_size,
                timeout: Duration::from_millis(args.store_timeout_ms),
            },
            auth: AuthConfig {
                jwt_secret: args.jwt_secret,
                jwt_public_key: args.jwt_public_key,
                jwt_issuer: args.jwt_issuer,
                service_name: args.service_name,
            },
            dispatch: DispatchOptions {
                trust_proxy_headers: args.trust_proxy_headers,
                body_limit: args.body_limit,
                router_base: args.router_base,
            },
            rpc: ClientConfig {
                max_idle_per_backend: args.max_idle_per_backend,
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                request_timeout: Duration::from_secs(args.request_timeout),
                ..ClientConfig::default()
            },
            log_level: args.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(anyhow!(
                "At least one backend must be configured.\n\n\
                Example:\n  \
                routecrab --backend billing=127.0.0.1:9000\n  \
                routecrab --config-file gateway.toml\n\n\
                For more information, try '--help'"
            ));
        }

        let mut names: Vec<&str> = self.backends.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(anyhow!("Backend {} is configured more than once", pair[0]));
        }

        if self.discovery.interval.is_zero() {
            return Err(anyhow!("Discovery interval must be at least 1 second"));
        }
        if self.discovery.call_timeout.is_zero() {
            return Err(anyhow!("Discovery timeout must be at least 1 second"));
        }
        if self.auth.jwt_secret.is_some() && self.auth.jwt_public_key.is_some() {
            return Err(anyhow!(
                "Use either --jwt-secret or --jwt-public-key, not both"
            ));
        }
        if self.dispatch.body_limit == 0 {
            return Err(anyhow!("Body limit must be greater than 0"));
        }
        if self.dispatch.router_base.trim_matches('/').is_empty() {
            return Err(anyhow!("Router base must not be empty"));
        }

        Ok(())
    }

    fn print_env_vars() {
        println!("RouteCrab Environment Variables");
        println!("===============================");
        println!();
        println!("All environment variables use the ROUTECRAB_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("HTTP Listener:");
        println!("  ROUTECRAB_HOST=<host>                  HTTP host [default: 127.0.0.1]");
        println!("  ROUTECRAB_PORT=<port>                  HTTP port [default: 8080]");
        println!("  ROUTECRAB_ROUTER_BASE=<segment>        Introspection path segment [default: router]");
        println!();

        println!("Discovery:");
        println!("  ROUTECRAB_BACKENDS=<name=host:port,..> Static backends");
        println!("  ROUTECRAB_CONFIG_FILE=<path>           Config file listing backends");
        println!("  ROUTECRAB_DISCOVERY_INTERVAL=<secs>    Discovery interval [default: 10]");
        println!("  ROUTECRAB_DISCOVERY_TIMEOUT=<secs>     Manifest call timeout [default: 5]");
        println!();

        println!("Rate Store:");
        println!("  ROUTECRAB_RATE_STORE=<url>             memory:// or http(s)://host:port");
        println!("  ROUTECRAB_STORE_CAPACITY=<size>        In-process store capacity [default: 100000]");
        println!("  ROUTECRAB_STORE_CLEANUP_INTERVAL=<secs> Cleanup interval [default: 300]");
        println!("  ROUTECRAB_BUFFER_SIZE=<size>           Actor channel buffer size [default: 100000]");
        println!("  ROUTECRAB_STORE_TIMEOUT_MS=<ms>        Remote store timeout [default: 1000]");
        println!();

        println!("Auth:");
        println!("  ROUTECRAB_JWT_SECRET=<secret>          HS256 token secret");
        println!("  ROUTECRAB_JWT_PUBLIC_KEY=<path>        RS256 public key (PEM)");
        println!("  ROUTECRAB_JWT_ISSUER=<issuer>          Required token issuer");
        println!("  ROUTECRAB_SERVICE_NAME=<name>          Gateway service identity [default: routecrab]");
        println!();

        println!("Dispatch:");
        println!("  ROUTECRAB_TRUST_PROXY_HEADERS=true|false  Client IP from forwarding headers");
        println!("  ROUTECRAB_BODY_LIMIT=<bytes>           Maximum request body [default: 2097152]");
        println!("  ROUTECRAB_CONNECT_TIMEOUT_MS=<ms>      Backend connect timeout [default: 1000]");
        println!("  ROUTECRAB_REQUEST_TIMEOUT=<secs>       Backend request timeout [default: 30]");
        println!("  ROUTECRAB_MAX_IDLE_PER_BACKEND=<n>     Pooled connections per backend [default: 16]");
        println!();

        println!("General:");
        println!(
            "  ROUTECRAB_LOG_LEVEL=<level>            Log level: error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  export ROUTECRAB_BACKENDS=billing=10.0.0.5:9000,users=10.0.0.6:9000");
        println!("  export ROUTECRAB_RATE_STORE=memory://");
        println!("  routecrab --port 9090  # Will use port 9090");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<Config> {
        let args = Args::try_parse_from(std::iter::once("routecrab").chain(args.iter().copied()))?;
        Config::from_args(args)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--backend", "billing=127.0.0.1:9000"]).unwrap();

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.dispatch.router_base, "router");
        assert_eq!(config.discovery.interval, Duration::from_secs(10));
        assert_eq!(config.discovery.call_timeout, Duration::from_secs(5));
        assert!(config.store.url.is_none());
        assert_eq!(config.auth.service_name, "routecrab");
        assert!(!config.dispatch.trust_proxy_headers);
        assert_eq!(config.rpc.max_idle_per_backend, 16);
    }

    #[test]
    fn test_backends_comma_separated_and_repeated() {
        let config = parse(&[
            "--backend",
            "billing=127.0.0.1:9000,users=127.0.0.1:9001",
            "--backend",
            "orders=127.0.0.1:9002",
        ])
        .unwrap();

        let names: Vec<_> = config.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["billing", "users", "orders"]);
    }

    #[test]
    fn test_validation() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--backend", "billing"]).is_err());
        assert!(parse(&["--backend", "a=127.0.0.1:1,a=127.0.0.1:2"]).is_err());
        assert!(parse(&["--backend", "a=127.0.0.1:1", "--discovery-interval", "0"]).is_err());
        assert!(
            parse(&[
                "--backend",
                "a=127.0.0.1:1",
                "--jwt-secret",
                "s",
                "--jwt-public-key",
                "key.pem"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_config_file_backends() {
        let path = std::env::temp_dir().join(format!("routecrab-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[[backends]]\nname = \"billing\"\naddress = \"127.0.0.1:9000\"\n"
        )
        .unwrap();
        drop(file);

        let config = parse(&[
            "--config-file",
            path.to_str().unwrap(),
            "--backend",
            "users=127.0.0.1:9001",
        ])
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1], BackendRef::new("billing", "127.0.0.1:9000"));
    }

    #[test]
    fn test_inspector_selection() {
        let auth = AuthConfig {
            jwt_public_key: Some(PathBuf::from("/nonexistent/key.pem")),
            ..AuthConfig::default()
        };
        assert!(auth.inspector().is_err());

        let auth = AuthConfig {
            jwt_secret: Some("secret".to_string()),
            ..AuthConfig::default()
        };
        assert!(auth.inspector().is_ok());
        assert!(AuthConfig::default().inspector().is_ok());
    }
}
