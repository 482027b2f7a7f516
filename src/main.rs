use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::{BackendKind, WardenConfig};
use ratewarden::ratelimit::{build_limiter, rate_limit_headers, RateLimitConfig, RateLimiter};

/// Run rate limit checks against a configured backend.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Issue checks for a key and print each decision
    Check {
        /// Caller key to limit
        #[arg(short, long)]
        key: String,

        /// Number of checks to issue
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: u32,

        /// Override the default max requests
        #[arg(long)]
        max_requests: Option<u32>,

        /// Override the default window, in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,

        /// Override the default burst allowance
        #[arg(long)]
        burst: Option<u32>,

        /// Propagate backend errors instead of allowing
        #[arg(long)]
        fail_closed: bool,
    },
    /// Clear all state for a key in a shared store
    ///
    /// Only meaningful for the atomic backend with `atomic.redis_url` set;
    /// in-process backends start empty on every run.
    Reset {
        /// Caller key to clear
        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    info!(backend = %config.backend, "Configuration loaded");

    if matches!(cli.command, Command::Reset { .. }) && !config.has_shared_state() {
        anyhow::bail!(
            "the {} backend keeps no state between runs; \
             reset needs the atomic backend with atomic.redis_url",
            config.backend
        );
    }

    let limiter = build_limiter(&config).await?;

    match cli.command {
        Command::Check {
            key,
            requests,
            max_requests,
            window_ms,
            burst,
            fail_closed,
        } => {
            let limit = RateLimitConfig {
                max_requests: max_requests.unwrap_or(config.default_limit.max_requests),
                window_ms: window_ms.unwrap_or(config.default_limit.window_ms),
                burst_allowance: burst.unwrap_or(config.default_limit.burst_allowance),
                fail_open: config.default_limit.fail_open && !fail_closed,
            };

            for request in 1..=requests {
                let result = limiter.check(&key, &limit).await?;
                let headers: serde_json::Map<String, serde_json::Value> =
                    rate_limit_headers(&result)
                        .into_iter()
                        .map(|(name, value)| (name.to_string(), json!(value)))
                        .collect();
                println!(
                    "{}",
                    json!({
                        "request": request,
                        "key": key,
                        "result": result,
                        "headers": headers,
                    })
                );
            }
        }
        Command::Reset { key } => {
            limiter.reset(&key).await?;
            info!(key = %key, "Rate limit state cleared");
        }
    }

    Ok(())
}
