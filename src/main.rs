//! CLI entry point: resolves configuration, wires a demo `Handler`, and runs
//! the server until a shutdown signal arrives. See `SPEC_FULL.md` §10.4.
//!
//! Flag/subcommand shape and the logging bootstrap are adapted from the
//! daemon's own `main.rs` (`Args`/`Command`, `setup_logging`), trimmed to the
//! one subcommand this binary needs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cm::{AuthReply, CmConfig, Handler, Options, Server, Session};

#[derive(Parser)]
#[command(name = "cmd", about = "Connection Manager — framed binary push server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server.
    Serve {
        /// Scheme-tagged listen address, e.g. `tcp://0.0.0.0:9000` or `ws://0.0.0.0:9000`.
        #[arg(long, env = "CM_LISTEN")]
        listen: Option<String>,

        /// Seconds a client has to complete the Auth handshake (default 10).
        #[arg(long, env = "CM_AUTH_TIMEOUT")]
        auth_timeout: Option<u64>,

        /// Seconds allowed between heartbeats before the session is closed (default 90).
        #[arg(long, env = "CM_HEARTBEAT_TIMEOUT")]
        heartbeat_timeout: Option<u64>,

        /// Per-frame read deadline in seconds; 0 or unset disables it.
        #[arg(long, env = "CM_READ_TIMEOUT")]
        read_timeout: Option<u64>,

        /// Per-frame write deadline in seconds; 0 or unset disables it.
        #[arg(long, env = "CM_WRITE_TIMEOUT")]
        write_timeout: Option<u64>,

        /// TLS certificate file. Loading/validating it is left to the embedder;
        /// this binary only threads the path through to configuration.
        #[arg(long, env = "CM_CERT")]
        cert: Option<PathBuf>,

        /// TLS key file, paired with `--cert`.
        #[arg(long, env = "CM_KEY")]
        key: Option<PathBuf>,

        /// Tracing filter string, e.g. "info" or "info,cm=debug".
        #[arg(long, env = "CM_LOG")]
        log: Option<String>,

        /// Directory holding `config.toml`. Defaults to a platform data dir.
        #[arg(long, env = "CM_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

/// Initializes the global tracing subscriber from a filter string. Returns a
/// guard that must be held for the process lifetime if file logging is ever
/// added — kept for symmetry with the daemon's own `setup_logging`, which
/// layers an optional `tracing_appender::rolling::daily` sink; this binary
/// logs to stderr only, so there is nothing to guard, but the signature
/// mirrors the daemon's in case an embedder wants to add one.
fn setup_logging(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

/// Accepts any non-empty `uid`/`os` pair and routes by `uid` into `os`
/// channels — enough to drive the binary end-to-end without pulling in an
/// application-specific auth scheme (out of scope per `SPEC_FULL.md` §1).
/// Production embedders supply their own `Handler`.
struct DemoHandler;

#[async_trait::async_trait]
impl Handler for DemoHandler {
    async fn on_auth(&self, body: &[u8]) -> AuthReply {
        #[derive(serde::Deserialize)]
        struct AuthBody {
            uid: String,
            os: String,
        }

        match serde_json::from_slice::<AuthBody>(body) {
            Ok(AuthBody { uid, os }) if !uid.is_empty() && !os.is_empty() => {
                AuthReply::ok(uid, os).with_data(b"{\"status\":\"ok\"}".to_vec())
            }
            _ => AuthReply::reject("auth body must be {\"uid\":...,\"os\":...}"),
        }
    }

    async fn on_receive(&self, session: &Session, body: &[u8]) -> Vec<u8> {
        tracing::debug!(
            room_id = ?session.room_id(),
            channel_id = ?session.channel_id(),
            len = body.len(),
            "push received"
        );
        body.to_vec()
    }

    async fn on_close(&self, session: &Session) {
        tracing::info!(
            room_id = ?session.room_id(),
            channel_id = ?session.channel_id(),
            "session closed"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Command::Serve {
        listen,
        auth_timeout,
        heartbeat_timeout,
        read_timeout,
        write_timeout,
        cert,
        key,
        log,
        data_dir,
    } = cli.command;

    let config = CmConfig::new(
        listen,
        auth_timeout,
        heartbeat_timeout,
        read_timeout,
        write_timeout,
        cert,
        key,
        log,
        data_dir,
    );
    setup_logging(&config.log);

    if config.cert_file.is_some() != config.key_file.is_some() {
        anyhow::bail!("--cert and --key must be supplied together");
    }
    if config.cert_file.is_some() {
        tracing::warn!(
            "TLS material was supplied but certificate loading is outside this crate's scope; \
             terminate TLS upstream or listen on ws:// behind a TLS-terminating proxy"
        );
    }

    let non_zero_secs = |secs: u64| (secs != 0).then(|| std::time::Duration::from_secs(secs));

    let options = Options {
        auth_timeout: std::time::Duration::from_secs(config.auth_timeout_secs),
        heartbeat_timeout: std::time::Duration::from_secs(config.heartbeat_timeout_secs),
        read_timeout: non_zero_secs(config.read_timeout_secs),
        write_timeout: non_zero_secs(config.write_timeout_secs),
    };

    let server = Server::new(Arc::new(DemoHandler), options);
    let run_server = server.clone();

    tokio::select! {
        result = run_server.run(&config.listen_addr) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            server.shutdown();
        }
    }

    Ok(())
}

/// Waits for Ctrl-C or, on unix, SIGTERM — mirroring the daemon's own
/// graceful-shutdown future in `ipc::run`.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
