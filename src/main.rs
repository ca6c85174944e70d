//! RPC shell server.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                 RPC SERVER                   │
//!     gRPC call           │  ┌───────────┐   ┌──────────────────────┐    │
//!     ────────────────────┼─▶│ transport │──▶│  interceptor chain   │    │
//!                         │  │ axum+tonic│   │ error→log→recover→.. │    │
//!                         │  └───────────┘   └──────────┬───────────┘    │
//!                         │                             ▼                │
//!                         │                       ┌──────────┐           │
//!                         │                       │ handler  │           │
//!                         │                       └──────────┘           │
//!                         │  ┌────────────────────────────────────────┐  │
//!                         │  │ lifecycle: bind → register → wait      │  │
//!     SIGTERM / SIGINT ───┼─▶│            → unregister → grace → stop │──┼──▶ discovery
//!                         │  └────────────────────────────────────────┘  │
//!                         └──────────────────────────────────────────────┘
//! ```
//!
//! The binary serves two demo services, `echo.Echo/Say` and `time.Time/Now`,
//! plus the health check.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use rpc_shell::config::{load_config, ServerConfig, ENV_ADDRESS, ENV_APP_ID};
use rpc_shell::interceptor::{CallTracing, RequestValidation};
use rpc_shell::observability::{init_logging, init_metrics};
use rpc_shell::{MethodRouter, RpcServer, ServerError};
use tonic::Status;

#[derive(Debug, Parser)]
#[command(name = "rpc-shell", version, about = "gRPC server shell with graceful lifecycle")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file.
    #[arg(short, long, env = ENV_ADDRESS)]
    address: Option<String>,

    /// Application id to register with discovery.
    #[arg(long, env = ENV_APP_ID)]
    app_id: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message, garde::Validate)]
struct SayRequest {
    #[prost(string, tag = "1")]
    #[garde(length(min = 1, max = 1024))]
    message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SayReply {
    #[prost(string, tag = "1")]
    message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct NowRequest {}

#[derive(Clone, PartialEq, prost::Message)]
struct NowReply {
    #[prost(uint64, tag = "1")]
    unix_millis: u64,
}

fn demo_methods() -> MethodRouter {
    MethodRouter::new()
        .validated_unary("/echo.Echo/Say", |request: SayRequest| async move {
            Ok::<_, Status>(SayReply {
                message: request.message,
            })
        })
        .unary("/time.Time/Now", |_request: NowRequest| async move {
            let unix_millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            Ok::<_, Status>(NowReply { unix_millis })
        })
}

fn load(cli: &Cli) -> Result<ServerConfig, ServerError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = &cli.address {
        config.listener.address = address.clone();
    }
    if let Some(app_id) = &cli.app_id {
        config.app_id = Some(app_id.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            // The subscriber isn't configured yet; stderr is all there is.
            eprintln!("rpc-shell: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);

    tracing::info!(
        address = %config.listener.address,
        app_id = ?config.app_id,
        handle_signals = config.listener.handle_signals,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    let server = RpcServer::builder(config)
        .methods(demo_methods())
        .interceptor(RequestValidation)
        .interceptor(CallTracing)
        .with_health_service()
        .build();

    let result = match server {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "rpc server failed");
            ExitCode::FAILURE
        }
    }
}
