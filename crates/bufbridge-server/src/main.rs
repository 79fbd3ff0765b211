// ABOUTME: CLI entry point for the bufbridge demo server binary
// ABOUTME: Builds the listener config from flags or a TOML file, serves the echo service until Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::path::PathBuf;

use bufbridge::config::{default_config_path, valid_protocol_names};
use bufbridge::{BridgeError, CertificateMaterial, ServerConfig};
use clap::Parser;

use bufbridge_server::echo;

/// bufbridge-server: echo service over HTTP/1.1, TLS or HTTP/2
#[derive(Parser)]
#[command(name = "bufbridge-server", version, about)]
struct Cli {
    /// Transport variant (http, https, http2, `http2_insecure`)
    #[arg(long)]
    protocol: Option<String>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// PEM certificate chain for TLS variants
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for TLS variants
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// TOML config file (defaults to `<config dir>/bufbridge/server.toml` when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Start from the config file, if any, and apply flag overrides
    fn server_config(&self) -> Result<ServerConfig, BridgeError> {
        let file = self
            .config
            .clone()
            .or_else(|| default_config_path().filter(|path| path.exists()));

        let mut config = match file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading server config");
                ServerConfig::load(&path)?
            }
            None => ServerConfig::default(),
        };

        if let Some(protocol) = &self.protocol {
            config.protocol.clone_from(protocol);
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            config.certificate = Some(CertificateMaterial::from_files(cert, key));
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.server_config()?;
    let protocol = config.protocol_variant().map_err(|e| {
        BridgeError::config(format!("{}. Valid: {}", e.message, valid_protocol_names()))
    })?;

    let mut server = echo::server(config);
    let addr = server.listen().await?;

    tracing::info!(
        address = %addr,
        protocol = %protocol,
        service = echo::SERVICE,
        "Starting bufbridge echo server"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| BridgeError::internal(format!("Failed to listen for Ctrl-C: {e}")))?;

    tracing::info!("Shutting down");
    server.close().await?;

    Ok(())
}
