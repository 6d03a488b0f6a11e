use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::ingest::MAX_INGEST_READ;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ingest_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub assets_dir: Option<PathBuf>,
    pub max_ingest_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ingest_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            assets_dir: None,
            max_ingest_bytes: MAX_INGEST_READ,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} address {value:?}: {source}")]
    InvalidAddr {
        field: &'static str,
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("max ingest bytes must be greater than zero")]
    ZeroReadBound,
}

#[derive(Debug, Parser)]
#[command(
    name = "spall-relay",
    author,
    version,
    about = "Relay spall trace streams to live browser viewers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload a trace file to a running relay's ingest port
    Send {
        /// Trace file to upload.
        file: PathBuf,

        /// Ingest endpoint of the relay.
        #[arg(long, env = "SPALL_RELAY_SEND_ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

#[derive(Debug, clap::Args)]
pub struct ServerArgs {
    /// Address of the raw TCP listener that accepts trace payloads.
    #[arg(long, env = "SPALL_RELAY_INGEST_ADDR", default_value = "0.0.0.0:8080")]
    pub ingest_addr: String,

    /// Address of the HTTP listener carrying the viewer websocket.
    #[arg(long, env = "SPALL_RELAY_HTTP_ADDR", default_value = "0.0.0.0:8000")]
    pub http_addr: String,

    /// Directory of frontend assets served on the HTTP listener.
    #[arg(long, env = "SPALL_RELAY_ASSETS_DIR")]
    pub assets_dir: Option<PathBuf>,

    /// Upper bound of the single read taken from each ingest connection.
    #[arg(long, env = "SPALL_RELAY_MAX_INGEST_BYTES", default_value_t = MAX_INGEST_READ)]
    pub max_ingest_bytes: usize,
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        if args.max_ingest_bytes == 0 {
            return Err(ConfigError::ZeroReadBound);
        }
        Ok(ServerConfig {
            ingest_addr: parse_addr("ingest", args.ingest_addr)?,
            http_addr: parse_addr("http", args.http_addr)?,
            assets_dir: args.assets_dir,
            max_ingest_bytes: args.max_ingest_bytes,
        })
    }
}

fn parse_addr(field: &'static str, value: String) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::InvalidAddr {
            field,
            value,
            source,
        })
}
