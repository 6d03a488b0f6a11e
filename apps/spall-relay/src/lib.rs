//! Live relay for spall trace streams.
//!
//! An instrumented process (or `spall-relay send`) writes a trace payload to
//! the raw ingest port; browser viewers connect to `/ws`, send `"start"`, and
//! receive the accumulated bytes as binary messages.

pub mod admission;
pub mod buffer;
pub mod config;
pub mod ingest;
pub mod relay;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod upload;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use buffer::{Delta, TraceBuffer};
pub use config::{Cli, Commands, ServerConfig};
pub use ingest::{IngestError, IngestListener, MAX_INGEST_READ};
pub use relay::{Command, RelayCursor, RelayState};
pub use server::RelayServer;
pub use service::{RelayService, ServiceStats};
