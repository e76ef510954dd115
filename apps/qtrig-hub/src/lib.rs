//! Real-time relay hub between one QTrigdoppler controller and any number of
//! browser clients.

pub mod audio;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::{Cli, HubConfig, IniSettings};
pub use dispatcher::{Hub, HubStatus};
pub use error::{ProtocolError, RelayError};
pub use server::{build_router, serve, AppState};
