//! Resolves blockchain actions over HTTP, classifies them against a trust registry and drives
//! their execution through a wallet adapter.
pub mod cli;
pub mod config;
pub mod registry;
pub mod rpc;
pub mod session;

pub use config::{RetryConfiguration, SessionConfig};
pub use registry::{parse_blink_url, HttpTrustRegistry, RegistryDocument};
pub use rpc::{HttpActionClient, HttpActionClientOptions};
pub use session::{ActionSession, LiveDataHandle};
