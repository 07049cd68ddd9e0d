//! Wires [`config::load`] and [`ServerEnvironment::new`] into [`server::run_server`]
//! (`spec.md` §5 "Configuration loading").
//!
//! Grounded on the teacher's own `run_from_env.rs`, trimmed down now that
//! configuration is figment-based ([`crate::config`]) instead of read
//! directly off environment variables one at a time.

use std::net::{Ipv4Addr, SocketAddrV4};

use camino::Utf8Path;

use crate::config;
use crate::environment::ServerEnvironment;
use crate::server::run_server;

/// Loads [`crate::config::Settings`] (optionally from `config_path`, overlaid
/// with `DICOMKEEP_`-prefixed environment variables) and runs the server.
///
/// `finite_connections` is only used for testing; it tells the server to
/// exit after a finite number of connections instead of running forever.
pub fn run_server_from_env(
    config_path: Option<&Utf8Path>,
    finite_connections: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config::load(config_path)?;
    let address = SocketAddrV4::new(Ipv4Addr::from(0), settings.dicom_port);
    let env = ServerEnvironment::new(settings)?;
    run_server(&address, env, finite_connections)
}
