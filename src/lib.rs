//! Content-addressed DICOM instance store: blob store, transactional
//! resource index, ingestion pipeline, DICOM SCP/SCU network stack, resource
//! finder, and change/export logs.

mod blob;
mod checksum;
mod config;
mod dicom_codec;
mod dicomrs_options;
mod environment;
mod error;
mod finder;
mod hashing;
mod index;
mod ingest;
mod model;
mod run_from_env;
mod scp;
mod scu;
mod server;
mod threads;
mod transfer;

pub use blob::BlobStore;
pub use config::Settings;
pub use dicom_codec::{CharacterEncoding, JsonFlags, JsonFormat};
pub use environment::{PeerStoreClient, ServerEnvironment};
pub use error::{CoreError, CoreResult};
pub use finder::{find, FindOutcome, FinderQuery, Matcher, TagConstraint};
pub use index::{Index, ModalityEntry, PeerEntry};
pub use ingest::{IngestOptions, IngestOutcome};
pub use model::*;
pub use run_from_env::run_server_from_env;
pub use scu::{DimseStatus, FindMatch, QrRoot, QueryLevel, ScuConnection, ScuTarget};
pub use server::run_server;
