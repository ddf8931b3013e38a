#![deny(missing_docs)]
//! Package to maintain a local archive of ensemble model GRIB files.
//!
//! The archive knows which artifacts, one file per model, cycle, ensemble member and forecast
//! hour, it already holds, finds out which cycles the remote service currently publishes, fetches
//! what is missing without fetching anything twice, and evicts data past a retention age.

//
// Public API
//
pub use crate::archive::{Archive, CleanReport};
pub use crate::cmd_line::CommonCmdLineArgs;
pub use crate::config::{BoundingBox, Config, Constants};
pub use crate::cycle::Cycle;
pub use crate::discovery::CycleDiscovery;
pub use crate::errors::{ArtifactFailure, GribArchiveErr};
pub use crate::fanout::{CycleReport, EnsembleFanout};
pub use crate::fetch::{FetchOutcome, Fetcher};
pub use crate::index::ArchiveIndex;
pub use crate::inventory::Inventory;
pub use crate::locks::{ArchiveLocks, CancelFlag, KeyGuard};
pub use crate::models::{ArchiveRecord, ArtifactKey, Member, ModelProfile};
pub use crate::naming::NamingScheme;
pub use crate::reconcile::{ReconcileReport, Reconciler};
pub use crate::remote::{NomadsClient, RemoteRequest, RemoteResponse, RemoteSource};
pub use crate::sweep::RetentionSweeper;

//
// Implementation only
//
mod archive;
mod cmd_line;
mod config;
mod cycle;
mod discovery;
mod errors;
mod fanout;
mod fetch;
mod index;
mod inventory;
mod locks;
mod models;
mod naming;
mod reconcile;
mod remote;
mod sweep;
