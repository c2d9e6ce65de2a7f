//! # simio
//!
//! A data-output pipeline for distributed numerical simulations:
//! clients scatter partial fields across a process boundary, servers
//! reassemble them into global fields and run them through a
//! configurable action pipeline (selection, aggregation, statistics,
//! encoding, sinks).

pub mod action;
pub mod capi;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod listener;
pub mod logging;
pub mod message;
pub mod plan;
pub mod server;
pub mod transport;
pub mod utils;

pub use client::Client;
pub use config::Configuration;
pub use domain::{Domain, DomainRegistry};
pub use error::{FailureAction, SimioError};
pub use listener::Listener;
pub use message::{Message, Metadata, MetadataSelector, Peer, Tag};
pub use plan::Plan;
pub use server::Server;
pub use transport::{Transport, TransportConfig, TransportFactory};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
