//! deltamirror Core - Domain logic and port definitions
//!
//! This crate holds the hexagonal core of the sync engine:
//! - **Domain entities** - `SyncRecord`, `WorkItem`, `FailedItem` and the sync status state machine
//! - **Port definitions** - Traits for adapters: `IRemoteSource`, `IContentPipeline`, `ISyncRecordStore`
//! - **Configuration** - YAML-backed settings with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure business logic with no I/O. Ports define the
//! trait interfaces that adapter crates (`deltamirror-store`,
//! `deltamirror-graph`) implement and that `deltamirror-sync` drives.

pub mod config;
pub mod domain;
pub mod ports;
