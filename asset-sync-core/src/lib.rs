#![doc = "asset-sync-core: core pipeline library for asset-sync."]

//! This crate contains the chunked-upload pipeline and the sync orchestrator
//! driving it. It has no knowledge of the CLI or of how the asset store is
//! reached over the wire; those live behind the traits in [`contract`].
//!
//! # Pipeline
//! [`synchronise`] pulls descriptors in order, resolves their bytes through a
//! [`contract::SourceFetcher`], splits them with [`chunker`], and hands them to a
//! [`session::BatchSession`], which retries each store call via [`retry`] and
//! commits with the [`hasher`] digest.
//!
//! # Usage
//! Add this as a dependency for anything that needs to push content into an
//! asset store, or that wants the generated mocks (feature `test-export-mocks`).

pub mod chunker;
pub mod config;
pub mod contract;
pub mod error;
pub mod fetch;
pub mod hasher;
pub mod progress;
pub mod retry;
pub mod session;
pub mod single_flight;
pub mod synchronise;
