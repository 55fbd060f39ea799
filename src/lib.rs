//! Knowledge-base editor and classifier front-end for bird species identification.
//!
//! The knowledge base keeps a species taxonomy, a registry of phenotype
//! features with their value domains, per-species feature applicability
//! and per-species feature values, all as CSV tables in one directory.
//! A separately trained classifier predicts species from a feature vector.

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod page;
pub mod render;
pub mod store;

pub use error::{Error, Result};
