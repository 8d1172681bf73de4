//! Shared types and error vocabulary for the agentcube control plane.
//!
//! This crate carries no I/O of its own: it is the vocabulary that the
//! `store`, `k8s-client` and `agent` crates all speak so that a session
//! record built by the pipeline is the same shape the store persists and
//! the HTTP layer serializes.

pub mod error;
pub mod principal;
pub mod types;

pub use error::ErrorCode;
pub use principal::Principal;
