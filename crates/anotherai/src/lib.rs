//! Core of the AnotherAI inference gateway.
//!
//! This crate holds the storage-free heart of the system: domain value
//! types, the template renderer, the model catalog, the provider adapter
//! abstractions and the completion runner. Storage backends, brokers and
//! the HTTP surface live in sibling crates and depend on the capability
//! traits defined here ([`events::EventRouter`],
//! [`runner::CompletionCache`], [`providers::AdapterFactory`]).

pub mod domain;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod providers;
pub mod runner;
pub mod templates;
pub mod utils;

pub use error::{Error, ErrorPayload, Result};
