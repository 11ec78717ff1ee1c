//! # KGP Common Library
//!
//! Shared code for the knowledge governance pipeline services:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Event types (KgpEvent enum) and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
