//! HTTP API handlers for kgp-ingest
//!
//! Administrative REST surface plus an SSE stream of `KgpEvent`s.

pub mod actor;
pub mod audit;
pub mod content;
pub mod health;
pub mod migrations;
pub mod sse;

pub use actor::CallingActor;
pub use audit::audit_routes;
pub use content::content_routes;
pub use health::health_routes;
pub use migrations::migration_routes;
pub use sse::event_stream;
