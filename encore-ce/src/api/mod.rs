//! HTTP API handlers for encore-ce
//!
//! Thin adapters: jobs are submitted to the `JobHandler`, documents are read
//! straight from the store, and progress is streamed from the EventBus.

pub mod health;
pub mod jobs;
pub mod references;
pub mod results;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use references::reference_routes;
pub use results::result_routes;
pub use sse::job_event_stream;
