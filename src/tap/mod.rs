//! TAP client module
//!
//! Structure:
//! - `connection.rs`: endpoint validation and query submission
//! - `job.rs`: query job state machine (sync and UWS async)
//! - `table.rs`: typed result tables and the CSV wire format
//! - `registry.rs`: service discovery through the relational registry
//! - `error.rs`: error types

pub mod connection;
pub mod error;
pub mod job;
pub mod registry;
pub mod table;

// Re-exports for convenience
pub use connection::{ConnectOptions, ResponseFormat, TapConnection};
pub use error::{Result, TapError};
pub use job::{JobState, QueryJob, QueryMode};
pub use registry::{RegistryClient, ServiceDescriptor, ServiceType};
pub use table::{Column, ColumnRef, ColumnType, ResultTable, Value};
