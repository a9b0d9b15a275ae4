//! TAP query client
//!
//! Discover astronomical data services through a registry, connect to a TAP
//! endpoint, and run ADQL queries with typed tabular results.

pub mod tap;

pub use tap::{
    Column, ColumnRef, ColumnType, ConnectOptions, JobState, QueryJob, QueryMode, RegistryClient,
    ResponseFormat, Result, ResultTable, ServiceDescriptor, ServiceType, TapConnection, TapError,
    Value,
};
