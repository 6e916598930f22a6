pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod scope;
pub mod server;
pub mod storage;
pub mod tenant;

pub use context::{ContextPropagator, ExecutionContext};
pub use error::TenancyError;
