pub mod async_store;
pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod resolver;
pub mod runner;
pub mod schema;
pub mod search_after;
pub mod table;
pub mod transform;
pub mod translate;

pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use runner::QueryRunner;
