pub mod api;
pub mod client;
pub mod config;
pub mod correlate;
pub mod datasource;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod planner;
pub mod product;
pub mod sign;
pub mod transport;
pub mod variables;

pub use client::ApiClient;
pub use config::{ConnectorConfig, Credentials};
pub use datasource::Datasource;
pub use error::{ConnectorError, Result};
pub use product::Product;
