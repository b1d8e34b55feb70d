pub mod auth;
pub mod compactor;
pub mod config;
pub mod contracts;
pub mod directory;
pub mod engine;
pub mod expenses;
pub mod journal;
pub mod json_store;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod sync;
pub mod tenant;
pub mod tls;
pub mod wire;
