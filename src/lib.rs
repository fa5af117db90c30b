//! Card co-occurrence graph and multi-signal similarity fusion.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::{AppError, AppResult};
