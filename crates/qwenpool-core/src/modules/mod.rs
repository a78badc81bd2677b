//! Configuration, declarations, logging, credentials and persistence.

pub mod config;
pub mod declarations;
pub mod logger;
pub mod oauth;
pub mod persistence;
