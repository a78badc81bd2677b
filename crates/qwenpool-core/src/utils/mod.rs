//! Utility functions for HTTP clients and data paths.

pub mod http;
pub mod paths;
