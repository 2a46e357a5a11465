//! Unit tests for the remote module.

mod config;
mod util;
