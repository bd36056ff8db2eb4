//! # docjson
//!
//! Command-line front end for `docjson-core`. The binary in `main.rs`
//! only initialises logging and dispatches into [`cli::execute`].

pub mod cli;
pub mod config;
