//! Command handlers for the `salelock` binary

mod commands;

pub use commands::*;
