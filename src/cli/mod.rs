//! Command Line Interface for downchannel
// (c) 2025 Ross Younger
mod args;
mod cli_main;
pub use cli_main::cli;
