//! downchannel utility - main entrypoint
// (c) 2025 Ross Younger

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::process::ExitCode;

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> ExitCode {
    downchannel::main(std::env::args_os())
}
