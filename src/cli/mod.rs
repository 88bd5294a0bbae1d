//! Operator CLI
//!
//! One command per process: boot the configured resource, run the
//! command, print one JSON object on stdout.
//!
//! - init: prepare storage for the configured collection
//! - create: store the JSON document read from stdin
//! - get: fetch one record by id
//! - find: run the `{query, page, page_size}` request read from stdin
//! - count, drop, compact

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command, FindRequest};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, write_error, write_response};
