//! CJCS is a durable coordination store mediating jobs and model
//! evaluations between submitters, the Job Manager, and worker processes.
//! All mutations are gated by an ownership token derived from the
//! caller's database session, so that two processes racing for the same
//! row always have a well-defined winner.

#![recursion_limit = "128"]

extern crate chrono;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate error_chain;
extern crate r2d2;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate slog;

pub mod config;
pub mod errors;
pub mod hash;
pub mod jobs;
pub mod model;
pub mod models;
pub mod names;
pub mod retry;
pub mod session;

// Generated file: skip rustfmt
#[cfg_attr(rustfmt, rustfmt_skip)]
mod schema;

pub mod schema_version;
mod time_helpers;

#[cfg(test)]
mod test_helpers;

pub use errors::{Error, ErrorKind, Result};
pub use session::Store;
