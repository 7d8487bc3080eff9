//! Thin async layer over the `git` command-line client.
//!
//! Commands run as child processes with captured output, an explicit working
//! directory and an optional timeout. Failures are classified from stderr into
//! [`CommandError`] variants.

mod command;
mod errors;
pub mod git;

pub use command::{CommandStream, GitCommand};
pub use errors::CommandError;
