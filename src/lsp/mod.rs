//! LSP server over the analysis coordinator.
//!
//! Document sync notifications feed the coordinator; completion, signature
//! help and references first wait for an analysis of the current version.

mod position;
mod server;

pub use server::serve_stdio;
