#![forbid(unsafe_code)]

//! Permissive parser for the flowchart DSL.
//!
//! [`parse`] never fails: lines that match no known statement form are
//! dropped (with a `tracing` debug record) and everything recognizable
//! is kept. The result is a fully wired [`GraphModel`].

mod edge_id;
mod preprocess;
mod property;
mod statement;
mod tables;
mod text;

use fp_core::GraphModel;

pub use preprocess::preprocess;
pub use text::{normalize_identifier, unquote};

use statement::ParseContext;

/// Parse a flowchart document into a graph model.
pub fn parse(input: &str) -> GraphModel {
    let mut context = ParseContext::new();
    for line in preprocess(input) {
        context.handle_line(line);
    }
    context.finish()
}
