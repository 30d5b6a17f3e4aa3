#![forbid(unsafe_code)]

//! flowpad CLI - parse, check, and format flowchart DSL documents.
//!
//! # Commands
//!
//! - `parse`: Output the graph model as JSON for tooling/debugging
//! - `format`: Rewrite a document in canonical form
//! - `check`: Parse a document and report a structural summary

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fp_core::GraphData;
use fp_sync::{Debouncer, SyncCoordinator};
use serde::Serialize;
use tracing::info;

/// flowpad CLI - parse, check, and format flowchart documents.
#[derive(Debug, Parser)]
#[command(
    name = "flowpad",
    version,
    about = "flowpad CLI - parse, check, and format flowchart documents",
    long_about = "A bidirectional flowchart engine.\n\n\
        Parses the flowchart DSL into a graph model, serializes models back\n\
        to canonical text, and keeps both in sync for editor integrations."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (can be repeated for more detail: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a document and output its graph model as JSON.
    Parse {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Output the full model (default is a summary)
        #[arg(long)]
        full: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Rewrite a document in canonical form.
    Format {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Output file path. If omitted, writes to stdout.
        #[arg(short, long)]
        output: Option<String>,

        /// Exit non-zero if the input is not already canonical,
        /// without writing anything.
        #[arg(long)]
        check: bool,
    },

    /// Parse a document and report a structural summary.
    Check {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Summary of a parsed document.
#[derive(Debug, Serialize)]
struct Summary {
    direction: String,
    node_count: usize,
    edge_count: usize,
    subgraph_count: usize,
    class_def_count: usize,
}

impl Summary {
    fn of(data: &GraphData) -> Self {
        Self {
            direction: data.direction.as_str().to_string(),
            node_count: data.nodes.len(),
            edge_count: data.edges.len(),
            subgraph_count: data.subgraphs.len(),
            class_def_count: data.class_defs.len(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Parse {
            input,
            full,
            pretty,
        } => cmd_parse(&input, full, pretty),

        Command::Format {
            input,
            output,
            check,
        } => cmd_format(&input, output.as_deref(), check),

        Command::Check { input, json } => cmd_check(&input, json),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init();
}

fn load_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else if Path::new(input).exists() {
        std::fs::read_to_string(input).context(format!("Failed to read file: {input}"))
    } else {
        // Treat as inline document text
        Ok(input.to_string())
    }
}

fn write_output(output: Option<&str>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).context(format!("Failed to write to: {path}"))?;
            info!("Wrote output to: {path}");
        }
        None => {
            io::stdout()
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn cmd_parse(input: &str, full: bool, pretty: bool) -> Result<()> {
    let text = load_input(input)?;
    let data = fp_parser::parse(&text).to_data();

    let json = if full {
        if pretty {
            serde_json::to_string_pretty(&data)
        } else {
            serde_json::to_string(&data)
        }
    } else {
        let summary = Summary::of(&data);
        if pretty {
            serde_json::to_string_pretty(&summary)
        } else {
            serde_json::to_string(&summary)
        }
    }
    .context("Failed to encode model as JSON")?;

    println!("{json}");
    Ok(())
}

fn cmd_format(input: &str, output: Option<&str>, check: bool) -> Result<()> {
    let text = load_input(input)?;

    let mut sync = SyncCoordinator::from_code(&text, Debouncer::new(Duration::ZERO));
    sync.flush();
    let canonical = sync.code().to_string();

    if check {
        if text == canonical {
            info!("Input is canonical");
            return Ok(());
        }
        anyhow::bail!("Input is not in canonical form");
    }

    write_output(output, &canonical)
}

fn cmd_check(input: &str, json: bool) -> Result<()> {
    let text = load_input(input)?;
    let data = fp_parser::parse(&text).to_data();
    let summary = Summary::of(&data);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
        );
    } else {
        println!(
            "direction {}, {} nodes, {} edges, {} subgraphs, {} class defs",
            summary.direction,
            summary.node_count,
            summary.edge_count,
            summary.subgraph_count,
            summary.class_def_count
        );
    }
    Ok(())
}
