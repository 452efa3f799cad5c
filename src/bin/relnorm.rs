//! relnorm: Decompose nested JSON documents into relational tables
//!
//! Usage:
//!   # Read from file, output to stdout
//!   relnorm data.json
//!
//!   # Read from stdin, output to stdout
//!   echo '{"id": 1, "posts": [{"title": "a"}]}' | relnorm --schema-name users
//!
//!   # Process NDJSON with a schema, write one file per table
//!   relnorm --ndjson events.jsonl --schema schema.json --output-dir ./tables
//!
//!   # Copy the root `tenant` column into every child row as `_tenant`
//!   relnorm events.jsonl --ndjson --propagate tenant=_tenant

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use relnorm::normalize::{
    new_load_id, NormalizerConfig, RelationalNormalizer, RowSink, StreamWriter, TableWriter,
};
use relnorm::{extend_schema, normalize_json, Schema};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relnorm")]
#[command(about = "Decompose nested JSON into relational tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one JSON object per line)
    #[arg(long)]
    ndjson: bool,

    /// Schema document (JSON) with tables, preferred types and hints
    #[arg(long, value_name = "FILE")]
    schema: Option<String>,

    /// Schema name, used as the root table when no schema file is given
    #[arg(long, default_value = "event")]
    schema_name: String,

    /// Load id stored on every root row (default: current timestamp)
    #[arg(long)]
    load_id: Option<String>,

    /// Copy a root column into every descendant row, as SOURCE=TARGET
    #[arg(long, value_name = "SOURCE=TARGET")]
    propagate: Vec<String>,

    /// Output directory for separate .jsonl files per table.
    /// If omitted, writes to stdout as a single stream tagged with `_table`
    #[arg(long, short = 'o')]
    output_dir: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut schema = match &args.schema {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open schema: {}", path))?;
            Schema::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to load schema: {}", path))?
        }
        None => Schema::new(args.schema_name.clone()),
    };
    extend_schema(&mut schema).context("Failed to extend schema")?;

    let config = build_config(&args.propagate)?;
    let normalizer = RelationalNormalizer::new(config);
    let load_id = args.load_id.clone().unwrap_or_else(new_load_id);

    let mut output: Box<dyn RowSink> = match &args.output_dir {
        Some(dir) => Box::new(TableWriter::new(dir)?),
        None => Box::new(StreamWriter::new(std::io::stdout())),
    };

    let reader: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(File::open(path).with_context(|| format!("Failed to open input: {}", path))?),
        None => Box::new(std::io::stdin()),
    };
    let reader = BufReader::new(reader);

    let documents = if args.ndjson {
        normalize_json(reader, output.as_mut(), &normalizer, &schema, &load_id)?
    } else {
        process_json(reader, &normalizer, &schema, &load_id, output.as_mut())?
    };

    output.flush()?;
    info!(documents, load_id = %load_id, "done");
    Ok(())
}

/// Parse `--propagate SOURCE=TARGET` pairs into root propagation rules
fn build_config(pairs: &[String]) -> Result<NormalizerConfig> {
    let mut config = NormalizerConfig::default();
    for pair in pairs {
        let Some((source, target)) = pair.split_once('=') else {
            bail!("Invalid --propagate value `{}`, expected SOURCE=TARGET", pair);
        };
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            bail!("Invalid --propagate value `{}`, expected SOURCE=TARGET", pair);
        }
        config
            .propagation
            .root
            .insert(source.to_string(), target.to_string());
    }
    Ok(config)
}

/// A stream of JSON values; a top-level array is treated as a list of documents
fn process_json<R: Read>(
    reader: R,
    normalizer: &RelationalNormalizer,
    schema: &Schema,
    load_id: &str,
    output: &mut dyn RowSink,
) -> Result<usize> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<Value>();

    let mut documents = 0;
    for result in stream {
        let value = result.context("Failed to parse JSON")?;
        let batch = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        debug!(documents = batch.len(), "read batch");

        for value in batch {
            let rows = normalizer
                .normalize_value(schema, value, load_id)
                .with_context(|| format!("Failed to normalize document {}", documents + 1))?;
            output.write_rows(rows)?;
            documents += 1;
        }
    }
    Ok(documents)
}
