//! Annal archive dump
//!
//! Prints the label header, temporal index, and metadata log of an
//! archive in human-readable or JSON form. Mostly a debugging aid, but
//! also the quickest way to check what a logger actually wrote.

use annal::{ArchiveReader, InDomKind, MetaRecord};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "annal-dump")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dump the metadata and temporal index of an archive")]
struct Cli {
    /// Archive base path (without the .index/.meta/.N suffix)
    base: PathBuf,

    /// Skip the temporal index
    #[arg(long)]
    no_index: bool,

    /// Skip the metadata log
    #[arg(long)]
    no_meta: bool,

    /// Emit records as JSON lines
    #[arg(short, long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let reader = ArchiveReader::open(&cli.base)?;

    let label = reader.label();
    println!(
        "archive {} ({}) host {} tz {} started {}",
        cli.base.display(),
        reader.version(),
        label.hostname,
        label.timezone,
        label.start,
    );

    if !cli.no_index {
        println!("temporal index: {} entries", reader.index().len());
        for (i, entry) in reader.index().iter().enumerate() {
            if cli.json {
                println!("{}", serde_json::to_string(entry)?);
            } else {
                println!(
                    "[{}] {} vol {} meta+{} data+{}",
                    i, entry.stamp, entry.volume, entry.meta_offset, entry.data_offset
                );
            }
        }
    }

    if !cli.no_meta {
        for (i, record) in reader.meta_records()?.enumerate() {
            let record = record?;
            if cli.json {
                match &record {
                    MetaRecord::InDom(r) => println!("{}", serde_json::to_string(r)?),
                    MetaRecord::Labels(r) => println!("{}", serde_json::to_string(r)?),
                    MetaRecord::Skipped { .. } => {}
                }
                continue;
            }
            match record {
                MetaRecord::InDom(r) => {
                    let tag = match r.kind {
                        InDomKind::Full => "indom",
                        InDomKind::Delta => "indom delta",
                    };
                    println!("[{}] {} @ {} indom {} numinst {}", i, tag, r.stamp, r.indom, r.instances.len());
                    for inst in &r.instances {
                        match &inst.name {
                            Some(name) => println!("    inst {} = \"{}\"", inst.id, name),
                            None => println!("    inst {} dropped", inst.id),
                        }
                    }
                }
                MetaRecord::Labels(r) => {
                    println!(
                        "[{}] labels @ {} scope {} ident {} nsets {}",
                        i,
                        r.stamp,
                        r.scope,
                        r.ident,
                        r.sets.len()
                    );
                    for set in &r.sets {
                        println!("    inst {}: {}", set.instance, set.json);
                    }
                }
                MetaRecord::Skipped { rtype, len } => {
                    println!("[{}] skipped record type {} ({} bytes)", i, rtype, len);
                }
            }
        }
    }

    Ok(())
}
