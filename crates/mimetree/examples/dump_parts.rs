//! Example: print the part tree and attachments of a message file
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=mimetree=debug cargo run --example dump_parts -- message.eml [out-dir]
//! ```
//!
//! With an output directory, every attachment is written there under its
//! filename (or its part id when it has none).

use std::env;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, bail};
use mimetree::{BodyKind, Message, Part, PartTree};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args_os().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: dump_parts <message.eml> [out-dir]");
    };
    let out_dir = args.next().map(PathBuf::from);

    let mut message = Message::new();
    message
        .attach_path(&path)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    println!("Subject: {}", message.subject()?.as_deref().unwrap_or("(no subject)"));
    if let Some(date) = message.date()? {
        println!("Date:    {}", date.to_rfc2822());
    }
    println!();

    let tree = message.tree()?;
    print_part(tree, tree.root(), 0);
    println!();

    for kind in [BodyKind::Text, BodyKind::Html] {
        if let Some(body) = message.message_body(kind)? {
            println!("{kind} body: {} chars", body.chars().count());
        }
    }

    for attachment in message.attachments()? {
        let name = attachment
            .filename()
            .map_or_else(|| format!("part-{}", attachment.part_id()), String::from);
        println!(
            "attachment {} {} {:?}",
            attachment.part_id(),
            attachment.mime_type(),
            name
        );

        if let Some(dir) = &out_dir {
            let target = dir.join(sanitize(&name));
            let mut file = File::create(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
            let written = attachment.copy_to(&mut file)?;
            println!("  wrote {written} bytes to {}", target.display());
        }
    }

    Ok(())
}

fn print_part(tree: &PartTree, part: &Part, depth: usize) {
    let span = part.body_span();
    println!(
        "{:indent$}{} {} [{}..{}] {}",
        "",
        part.id(),
        part.mime_type(),
        span.start,
        span.end,
        part.transfer_encoding(),
        indent = depth * 2,
    );
    for child in tree.children(part) {
        print_part(tree, child, depth + 1);
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}
