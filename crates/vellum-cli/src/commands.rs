use colored::Colorize;

use vellum_doc::{Document, DocumentConfig};
use vellum_object::{Lifecycle, Object};
use vellum_writer::{serialized, SaveMode, WriteStyle};
use vellum_xref::Location;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Info(args) => cmd_info(args),
        Command::Xref(args) => cmd_xref(args),
        Command::Check(args) => cmd_check(args),
        Command::Rewrite(args) => cmd_rewrite(args),
        Command::AppendTouch(args) => cmd_append_touch(args),
    }
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let doc = Document::open(&args.path)?;
    println!("{}", args.path.bold());
    println!("  Pages: {}", doc.page_count().to_string().yellow());
    println!("  Objects: {}", (doc.size().saturating_sub(1)).to_string().yellow());
    for key in ["Root", "Info", "Prev"] {
        if let Some(value) = doc.trailer().get(key) {
            println!("  /{}: {}", key.cyan(), render(value));
        }
    }
    if let Some(Object::Array(halves)) = doc.trailer().get("ID") {
        for (label, half) in ["permanent", "changing"].iter().zip(halves) {
            println!("  ID {}: {}", label, render(half).dimmed());
        }
    }
    Ok(())
}

fn cmd_xref(args: XrefArgs) -> anyhow::Result<()> {
    let doc = Document::open(&args.path)?;
    let table = doc.xref();
    println!("{} ({} slots)", args.path.bold(), table.size());
    for number in 0..table.size() {
        let Some(entry) = table.get(number) else {
            if args.free {
                println!("  {:>6}  {}", number, "unwritten hole".dimmed());
            }
            continue;
        };
        if entry.is_free() && !args.free && number != 0 {
            continue;
        }
        let place = match entry.location {
            Location::Offset(offset) => format!("offset {offset}"),
            Location::InContainer { container, position } => {
                format!("in {} {}", container, position).cyan().to_string()
            }
            Location::Free { next } => format!("free next={next}").dimmed().to_string(),
            Location::Unwritten => "unwritten".dimmed().to_string(),
        };
        let state = match entry.state {
            Lifecycle::Free => "free".dimmed(),
            Lifecycle::Unresolved => "unresolved".normal(),
            Lifecycle::Resolved => "resolved".green(),
            Lifecycle::Modified => "modified".yellow(),
            _ => format!("{:?}", entry.state).to_lowercase().normal(),
        };
        println!(
            "  {:>6} {:>5}  {:<22} {}",
            entry.reference.number, entry.reference.generation, place, state
        );
    }
    Ok(())
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let doc = Document::open(&args.path)?;
    let index = if doc.hybrid_index() {
        "hybrid".yellow()
    } else if doc.used_stream_index() {
        "stream".normal()
    } else {
        "legacy".normal()
    };
    println!("{}", args.path.bold());
    println!("  Index: {}", index);
    if doc.index_untrusted() {
        println!("  {} index was rebuilt or patched during load", "!".yellow().bold());
        println!("    (appending to this file is disabled; use rewrite)");
    } else {
        println!("  {} index loaded clean", "✓".green());
    }
    match doc.xref().free_chain() {
        Ok(chain) => println!("  {} free list intact ({} slots)", "✓".green(), chain.len()),
        Err(err) => println!("  {} free list broken: {}", "✗".red().bold(), err),
    }
    println!("  {} {} pages reachable", "✓".green(), doc.page_count());
    Ok(())
}

fn cmd_rewrite(args: RewriteArgs) -> anyhow::Result<()> {
    let config = DocumentConfig {
        write_style: if args.compress {
            WriteStyle::Compressed
        } else {
            WriteStyle::Plain
        },
        ..DocumentConfig::default()
    };
    let mut doc = Document::open_with(&args.path, config)?;
    doc.save_to(&args.output, SaveMode::Rewrite)?;
    println!(
        "{} Rewrote {} → {}",
        "✓".green().bold(),
        args.path,
        args.output.bold()
    );
    Ok(())
}

fn cmd_append_touch(args: AppendTouchArgs) -> anyhow::Result<()> {
    let mut doc = Document::open(&args.path)?;
    doc.save(SaveMode::Append)?;
    println!(
        "{} Appended empty revision to {}",
        "✓".green().bold(),
        args.path.bold()
    );
    Ok(())
}

fn render(value: &Object) -> String {
    String::from_utf8_lossy(&serialized(value)).into_owned()
}
