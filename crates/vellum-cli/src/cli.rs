use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vellum",
    about = "Vellum — persistent document object-graph engine",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show trailer, identifier, and page count
    Info(InfoArgs),
    /// Dump the cross-reference table
    Xref(XrefArgs),
    /// Open with recovery enabled and report index health
    Check(CheckArgs),
    /// Rewrite the document from scratch into a new file
    Rewrite(RewriteArgs),
    /// Append an empty incremental revision
    AppendTouch(AppendTouchArgs),
}

#[derive(Args)]
pub struct InfoArgs {
    pub path: String,
}

#[derive(Args)]
pub struct XrefArgs {
    pub path: String,
    /// Include free slots in the listing
    #[arg(long)]
    pub free: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    pub path: String,
}

#[derive(Args)]
pub struct RewriteArgs {
    pub path: String,
    pub output: String,
    /// Batch eligible objects into compressed containers
    #[arg(short, long)]
    pub compress: bool,
}

#[derive(Args)]
pub struct AppendTouchArgs {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info() {
        let cli = Cli::try_parse_from(["vellum", "info", "a.vlm"]).unwrap();
        if let Command::Info(args) = cli.command {
            assert_eq!(args.path, "a.vlm");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_xref_free() {
        let cli = Cli::try_parse_from(["vellum", "xref", "--free", "a.vlm"]).unwrap();
        if let Command::Xref(args) = cli.command {
            assert!(args.free);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_rewrite_compress() {
        let cli = Cli::try_parse_from(["vellum", "rewrite", "-c", "a.vlm", "b.vlm"]).unwrap();
        if let Command::Rewrite(args) = cli.command {
            assert!(args.compress);
            assert_eq!(args.output, "b.vlm");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_append_touch() {
        let cli = Cli::try_parse_from(["vellum", "append-touch", "a.vlm"]).unwrap();
        assert!(matches!(cli.command, Command::AppendTouch(_)));
    }

    #[test]
    fn parse_verbose() {
        let cli = Cli::try_parse_from(["vellum", "--verbose", "check", "a.vlm"]).unwrap();
        assert!(cli.verbose);
    }
}
