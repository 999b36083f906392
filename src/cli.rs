use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "astrograph",
    version,
    about = "Call-graph analysis for multi-language projects",
    after_help = r#"Examples:
  astrograph analyze --root . --out analysis.json --pretty
  astrograph analyze --root . --no-cache --entrypoint serve
  astrograph validate --input analysis.json
  astrograph show --root . --path src/main.rs --start-line 10 --end-line 20
  astrograph cache stats --root .
"#
)]
pub struct Args {
    /// More logging (debug). Overridden by RUST_LOG.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Only warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze a project and write the result document.
    Analyze {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Cache database path.
        #[arg(long, conflicts_with = "no_cache")]
        cache: Option<PathBuf>,
        /// Parse every file, without reading or writing the cache.
        #[arg(long)]
        no_cache: bool,
        /// Extra entrypoint, by name or fq name. Repeatable.
        #[arg(long = "entrypoint")]
        entrypoints: Vec<String>,
        #[arg(long)]
        follow_symlinks: bool,
        /// Include files ignored by .gitignore and .astrographignore.
        #[arg(long)]
        no_ignore: bool,
        /// Parse worker threads, 0 for one per core.
        #[arg(long)]
        threads: Option<usize>,
        /// YAML config file; defaults to <root>/.astrograph.yml.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
    /// Check a result document's schema version and integrity.
    Validate {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print a project file, or a line range of it.
    Show {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        path: String,
        #[arg(long, requires = "end_line")]
        start_line: Option<usize>,
        #[arg(long, requires = "start_line")]
        end_line: Option<usize>,
    },
    /// Inspect or clear the content cache.
    Cache {
        #[arg(value_enum)]
        action: CacheAction,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CacheAction {
    Clear,
    Stats,
}
