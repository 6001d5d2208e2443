use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "torchstack")]
#[command(version)]
#[command(about = "Call-stack, operator and memory analysis of PyTorch profiler traces", long_about = None)]
pub struct Cli {
    /// TOML file with analysis settings
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log everything down to trace level on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print folded stack lines for flame graph tools
    Folded {
        #[command(flatten)]
        trace: TraceArg,

        /// Emit every frame instead of module layers only
        #[arg(long)]
        full: bool,

        /// Weight appended to every line
        #[arg(short, long, value_name = "N")]
        weight: Option<u64>,
    },
    /// Print one JSON record per stack leaf
    Leaves {
        #[command(flatten)]
        trace: TraceArg,

        /// Include the running memory total of each leaf
        #[arg(long = "memory-history")]
        memory_history: bool,
    },
    /// Print allocation lifetimes as JSON
    Memory {
        #[command(flatten)]
        trace: TraceArg,

        /// Only blocks that were never freed
        #[arg(long = "unfreed-only")]
        unfreed_only: bool,
    },
}

#[derive(Args, Debug)]
pub struct TraceArg {
    /// Profiler trace export (JSON)
    #[arg(value_name = "TRACE")]
    pub path: PathBuf,
}
