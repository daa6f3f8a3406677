//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mjit::{BackendKind, JitDisable};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "mjit")]
#[command(about = "MIPS (Allegrex) dynamic recompiler")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a raw little-endian MIPS image
    Run {
        #[command(flatten)]
        image: ImageArgs,

        #[command(flatten)]
        jit: JitArgs,

        /// Cycle budget (one per guest instruction)
        #[arg(long, default_value = "100000000")]
        cycles: i32,

        /// Compile the image's blocks before running
        #[arg(long)]
        preload: bool,

        /// Print per-block execution counts after the run
        #[arg(long)]
        profile: bool,

        /// Restore guest state from this file before running
        #[arg(long, value_name = "FILE")]
        load_state: Option<PathBuf>,

        /// Save guest state to this file after running
        #[arg(long, value_name = "FILE")]
        save_state: Option<PathBuf>,
    },

    /// Disassemble a raw image
    Disasm {
        /// Input image
        #[arg(value_name = "BIN")]
        input: PathBuf,

        /// Guest address of the first byte
        #[arg(long, value_parser = parse_addr, default_value = "0x08804000")]
        load_addr: u32,

        /// Stop after this many instructions
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Compile an image and print the block cache
    Blocks {
        #[command(flatten)]
        image: ImageArgs,

        #[command(flatten)]
        jit: JitArgs,

        /// Cycle budget for the run that fills the cache
        #[arg(long, default_value = "1000000")]
        cycles: i32,

        /// Preload the whole image instead of running it
        #[arg(long)]
        preload_only: bool,
    },
}

/// Which image to load and where.
#[derive(Args)]
pub struct ImageArgs {
    /// Input image
    #[arg(value_name = "BIN")]
    pub input: PathBuf,

    /// Guest address of the first byte
    #[arg(long, value_parser = parse_addr, default_value = "0x08804000")]
    pub load_addr: u32,

    /// Entry point (defaults to the load address)
    #[arg(long, value_parser = parse_addr)]
    pub entry: Option<u32>,

    /// log2 of guest memory size
    #[arg(long, default_value = "25", value_parser = clap::value_parser!(u8).range(10..=32))]
    pub memory_bits: u8,
}

/// Recompiler tuning.
#[derive(Args)]
pub struct JitArgs {
    /// Backend that runs translated blocks
    #[arg(long, value_enum, default_value = "x64")]
    pub backend: BackendArg,

    /// Guest instructions per block
    #[arg(long, default_value = "128")]
    pub max_block: u32,

    /// Instruction classes to route through the interpreter
    /// (alu,shift,muldiv,lsu,fpu,branch,all)
    #[arg(long, value_parser = parse_disable, default_value = "")]
    pub disable: JitDisable,

    /// Do not link native blocks to each other
    #[arg(long)]
    pub no_link: bool,

    /// Register-cache lookahead window
    #[arg(long, default_value = "30")]
    pub lookahead: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BackendArg {
    /// Interpret the IR
    Interp,
    /// x86-64 machine code
    X64,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Interp => Self::Interpreter,
            BackendArg::X64 => Self::X64,
        }
    }
}

/// Parse a hex (`0x` prefix) or decimal address.
pub fn parse_addr(arg: &str) -> Result<u32, String> {
    let parsed = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => arg.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{arg}': {e}"))
}

/// Parse a comma-separated list of disable flags.
pub fn parse_disable(arg: &str) -> Result<JitDisable, String> {
    arg.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .try_fold(JitDisable::NONE, |acc, name| {
            JitDisable::from_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| format!("unknown instruction class '{name}'"))
        })
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr("0x08804000"), Ok(0x0880_4000));
        assert_eq!(parse_addr("0x0880_4000"), Ok(0x0880_4000));
        assert_eq!(parse_addr("4096"), Ok(4096));
        assert!(parse_addr("0xZZ").is_err());
    }

    #[test]
    fn test_parse_disable() {
        assert_eq!(parse_disable(""), Ok(JitDisable::NONE));
        let flags = parse_disable("alu, fpu").expect("valid");
        assert!(flags.contains(JitDisable::ALU));
        assert!(flags.contains(JitDisable::FPU));
        assert!(!flags.contains(JitDisable::LSU));
        assert!(parse_disable("alu,vfpu").is_err());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "mjit",
            "run",
            "prog.bin",
            "--entry",
            "0x08804010",
            "--backend",
            "interp",
            "--disable",
            "lsu",
            "--cycles",
            "500",
        ])
        .expect("parses");
        let Commands::Run {
            image, jit, cycles, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(image.load_addr, 0x0880_4000);
        assert_eq!(image.entry, Some(0x0880_4010));
        assert!(matches!(BackendKind::from(jit.backend), BackendKind::Interpreter));
        assert!(jit.disable.contains(JitDisable::LSU));
        assert_eq!(cycles, 500);
    }
}
