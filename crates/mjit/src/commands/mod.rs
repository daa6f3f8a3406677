//! Command implementations.

mod blocks;
mod disasm;
mod run;

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use mjit::{EmitConfig, Jit, JitConfig, SyscallAction, SyscallContext, SyscallHandler};
use mjit_state::DEFAULT_MEMORY_BASE;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ImageArgs, JitArgs};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Run {
            image,
            jit,
            cycles,
            preload,
            profile,
            load_state,
            save_state,
        } => run::cmd_run(
            image,
            jit,
            *cycles,
            *preload,
            *profile,
            load_state.as_deref(),
            save_state.as_deref(),
        ),
        Commands::Disasm {
            input,
            load_addr,
            count,
        } => disasm::cmd_disasm(input, *load_addr, *count),
        Commands::Blocks {
            image,
            jit,
            cycles,
            preload_only,
        } => blocks::cmd_blocks(image, jit, *cycles, *preload_only),
    }
}

/// Build the recompiler configuration from CLI flags.
fn jit_config(image: &ImageArgs, args: &JitArgs, profile: bool) -> JitConfig {
    let size = 1usize << image.memory_bits;
    let base = if image.memory_bits >= 32 {
        0
    } else {
        DEFAULT_MEMORY_BASE & !((1u32 << image.memory_bits) - 1)
    };
    JitConfig::new()
        .with_backend(args.backend.into())
        .with_memory(base, size)
        .with_disable(args.disable)
        .with_max_block_instructions(args.max_block)
        .with_linking(!args.no_link)
        .with_profile(profile)
        .with_emit(
            EmitConfig::default()
                .with_lookahead_window(args.lookahead)
                .with_pointerify(image.memory_bits >= 32),
        )
}

/// Create a recompiler and load the image. Returns it with the image length.
fn load_image(image: &ImageArgs, args: &JitArgs, profile: bool) -> mjit::Result<(Jit, u32)> {
    let data = std::fs::read(&image.input)?;
    let len = u32::try_from(data.len()).map_err(|_| mjit::Error::State("image larger than 4 GiB".to_string()))?;
    let mut jit = Jit::new(jit_config(image, args, profile))?;
    jit.write_memory(image.load_addr, &data)?;
    jit.state_mut().pc = image.entry.unwrap_or(image.load_addr);
    info!(
        path = %image.input.display(),
        bytes = len,
        load_addr = format_args!("{:#010x}", image.load_addr),
        "loaded image"
    );
    Ok((jit, len))
}

/// Minimal host services for bare programs.
///
/// | code | call |
/// |------|------|
/// | 0 | exit(`$a0`) |
/// | 1 | putchar(`$a0`) |
/// | 2 | write(`$a0` buffer, `$a1` length), returns bytes written |
pub struct HostSyscalls {
    exit_code: Rc<Cell<Option<u32>>>,
}

impl HostSyscalls {
    /// The handler and a cell that receives the guest's exit code.
    pub fn new() -> (Self, Rc<Cell<Option<u32>>>) {
        let exit_code = Rc::new(Cell::new(None));
        (
            Self {
                exit_code: Rc::clone(&exit_code),
            },
            exit_code,
        )
    }
}

impl SyscallHandler for HostSyscalls {
    fn syscall(&mut self, ctx: &mut SyscallContext<'_>, code: u32) -> SyscallAction {
        match code {
            0 => {
                self.exit_code.set(Some(ctx.arg(0)));
                SyscallAction::Stop
            }
            1 => {
                let byte = ctx.arg(0).to_le_bytes()[0];
                let _ = std::io::stdout().write_all(&[byte]);
                SyscallAction::Continue
            }
            2 => {
                let (addr, len) = (ctx.arg(0), ctx.arg(1));
                let written = match ctx.mem.read_bytes(addr, len as usize) {
                    Ok(bytes) => std::io::stdout().write_all(bytes).map_or(u32::MAX, |()| len),
                    Err(e) => {
                        warn!(error = %e, "write syscall with bad buffer");
                        u32::MAX
                    }
                };
                ctx.set_return(written);
                SyscallAction::Continue
            }
            _ => {
                warn!(
                    code = format_args!("{code:#x}"),
                    pc = format_args!("{:#010x}", ctx.state.pc),
                    "unknown syscall"
                );
                SyscallAction::Continue
            }
        }
    }
}
