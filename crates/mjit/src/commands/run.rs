//! Run command.

use std::path::Path;
use std::time::Instant;

use mjit::{Jit, RunExit};
use tracing::{error, info, warn};

use super::{HostSyscalls, load_image};
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, ImageArgs, JitArgs};

/// Blocks listed by `--profile`.
const PROFILE_TOP: usize = 20;

/// Handle the `run` command.
#[allow(clippy::too_many_arguments)]
pub fn cmd_run(
    image: &ImageArgs,
    args: &JitArgs,
    cycles: i32,
    preload: bool,
    profile: bool,
    load_state_path: Option<&Path>,
    save_state_path: Option<&Path>,
) -> i32 {
    let (mut jit, len) = match load_image(image, args, profile) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, path = %image.input.display(), "failed to load image");
            return EXIT_FAILURE;
        }
    };

    if let Some(path) = load_state_path {
        match jit.load_state(path) {
            Ok(()) => info!(path = %path.display(), "loaded state"),
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to load state");
                return EXIT_FAILURE;
            }
        }
    }

    if preload {
        let end = image.load_addr.saturating_add(len);
        match jit.preload_function(image.load_addr, end) {
            Ok(count) => info!(blocks = count, "preloaded"),
            Err(e) => warn!(error = %e, "preload failed, compiling lazily"),
        }
    }

    let (handler, exit_code) = HostSyscalls::new();
    jit.set_syscall_handler(handler);

    let start = Instant::now();
    let result = jit.run(cycles);
    let elapsed = start.elapsed();

    let code = match result {
        Ok(exit) => {
            let pc = jit.state().pc;
            info!(
                ?exit,
                pc = format_args!("{pc:#010x}"),
                time = format_args!("{:.3}s", elapsed.as_secs_f64()),
                "run stopped"
            );
            match exit {
                RunExit::Stopped => exit_code.get().map_or(EXIT_SUCCESS, |c| i32::try_from(c).unwrap_or(EXIT_FAILURE)),
                RunExit::OutOfCycles | RunExit::Breakpoint(_) => EXIT_SUCCESS,
                RunExit::Syscall(code) => {
                    warn!(code = format_args!("{code:#x}"), "unhandled syscall");
                    EXIT_FAILURE
                }
                RunExit::Fault(fault) => {
                    error!(error = %fault, "guest fault");
                    EXIT_FAILURE
                }
            }
        }
        Err(e) => {
            error!(error = %e, "execution failed");
            EXIT_FAILURE
        }
    };

    if profile {
        print_profile(&jit);
    }

    if let Some(path) = save_state_path {
        match jit.save_state(path) {
            Ok(()) => info!(path = %path.display(), "saved state"),
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to save state");
                return EXIT_FAILURE;
            }
        }
    }

    code
}

fn print_profile(jit: &Jit) {
    let mut blocks: Vec<_> = jit.blocks().filter(|b| b.counters.runs > 0).collect();
    blocks.sort_unstable_by(|a, b| b.counters.cycles.cmp(&a.counters.cycles));
    let total: u64 = blocks.iter().map(|b| b.counters.cycles).sum();

    println!("{:>10}  {:>12}  {:>12}  {:>6}", "block", "runs", "cycles", "share");
    for block in blocks.iter().take(PROFILE_TOP) {
        #[allow(clippy::cast_precision_loss)]
        let share = if total == 0 {
            0.0
        } else {
            block.counters.cycles as f64 * 100.0 / total as f64
        };
        println!(
            "{:#010x}  {:>12}  {:>12}  {share:>5.1}%",
            block.start, block.counters.runs, block.counters.cycles
        );
    }
}
