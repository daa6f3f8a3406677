//! Blocks command.

use tracing::{error, info};

use super::load_image;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, ImageArgs, JitArgs};

/// Handle the `blocks` command.
pub fn cmd_blocks(image: &ImageArgs, args: &JitArgs, cycles: i32, preload_only: bool) -> i32 {
    let (mut jit, len) = match load_image(image, args, false) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, path = %image.input.display(), "failed to load image");
            return EXIT_FAILURE;
        }
    };

    if preload_only {
        let end = image.load_addr.saturating_add(len);
        match jit.preload_function(image.load_addr, end) {
            Ok(count) => info!(blocks = count, "preloaded"),
            Err(e) => {
                error!(error = %e, "preload failed");
                return EXIT_FAILURE;
            }
        }
    } else {
        match jit.run(cycles) {
            Ok(exit) => info!(?exit, pc = format_args!("{:#010x}", jit.state().pc), "run stopped"),
            Err(e) => {
                error!(error = %e, "execution failed");
                return EXIT_FAILURE;
            }
        }
    }

    let mut starts: Vec<u32> = jit.blocks().map(|b| b.start).collect();
    starts.sort_unstable();
    for start in starts {
        if let Some(info) = jit.block_debug_info(start) {
            println!("{info}");
        }
    }

    let stats = jit.stats();
    println!(
        "{} blocks ({} preloaded, {} invalid), {} bytes of code",
        stats.finalized + stats.preloaded,
        stats.preloaded,
        stats.invalid,
        jit.code_used()
    );
    if let (Some(min), Some(max)) = (stats.min_bloat_block, stats.max_bloat_block) {
        println!(
            "bloat: min {:.2} ({min:#010x}) max {:.2} ({max:#010x}) avg {:.2}",
            stats.min_bloat, stats.max_bloat, stats.avg_bloat
        );
    }
    EXIT_SUCCESS
}
