//! Disasm command.

use std::path::Path;

use tracing::{error, warn};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

/// Handle the `disasm` command.
pub fn cmd_disasm(input: &Path, load_addr: u32, count: Option<usize>) -> i32 {
    let data = match std::fs::read(input) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, path = %input.display(), "failed to read image");
            return EXIT_FAILURE;
        }
    };
    if data.len() % 4 != 0 {
        warn!(bytes = data.len(), "image length is not a multiple of 4, ignoring the tail");
    }

    let words = data.chunks_exact(4).take(count.unwrap_or(usize::MAX));
    for (pc, word) in (load_addr..).step_by(4).zip(words) {
        let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        println!("{pc:08x}:  {raw:08x}  {}", mjit_isa::disasm(raw, pc));
    }
    EXIT_SUCCESS
}
