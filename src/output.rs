//! Output sink: raw frames back-to-back on stdout, no header or delimiter.

use std::io::{self, StdoutLock, Write};

use is_terminal::IsTerminal;

use crate::traits::{CameraError, Result};

/// Refuse to stream into an interactive terminal.
pub fn ensure_not_terminal(is_terminal: bool) -> Result<()> {
    if is_terminal {
        return Err(CameraError::OutputIsTerminal);
    }
    Ok(())
}

/// Lock stdout for frame output, after checking it is not a terminal.
pub fn stdout_sink() -> Result<StdoutLock<'static>> {
    let stdout = io::stdout();
    ensure_not_terminal(stdout.is_terminal())?;
    Ok(stdout.lock())
}

/// Write one frame and flush so the consumer sees it immediately.
pub fn write_frame<W: Write>(sink: &mut W, frame: &[u8]) -> Result<()> {
    sink.write_all(frame).map_err(CameraError::Output)?;
    sink.flush().map_err(CameraError::Output)
}
