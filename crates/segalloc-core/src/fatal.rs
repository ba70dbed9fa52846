//! Process termination on detected misuse.

use std::io::Write;

use crate::error::Misuse;

/// Prints one diagnostic line to stderr and aborts.
///
/// Never unwinds: no destructor runs after misuse is detected.
pub fn abort_on_misuse(symbol: &str, misuse: Misuse) -> ! {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "segalloc: fatal: {symbol}: {misuse}");
    let _ = stderr.flush();
    std::process::abort()
}
