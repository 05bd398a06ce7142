//! Marker output on stdout.
//!
//! Lines like `[VERSION] ...`, `[OPEN FILE] ...` and `[ERROR] (Chirp n) ...`
//! are parsed by automated post-processing, so they go to stdout (stderr is
//! reserved for the `log` diagnostics). A single process-wide mutex keeps
//! multi-line messages intact when both worker threads print at once.

use std::io::{self, Write};
use std::sync::Mutex;

static STDOUT_GUARD: Mutex<()> = Mutex::new(());

/// Print one marker line (or a pre-composed multi-line block) atomically.
pub fn emit(msg: impl AsRef<str>) {
    let _guard = STDOUT_GUARD.lock().unwrap();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", msg.as_ref());
    let _ = out.flush();
}
