use std::io::Write;

const RESET: &str = "\x1b[0m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BOLD_RED: &str = "\x1b[1;31m";

/// Abstraction over user-facing output.
///
/// The orchestrator reports progress through this trait instead of
/// `println!`/`eprintln!` so tests can silence it and so every status line
/// carries the same severity markers.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Starting frontend on port 3001")
    fn status(&self, message: &str);

    /// Success message (e.g., "Backend ready")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Type generation failed, keeping previous output")
    fn warning(&self, message: &str);

    /// Error message (e.g., "Frontend did not bind its port")
    fn error(&self, message: &str);

    /// Emergency teardown notice
    fn emergency(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("ℹ️  {}", message);
    }

    fn success(&self, message: &str) {
        println!("{}✅ {}{}", GREEN, message, RESET);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}⚠️  {}{}", YELLOW, message, RESET);
    }

    fn error(&self, message: &str) {
        eprintln!("{}❌ {}{}", RED, message, RESET);
    }

    fn emergency(&self, message: &str) {
        eprintln!("{}🚨 {}{}", BOLD_RED, message, RESET);
        std::io::stderr().flush().ok();
    }

    fn blank(&self) {
        println!();
    }
}

/// Suppresses all output. Used by tests and the library's non-interactive callers.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn emergency(&self, _message: &str) {}
    fn blank(&self) {}
}
