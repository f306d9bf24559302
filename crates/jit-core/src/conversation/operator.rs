//! Human confirmation between attempts in interactive sessions.

use std::io::{BufRead, Write};

use tracing::warn;

pub trait Operator {
    /// Whether to start another attempt after `failed` rejected ones.
    fn confirm_continue(&mut self, failed: usize) -> bool;
}

/// Accepts `yes`, `y` and `continue`, case-insensitively.
pub fn parse_confirmation(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "yes" | "y" | "continue"
    )
}

/// Prompts on stdout and reads the answer from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinOperator;

impl Operator for StdinOperator {
    fn confirm_continue(&mut self, failed: usize) -> bool {
        let mut stdout = std::io::stdout();
        // A broken stdout should not block the answer.
        let _ = write!(stdout, "Attempt {failed} failed. Continue to next iteration? (yes/no): ");
        let _ = stdout.flush();

        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => parse_confirmation(&answer),
            Err(e) => {
                warn!("Cannot read confirmation: {e}");
                false
            }
        }
    }
}
