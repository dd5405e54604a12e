//! Terminal confirmation prompts.

use crate::core::config::CONFIRM_MAX_ATTEMPTS;
use std::io::{BufRead, Write};
use tracing::debug;

/// Ask `question` on stdout and read the answer from stdin.
///
/// Empty input defaults to yes; `y`/`yes` and `n`/`no` are accepted in any
/// case; anything else retries. After three failed attempts (or on read
/// error) the answer is no.
pub fn confirm(question: &str) -> bool {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    ask_for_confirmation(question, &mut stdin.lock(), &mut stdout.lock())
}

/// Testable core of [`confirm`]: prompt protocol over arbitrary streams.
pub fn ask_for_confirmation(
    question: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> bool {
    for _ in 0..CONFIRM_MAX_ATTEMPTS {
        if write!(output, "{question} [Y/n]: ").and_then(|_| output.flush()).is_err() {
            return false;
        }

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false, // EOF or broken stdin
            Ok(_) => {}
        }

        match line.trim().to_lowercase().as_str() {
            "" | "y" | "yes" => return true,
            "n" | "no" => return false,
            other => debug!(event = "confirm_retry", answer = %other),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(input: &str) -> bool {
        let mut out = Vec::new();
        ask_for_confirmation("Receive file x?", &mut Cursor::new(input), &mut out)
    }

    #[test]
    fn test_yes_variants() {
        assert!(ask("y\n"));
        assert!(ask("Y\n"));
        assert!(ask("yes\n"));
        assert!(ask("YES\n"));
    }

    #[test]
    fn test_empty_input_defaults_yes() {
        assert!(ask("\n"));
        assert!(ask("   \n"));
    }

    #[test]
    fn test_no_variants() {
        assert!(!ask("n\n"));
        assert!(!ask("No\n"));
    }

    #[test]
    fn test_invalid_then_valid() {
        assert!(ask("maybe\ny\n"));
        assert!(!ask("what\nhuh\nno\n"));
    }

    #[test]
    fn test_exhausted_attempts_is_no() {
        assert!(!ask("a\nb\nc\nd\n"));
    }

    #[test]
    fn test_eof_is_no() {
        assert!(!ask(""));
    }

    #[test]
    fn test_prompt_format() {
        let mut out = Vec::new();
        ask_for_confirmation("Receive file x?", &mut Cursor::new("y\n"), &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "Receive file x? [Y/n]: ");
    }
}
