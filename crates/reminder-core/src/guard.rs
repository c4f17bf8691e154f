use crate::error::{RemindError, Result};

/// Reminder bodies can originate from LLM output upstream of this core;
/// this guard keeps a runaway generation from blowing up storage or
/// notification payloads.
pub const MAX_BODY_BYTES: usize = 20 * 1024;

const LOOP_RUN_LENGTH: usize = 10;

/// Truncate to `MAX_BODY_BYTES` and refuse bodies that look like a
/// token-loop: the same word repeated `LOOP_RUN_LENGTH`+ times in a row, or
/// "assistant" appearing more than 10 times.
pub fn sanitize_body(body: &str) -> Result<String> {
    let assistant_count = body.matches("assistant").count();
    if assistant_count > 10 {
        return Err(RemindError::Policy(
            "body contains a repeated 'assistant' token-loop pattern".to_string(),
        ));
    }

    let words: Vec<&str> = body.split_whitespace().collect();
    let mut run_word = "";
    let mut run_len = 0;
    for word in &words {
        if *word == run_word {
            run_len += 1;
            if run_len >= LOOP_RUN_LENGTH {
                return Err(RemindError::Policy(format!(
                    "body repeats {word:?} {run_len} times consecutively"
                )));
            }
        } else {
            run_word = word;
            run_len = 1;
        }
    }

    let truncated: String = body.chars().take(MAX_BODY_BYTES).collect();
    Ok(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_body() {
        let body = "a".repeat(30_000);
        let out = sanitize_body(&body).unwrap();
        assert_eq!(out.len(), MAX_BODY_BYTES);
    }

    #[test]
    fn rejects_repeated_assistant_token() {
        let body = "assistant ".repeat(11);
        assert!(sanitize_body(&body).is_err());
    }

    #[test]
    fn rejects_consecutive_token_loop() {
        let body = "go go go go go go go go go go go go";
        assert!(sanitize_body(&body).is_err());
    }

    #[test]
    fn allows_normal_body() {
        assert!(sanitize_body("pick up dry cleaning").is_ok());
    }
}
