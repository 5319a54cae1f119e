//! Exponential backoff for collaborator calls (model transport, mostly).

use crate::core::config::RetryPolicy;
use crate::core::error::ScoutError;
use std::thread;

/// Call `f` until it succeeds or `policy.max_attempts` calls have failed.
///
/// Sleeps `initial_delay * factor^(n-1)` after the n-th failure. The last
/// error is returned unchanged.
pub fn retry_with_backoff<F, R>(policy: &RetryPolicy, mut f: F) -> Result<R, ScoutError>
where
    F: FnMut() -> Result<R, ScoutError>,
{
    use colored::Colorize;

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                eprintln!(
                    "{} attempt {}/{} failed: {} (retrying in {}ms)",
                    "[Retry]".bright_yellow(),
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
