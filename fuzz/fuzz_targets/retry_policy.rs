#![no_main]

use std::time::Duration;

use docbuild_retry::{RetryBackoff, RetryPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, u8, u64, u64)| {
    let (attempt, backoff_byte, initial_ms, max_ms) = data;

    // Clamp values to reasonable ranges
    let attempt = attempt % 100 + 1; // 1-100
    let backoff = match backoff_byte % 3 {
        0 => RetryBackoff::Fixed,
        1 => RetryBackoff::Linear,
        _ => RetryBackoff::Exponential,
    };
    let initial_delay = Duration::from_millis(initial_ms % 10_000 + 1);
    let max_delay = Duration::from_millis(max_ms % 300_000 + 1);

    let policy = RetryPolicy {
        backoff,
        initial_delay,
        max_delay,
        max_retries: 100,
    }
    .validated();

    let delay = policy.delay(attempt);

    // Invariants:
    // 1. Delay never exceeds the cap.
    assert!(delay <= policy.max_delay);

    // 2. Fixed backoff never varies with the attempt number.
    if policy.backoff == RetryBackoff::Fixed {
        assert_eq!(delay, policy.delay(1));
    }

    // 3. Linear and exponential are monotone.
    if policy.backoff != RetryBackoff::Fixed {
        assert!(policy.delay(attempt + 1) >= delay);
    }
});
