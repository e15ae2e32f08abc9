//! Rate-limit circuit breaker.
//!
//! The Gemini CLI retries 429s on its own and only tells us on stderr. A
//! quota that never recovers turns that into an endless retry loop, so the
//! chat is stopped once the streak reaches [`RATE_LIMIT_THRESHOLD`].

use std::sync::LazyLock;

use regex::Regex;

pub const RATE_LIMIT_THRESHOLD: u32 = 10;

const SIGNATURES: &[&str] = &[
    "rate limit",
    "ratelimitexceeded",
    "resource_exhausted",
    "quota exceeded",
];

/// `429` as a status code, not as digits inside a longer number.
static STATUS_429: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b429\b").expect("valid regex"));

pub fn is_rate_limit(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    SIGNATURES.iter().any(|sig| lower.contains(sig)) || STATUS_429.is_match(&lower)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not a rate-limit line.
    Ignored,
    /// Counted, still below the threshold.
    Retrying(u32),
    /// This signature reached the threshold.
    Tripped,
    /// The breaker already tripped; nothing more to do.
    AlreadyTripped,
}

#[derive(Debug, Default)]
pub struct RateLimitBreaker {
    streak: u32,
    tripped: bool,
}

impl RateLimitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_stderr(&mut self, line: &str) -> Verdict {
        if !is_rate_limit(line) {
            return Verdict::Ignored;
        }
        if self.tripped {
            return Verdict::AlreadyTripped;
        }
        self.streak += 1;
        if self.streak >= RATE_LIMIT_THRESHOLD {
            self.tripped = true;
            Verdict::Tripped
        } else {
            Verdict::Retrying(self.streak)
        }
    }

    /// A decoded stdout event means the model answered.
    pub fn record_success(&mut self) {
        if !self.tripped {
            self.streak = 0;
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}

pub fn breaker_message() -> String {
    format!(
        "Gemini is rate limited: {RATE_LIMIT_THRESHOLD} retries in a row failed. \
         The chat was stopped; try again later or switch models."
    )
}
