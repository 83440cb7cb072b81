//! Best-effort JSON recovery from model replies
//!
//! Models sometimes wrap the requested JSON in a markdown fence or in prose.
//! Each [`DecodeStrategy`] is one way of finding the object; they are tried
//! in [`STRATEGIES`] order and the first success wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::Error;
use crate::Result;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*\n([\s\S]*?)\n```").expect("valid regex")
});

/// One way of locating JSON inside a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// The whole reply is JSON
    Direct,
    /// JSON inside a ```` ``` ```` or ```` ```json ```` fence
    FencedBlock,
    /// Everything from the first `{` to the last `}`
    BraceSlice,
}

/// Strategies in the order they are tried
pub const STRATEGIES: [DecodeStrategy; 3] = [
    DecodeStrategy::Direct,
    DecodeStrategy::FencedBlock,
    DecodeStrategy::BraceSlice,
];

/// Result of applying one strategy
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeAttempt {
    Decoded(Value),
    Failed(String),
}

impl DecodeStrategy {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::FencedBlock => "fenced-block",
            Self::BraceSlice => "brace-slice",
        }
    }

    /// Try this strategy on `raw`
    #[must_use]
    pub fn apply(self, raw: &str) -> DecodeAttempt {
        let candidate = match self {
            Self::Direct => Some(raw),
            Self::FencedBlock => FENCED_BLOCK
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
            Self::BraceSlice => brace_slice(raw),
        };

        let Some(candidate) = candidate else {
            let reason = match self {
                Self::Direct => "empty input",
                Self::FencedBlock => "no fenced code block",
                Self::BraceSlice => "no brace-delimited span",
            };
            return DecodeAttempt::Failed(reason.to_string());
        };

        match serde_json::from_str(candidate) {
            Ok(value) => DecodeAttempt::Decoded(value),
            Err(e) => DecodeAttempt::Failed(e.to_string()),
        }
    }
}

fn brace_slice(raw: &str) -> Option<&str> {
    let first = raw.find('{')?;
    let last = raw.rfind('}')?;
    (last > first).then(|| &raw[first..=last])
}

/// Decode `raw` with the first strategy that succeeds
///
/// # Errors
///
/// Returns `UnparseableResponse` carrying an excerpt of `raw` when every
/// strategy fails
pub fn decode_json(raw: &str) -> Result<(Value, DecodeStrategy)> {
    for strategy in STRATEGIES {
        match strategy.apply(raw) {
            DecodeAttempt::Decoded(value) => {
                tracing::trace!(strategy = strategy.name(), "decoded model reply");
                return Ok((value, strategy));
            }
            DecodeAttempt::Failed(reason) => {
                tracing::trace!(strategy = strategy.name(), reason, "decode strategy failed");
            }
        }
    }
    Err(Error::unparseable(raw))
}
