//! Accept / retry / escalate decision for a scored draft.

use brandpipe_shared::BfsScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Regenerate the draft and score again.
    Retry,
    /// Hand to a human; never auto-accepted.
    Escalate,
}

/// `score` is `None` when scoring itself failed.
pub fn decide(score: Option<&BfsScore>, retry_count: u32, max_retries: u32) -> Verdict {
    match score {
        Some(s) if s.passed => Verdict::Accept,
        _ if retry_count < max_retries => Verdict::Retry,
        _ => Verdict::Escalate,
    }
}
