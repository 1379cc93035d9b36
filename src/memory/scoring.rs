//! Importance scoring and time decay.
//!
//! Importance is fixed at write time from keyword heuristics over the
//! exchange. Ranking always uses [`decayed_importance`]: a half-life decay
//! where the half-life scales linearly with the base score, so
//! high-importance memories fade much more slowly.

use chrono::{DateTime, Utc};

const BASELINE: f64 = 0.5;

/// Phrases indicating the user is talking about themselves.
const PERSONAL_PHRASES: &[&str] = &["i am", "i want", "i like", "my name", "i feel", "i work"];

/// Compute the write-time importance of an exchange. Returns a value in
/// [0, 1]: a 0.5 baseline plus additive keyword bumps, saturating at 1.
pub fn importance(user_msg: &str, _assistant_msg: &str) -> f64 {
    let user = user_msg.to_lowercase();
    let mut score = BASELINE;

    // Explicit request to remember
    if user.contains("remember") {
        score += 0.30;
    }

    // First-person identity or desire
    if PERSONAL_PHRASES.iter().any(|phrase| user.contains(phrase)) {
        score += 0.20;
    }

    // Commitments and decisions
    if user.contains("i will") || user.contains("promise") {
        score += 0.25;
    }

    score.min(1.0)
}

/// Decay a base importance by age: `base · 2^(−age_days / (100 · base))`.
///
/// The half-life is `100 · base` days, so an importance-1.0 memory halves
/// in 100 days while an importance-0.2 memory halves in 20. At capture time
/// the decayed value equals the base; a non-positive base decays to 0.
pub fn decayed_importance(base: f64, captured_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }

    let age_days = (now - captured_at).num_milliseconds() as f64 / 86_400_000.0;
    if age_days <= 0.0 {
        return base;
    }

    let half_life = 100.0 * base;
    base * (-age_days * std::f64::consts::LN_2 / half_life).exp()
}

/// Recency weight used by ranking: `1 / (1 + age_days / 30)`.
pub fn recency_weight(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - captured_at).num_milliseconds() as f64 / 86_400_000.0;
    1.0 / (1.0 + age_days.max(0.0) / 30.0)
}
