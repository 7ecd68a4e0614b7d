//! Importance decay model
//!
//! Computes a memory's current importance from age, access pattern, graph
//! connectivity, type, and channel diversity.
//!
//! # The model
//!
//! Base exponential decay, slowed by every signal of continued relevance:
//!
//! ```text
//! stability      = 1 + k_access * ln(1 + access_count)
//! resistance     = min(1, connection_count * k_relation)
//! channel_boost  = 1 / (1 + k_channel * channel_mentions)
//! effective_rate = base_rate * type_mult * channel_boost / stability * (1 - resistance)
//! decayed        = importance * e^(-effective_rate * hours_passed)
//! ```
//!
//! Two corrections follow:
//! - **Recency paradox**: a memory older than a week but accessed within the
//!   last day is clearly still relevant, so its decayed score is boosted by
//!   30% before the floor.
//! - **Retention floor**: the result never falls below
//!   `importance * min_retention`, so any memory can recover through access.
//!
//! The function is pure. Connection counts come from the caller's shared
//! graph snapshot; the calculator never rebuilds or reloads the graph.

use crate::config::DecayConfig;
use crate::constants::{
    DECAY_BATCH_CHUNK, RECENCY_PARADOX_BOOST, RECENCY_PARADOX_MAX_ACCESS_HOURS,
    RECENCY_PARADOX_MIN_AGE_HOURS,
};
use crate::record::DecaySnapshot;

/// Calculate current importance for a single memory snapshot.
///
/// Returns a value in `[importance * min_retention, importance * 1.3]`.
/// Negative `hours_passed` (clock skew) returns `importance` unchanged.
#[inline]
pub fn calculate(snapshot: &DecaySnapshot, config: &DecayConfig) -> f32 {
    let importance = snapshot.importance as f64;

    if snapshot.hours_passed < 0.0 {
        return snapshot.importance;
    }

    let stability = 1.0 + config.access_stability_k * (1.0 + snapshot.access_count as f64).ln();
    let resistance =
        (snapshot.connection_count as f64 * config.relation_resistance_k).min(1.0);
    let type_multiplier = config.type_multipliers.for_type(snapshot.memory_type);
    let channel_boost =
        1.0 / (1.0 + config.channel_diversity_k * snapshot.channel_mentions as f64);

    let effective_rate =
        config.base_decay_rate * type_multiplier * channel_boost / stability * (1.0 - resistance);

    let mut decayed = importance * (-effective_rate * snapshot.hours_passed).exp();

    // Boost before the floor: an extreme low-importance memory still bottoms
    // out at the floor, never above its boosted score.
    if snapshot.last_access_hours >= 0.0
        && snapshot.hours_passed > RECENCY_PARADOX_MIN_AGE_HOURS
        && snapshot.last_access_hours < RECENCY_PARADOX_MAX_ACCESS_HOURS
    {
        decayed *= RECENCY_PARADOX_BOOST;
    }

    decayed.max(importance * config.min_retention) as f32
}

/// Calculate current importance for a batch of snapshots.
///
/// Processes fixed-width chunks of the scalar function, so results are
/// bit-identical to calling [`calculate`] per element.
pub fn calculate_batch(snapshots: &[DecaySnapshot], config: &DecayConfig) -> Vec<f32> {
    let mut out = Vec::with_capacity(snapshots.len());
    for chunk in snapshots.chunks(DECAY_BATCH_CHUNK) {
        for snapshot in chunk {
            out.push(calculate(snapshot, config));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryType;

    fn snapshot(importance: f32, hours_passed: f64) -> DecaySnapshot {
        DecaySnapshot {
            importance,
            memory_type: MemoryType::Conversation,
            hours_passed,
            last_access_hours: hours_passed,
            access_count: 0,
            connection_count: 0,
            channel_mentions: 0,
        }
    }

    #[test]
    fn test_negative_hours_returns_unchanged() {
        let s = snapshot(0.8, -5.0);
        assert_eq!(calculate(&s, &DecayConfig::default()), 0.8);
    }

    #[test]
    fn test_week_old_conversation() {
        // importance=0.8, 168h, all counters zero, defaults:
        // rate = 0.002, decayed = 0.8 * e^(-0.336) ≈ 0.5715
        let s = snapshot(0.8, 168.0);
        let result = calculate(&s, &DecayConfig::default());
        let expected = 0.8 * (-0.002_f64 * 168.0).exp();
        assert!((result as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_retention_floor() {
        // A year untouched: raw decay would be ~0.8 * e^(-17.5) ≈ 0,
        // but the floor holds at 0.08
        let s = snapshot(0.8, 24.0 * 365.0);
        let result = calculate(&s, &DecayConfig::default());
        assert!((result - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_floor_holds_for_all_inputs() {
        let config = DecayConfig::default();
        for importance in [0.01_f32, 0.1, 0.5, 0.99] {
            for hours in [0.0, 1.0, 168.0, 10_000.0] {
                for access_count in [0u32, 5, 100] {
                    let s = DecaySnapshot {
                        importance,
                        memory_type: MemoryType::Fact,
                        hours_passed: hours,
                        last_access_hours: hours,
                        access_count,
                        connection_count: 2,
                        channel_mentions: 1,
                    };
                    let result = calculate(&s, &config);
                    assert!(
                        result >= importance * config.min_retention as f32 - f32::EPSILON,
                        "floor violated at importance={importance} hours={hours}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_accessed_memories_decay_slower() {
        let config = DecayConfig::default();
        let idle = snapshot(0.8, 500.0);
        let mut busy = snapshot(0.8, 500.0);
        busy.access_count = 20;
        assert!(calculate(&busy, &config) > calculate(&idle, &config));
    }

    #[test]
    fn test_connected_memories_resist_decay() {
        let config = DecayConfig::default();
        let isolated = snapshot(0.8, 500.0);
        let mut connected = snapshot(0.8, 500.0);
        connected.connection_count = 10; // full resistance
        assert_eq!(calculate(&connected, &config), 0.8);
    }

    #[test]
    fn test_facts_outlast_conversations() {
        let config = DecayConfig::default();
        let conv = snapshot(0.8, 1000.0);
        let mut fact = snapshot(0.8, 1000.0);
        fact.memory_type = MemoryType::Fact;
        assert!(calculate(&fact, &config) > calculate(&conv, &config));
    }

    #[test]
    fn test_recency_paradox_boost() {
        let config = DecayConfig::default();
        let mut stale = snapshot(0.8, 200.0);
        stale.last_access_hours = 100.0;
        let mut fresh = snapshot(0.8, 200.0);
        fresh.last_access_hours = 2.0;

        let stale_score = calculate(&stale, &config) as f64;
        let fresh_score = calculate(&fresh, &config) as f64;
        assert!((fresh_score - stale_score * 1.3).abs() < 1e-6);
    }

    #[test]
    fn test_boost_applied_before_floor() {
        // Low importance, ancient, recently accessed: boosted score is still
        // below the floor, so the floor wins. Boost never lifts above floor
        // when the raw decay is deep enough.
        let config = DecayConfig::default();
        let mut s = snapshot(0.05, 10_000.0);
        s.last_access_hours = 1.0;
        let result = calculate(&s, &config);
        assert!((result - 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_batch_equals_scalar() {
        let config = DecayConfig::default();
        let mut snapshots = Vec::new();
        for i in 0..200 {
            let mut s = snapshot(0.8, i as f64 * 7.3);
            s.access_count = i % 11;
            s.connection_count = i % 5;
            s.channel_mentions = i % 3;
            snapshots.push(s);
        }

        let batch = calculate_batch(&snapshots, &config);
        for (i, s) in snapshots.iter().enumerate() {
            let scalar = calculate(s, &config);
            assert!(
                (batch[i] as f64 - scalar as f64).abs() < 1e-9,
                "batch diverged from scalar at index {i}"
            );
        }
    }

    #[test]
    fn test_batch_equals_scalar_concrete_scenario() {
        // importance=0.8, 168h, zero counters, conversation, defaults
        let config = DecayConfig::default();
        let s = snapshot(0.8, 168.0);
        let batch = calculate_batch(&[s], &config);
        let scalar = calculate(&s, &config);
        assert!((batch[0] as f64 - scalar as f64).abs() < 1e-9);
    }
}
