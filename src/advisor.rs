//! Execution-model recommendation from recorded performance data.

use crate::config::{ExecutionModel, ResolverConfig};
use crate::metrics::PerformanceStats;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Above this network-time percentage, fetching dominates the run.
pub const CONCURRENT_NETWORK_PERCENTAGE: f64 = 40.0;
/// Below this network-time percentage, the run is CPU-bound.
pub const SEQUENTIAL_NETWORK_PERCENTAGE: f64 = 20.0;
/// Concurrency only pays off while the cache hit rate stays below this.
pub const CONCURRENT_MAX_CACHE_HIT_RATE: f64 = 50.0;
/// Above this cache hit rate most fetches never reach the network.
pub const SEQUENTIAL_CACHE_HIT_RATE: f64 = 80.0;

/// Decision thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorThresholds {
    pub concurrent_network_percentage: f64,
    pub sequential_network_percentage: f64,
    pub concurrent_max_cache_hit_rate: f64,
    pub sequential_cache_hit_rate: f64,
}

impl Default for AdvisorThresholds {
    fn default() -> Self {
        Self {
            concurrent_network_percentage: CONCURRENT_NETWORK_PERCENTAGE,
            sequential_network_percentage: SEQUENTIAL_NETWORK_PERCENTAGE,
            concurrent_max_cache_hit_rate: CONCURRENT_MAX_CACHE_HIT_RATE,
            sequential_cache_hit_rate: SEQUENTIAL_CACHE_HIT_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    BoundedConcurrent,
    Sequential,
    /// No strong signal either way
    Evaluate,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Recommendation::BoundedConcurrent => "bounded_concurrent",
            Recommendation::Sequential => "sequential",
            Recommendation::Evaluate => "evaluate",
        };
        f.write_str(name)
    }
}

/// Outcome of analyzing one stats snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyReport {
    pub network_time_percentage: f64,
    pub cache_hit_rate: f64,
    pub recommendation: Recommendation,
    /// Human-readable explanation of the decision
    pub reasons: Vec<String>,
}

impl ConcurrencyReport {
    /// `config` with the recommended execution model applied.
    ///
    /// An `Evaluate` recommendation leaves the configuration unchanged.
    pub fn apply_to(&self, config: &ResolverConfig) -> ResolverConfig {
        let mut config = config.clone();
        match self.recommendation {
            Recommendation::BoundedConcurrent => {
                config.execution_model = ExecutionModel::BoundedConcurrent
            }
            Recommendation::Sequential => config.execution_model = ExecutionModel::Sequential,
            Recommendation::Evaluate => {}
        }
        config
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Pure analysis over a [`PerformanceStats`] snapshot.
///
/// # Examples
///
/// ```rust
/// use track_resolver::{ConcurrencyAdvisor, PerformanceStats, Recommendation};
///
/// let mut stats = PerformanceStats::new(chrono::Utc::now());
/// stats.total_execution_time = 100.0;
/// stats.total_network_time = 80.0;
/// stats.cache_hits = 30;
/// stats.cache_misses = 70;
///
/// let report = ConcurrencyAdvisor::new().analyze(&stats);
/// assert_eq!(report.recommendation, Recommendation::BoundedConcurrent);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrencyAdvisor {
    thresholds: AdvisorThresholds,
}

impl ConcurrencyAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: AdvisorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AdvisorThresholds {
        &self.thresholds
    }

    pub fn analyze(&self, stats: &PerformanceStats) -> ConcurrencyReport {
        let t = &self.thresholds;
        let network = stats.network_time_percentage();
        let hit_rate = stats.cache_hit_rate();
        let mut reasons = Vec::new();

        let recommendation = if network > t.concurrent_network_percentage
            && hit_rate < t.concurrent_max_cache_hit_rate
        {
            reasons.push(format!(
                "network time is {network:.1}% of execution (> {:.0}%)",
                t.concurrent_network_percentage
            ));
            reasons.push(format!(
                "cache hit rate is {hit_rate:.1}% (< {:.0}%)",
                t.concurrent_max_cache_hit_rate
            ));
            Recommendation::BoundedConcurrent
        } else if network < t.sequential_network_percentage
            || hit_rate > t.sequential_cache_hit_rate
        {
            if network < t.sequential_network_percentage {
                reasons.push(format!(
                    "network time is only {network:.1}% of execution (< {:.0}%)",
                    t.sequential_network_percentage
                ));
            }
            if hit_rate > t.sequential_cache_hit_rate {
                reasons.push(format!(
                    "cache hit rate is {hit_rate:.1}% (> {:.0}%)",
                    t.sequential_cache_hit_rate
                ));
            }
            Recommendation::Sequential
        } else {
            reasons.push(format!(
                "network time {network:.1}% and cache hit rate {hit_rate:.1}% give no clear signal"
            ));
            if stats.total_tracks > 0 {
                reasons.push(format!(
                    "{} tracks processed, {:.2}s average per track",
                    stats.total_tracks,
                    stats.average_time_per_track()
                ));
            }
            Recommendation::Evaluate
        };

        log::debug!("Concurrency recommendation: {recommendation} ({})", reasons.join("; "));
        ConcurrencyReport {
            network_time_percentage: network,
            cache_hit_rate: hit_rate,
            recommendation,
            reasons,
        }
    }

    /// Analyze a stats snapshot exported with [`PerformanceStats::save`].
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<ConcurrencyReport> {
        let stats = PerformanceStats::load(path)?;
        Ok(self.analyze(&stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stats(network: f64, execution: f64, hits: u64, misses: u64) -> PerformanceStats {
        let mut stats = PerformanceStats::new(Utc::now());
        stats.total_network_time = network;
        stats.total_execution_time = execution;
        stats.cache_hits = hits;
        stats.cache_misses = misses;
        stats
    }

    #[test]
    fn test_network_bound_recommends_concurrent() {
        let report = ConcurrencyAdvisor::new().analyze(&stats(80.0, 100.0, 30, 70));
        assert!((report.network_time_percentage - 80.0).abs() < 1e-9);
        assert!((report.cache_hit_rate - 30.0).abs() < 1e-9);
        assert_eq!(report.recommendation, Recommendation::BoundedConcurrent);
        assert_eq!(report.reasons.len(), 2);
    }

    #[test]
    fn test_low_network_recommends_sequential() {
        let report = ConcurrencyAdvisor::new().analyze(&stats(10.0, 100.0, 10, 90));
        assert_eq!(report.recommendation, Recommendation::Sequential);
    }

    #[test]
    fn test_high_hit_rate_recommends_sequential() {
        let report = ConcurrencyAdvisor::new().analyze(&stats(30.0, 100.0, 90, 10));
        assert_eq!(report.recommendation, Recommendation::Sequential);
    }

    #[test]
    fn test_high_network_with_warm_cache_is_sequential() {
        // Concurrent rule fails on hit rate, sequential rule matches on it.
        let report = ConcurrencyAdvisor::new().analyze(&stats(90.0, 100.0, 85, 15));
        assert_eq!(report.recommendation, Recommendation::Sequential);
    }

    #[test]
    fn test_middle_ground_is_evaluate() {
        let report = ConcurrencyAdvisor::new().analyze(&stats(30.0, 100.0, 60, 40));
        assert_eq!(report.recommendation, Recommendation::Evaluate);

        let report = ConcurrencyAdvisor::new().analyze(&stats(60.0, 100.0, 60, 40));
        assert_eq!(report.recommendation, Recommendation::Evaluate);
    }

    #[test]
    fn test_boundaries_are_strict() {
        let report = ConcurrencyAdvisor::new().analyze(&stats(40.0, 100.0, 0, 10));
        assert_eq!(report.recommendation, Recommendation::Evaluate);

        let report = ConcurrencyAdvisor::new().analyze(&stats(20.0, 100.0, 80, 20));
        assert_eq!(report.recommendation, Recommendation::Evaluate);
    }

    #[test]
    fn test_empty_stats_recommend_sequential() {
        let report = ConcurrencyAdvisor::new().analyze(&PerformanceStats::new(Utc::now()));
        assert_eq!(report.network_time_percentage, 0.0);
        assert_eq!(report.recommendation, Recommendation::Sequential);
    }

    #[test]
    fn test_overridden_thresholds() {
        let advisor = ConcurrencyAdvisor::with_thresholds(AdvisorThresholds {
            concurrent_network_percentage: 25.0,
            ..AdvisorThresholds::default()
        });
        let report = advisor.analyze(&stats(30.0, 100.0, 10, 90));
        assert_eq!(report.recommendation, Recommendation::BoundedConcurrent);
    }

    #[test]
    fn test_apply_to_config() {
        let config = ResolverConfig::default();
        let report = ConcurrencyAdvisor::new().analyze(&stats(80.0, 100.0, 30, 70));
        assert_eq!(
            report.apply_to(&config).execution_model,
            ExecutionModel::BoundedConcurrent
        );

        let evaluate = ConcurrencyAdvisor::new().analyze(&stats(30.0, 100.0, 60, 40));
        assert_eq!(evaluate.apply_to(&config), config);
    }
}
