use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LoadBalancerError;
use crate::load_balancer::LoadBalanceStrategy;
use crate::models::UpstreamTarget;

/// Round Robin load balancing strategy
pub struct RoundRobinStrategy {
    /// Current index for round robin selection
    current: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Create a new RoundRobinStrategy
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalanceStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(&self, targets: &[UpstreamTarget]) -> Result<usize, LoadBalancerError> {
        if targets.is_empty() {
            return Err(LoadBalancerError::NoBackendAvailable);
        }

        let current = self.current.fetch_add(1, Ordering::Relaxed);
        Ok(current % targets.len())
    }
}

/// Weighted Round Robin load balancing strategy
///
/// A target with weight `w` receives `w` consecutive slots of the cycle.
pub struct WeightedRoundRobinStrategy {
    /// Current slot in the weighted cycle
    current: AtomicUsize,
}

impl WeightedRoundRobinStrategy {
    /// Create a new WeightedRoundRobinStrategy
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
        }
    }
}

impl Default for WeightedRoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalanceStrategy for WeightedRoundRobinStrategy {
    fn name(&self) -> &str {
        "weighted_round_robin"
    }

    fn select(&self, targets: &[UpstreamTarget]) -> Result<usize, LoadBalancerError> {
        let total: usize = targets.iter().map(|t| t.weight as usize).sum();
        if total == 0 {
            return Err(LoadBalancerError::NoBackendAvailable);
        }

        let mut slot = self.current.fetch_add(1, Ordering::Relaxed) % total;
        for (index, target) in targets.iter().enumerate() {
            let weight = target.weight as usize;
            if slot < weight {
                return Ok(index);
            }
            slot -= weight;
        }

        Err(LoadBalancerError::NoBackendAvailable)
    }
}

/// Factory for creating load balancing strategies
pub struct LoadBalanceStrategyFactory;

impl LoadBalanceStrategyFactory {
    /// Create a new load balancing strategy based on the algorithm name
    pub fn create(
        algorithm: &str,
    ) -> Result<Box<dyn LoadBalanceStrategy + Send + Sync>, LoadBalancerError> {
        match algorithm {
            "round_robin" => Ok(Box::new(RoundRobinStrategy::new())),
            "weighted_round_robin" | "weighted" => Ok(Box::new(WeightedRoundRobinStrategy::new())),
            _ => Err(LoadBalancerError::InvalidAlgorithm(algorithm.to_string())),
        }
    }
}
