pub mod strategies;


use crate::error::LoadBalancerError;
use crate::models::UpstreamTarget;

pub use strategies::{LoadBalanceStrategyFactory, RoundRobinStrategy, WeightedRoundRobinStrategy};

/// Load balancing strategy trait
///
/// A strategy instance belongs to one route and keeps that route's rotation
/// state. `select` returns an index into `targets` so the forwarding engine
/// can continue the rotation on retry.
pub trait LoadBalanceStrategy: Send + Sync {
    /// Get the name of this strategy
    fn name(&self) -> &str;

    /// Pick the target for the next request
    fn select(&self, targets: &[UpstreamTarget]) -> Result<usize, LoadBalancerError>;
}

/// Index of the target tried on attempt `attempt` when the first pick was `start`.
///
/// Retries walk the target list so a failed target is not hit again while
/// another one is available.
pub fn rotate(start: usize, attempt: usize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (start + attempt) % len
}
