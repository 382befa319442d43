// all ids are plain indices into the arenas owned by the graph or the run context
pub type NodeId = usize;
pub type ChannelId = usize;
pub type PaymentId = usize;
pub type RouteId = usize;
pub type HtlcId = usize;
pub type BuilderId = usize;

/// Payment amounts and channel capacities, in the smallest currency unit.
pub type Amount = u64;

/// Simulated time. Events at equal times are delivered in scheduling order.
pub type SimTime = f64;

/// HTLC timelock, in blocks.
pub type Timelock = u32;

// ============================================================================
// Protocol constants
// ============================================================================

/// Delay applied to every message sent between two nodes.
pub const PROPAGATION_DELAY: SimTime = 0.01;

/// Timelock required by the final hop of a route.
pub const MIN_FINAL_CLTV_EXPIRATION: Timelock = 9;

/// Timelocks at or above this value would be read as absolute timestamps.
pub const MAX_CLTV_EXPIRATION: Timelock = 500_000_000;

/// Default minimum timelock delta a channel demands per hop.
pub const DEFAULT_MIN_TIMELOCK_DELTA: Timelock = 12;

/// Two channel snapshots are considered the same version below this difference.
pub const TIMESTAMP_EPSILON: SimTime = 0.005;

/// Interval between two recalculations of the fee policy.
pub const FEE_UPDATE_INTERVAL: SimTime = 10.0;

/// Time a spanning forest is given to converge before its consumer is told.
pub const TREE_SETTLING_DELAY: SimTime = 10.0;

// ============================================================================
// Node roles and payment results
// ============================================================================

/// Role of a node in the network.
///
/// Consumers only originate or terminate payments and never forward them.
/// Bridges forward payments and are eligible as landmarks or tree roots.
/// Gateways connect consumers to the bridge core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Bridge,
    Gateway,
    Consumer,
}

/// Terminal result of a payment. `Undetermined` until the payment finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaymentResult {
    Undetermined = 0,
    Success = 1,
    NoPath = 2,
    PathTooLong = 3,
    HtlcFailure = 4,
}

impl PaymentResult {
    pub const ALL: [PaymentResult; 5] = [
        PaymentResult::Undetermined,
        PaymentResult::Success,
        PaymentResult::NoPath,
        PaymentResult::PathTooLong,
        PaymentResult::HtlcFailure,
    ];

    pub fn code(self) -> usize {
        self as usize
    }

    pub fn is_final(self) -> bool {
        self != PaymentResult::Undetermined
    }
}

impl std::fmt::Display for PaymentResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PaymentResult::Undetermined => "undetermined",
            PaymentResult::Success => "success",
            PaymentResult::NoPath => "no path",
            PaymentResult::PathTooLong => "path too long",
            PaymentResult::HtlcFailure => "htlc failure",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        let codes: Vec<usize> = PaymentResult::ALL.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
        assert!(!PaymentResult::Undetermined.is_final());
        assert!(PaymentResult::HtlcFailure.is_final());
    }
}
