//! Error type shared by configuration, preparation and topology building.
//!
//! Failures inside a running simulation (no route, HTLC timeouts) are payment
//! results, not errors. Only setup problems surface here.

use crate::pcn_interface::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("traffic needs at least two consumer nodes")]
    NoConsumers,

    #[error("routing needs at least one bridge node")]
    NoBridges,

    #[error("not enough bridges: need {needed}, have {available}")]
    NotEnoughBridges { needed: usize, available: usize },

    #[error("too many edges requested: {requested} (max {max})")]
    TooManyEdges { requested: usize, max: usize },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("channel between {0} and {1} already exists")]
    DuplicateChannel(NodeId, NodeId),

    #[error("node {0} cannot open a channel to itself")]
    SelfChannel(NodeId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = SimError::NotEnoughBridges { needed: 8, available: 3 };
        assert_eq!(e.to_string(), "not enough bridges: need 8, have 3");
        assert_eq!(SimError::UnknownNode(7).to_string(), "unknown node 7");
    }
}
