//! Per-hop validation applied to every received message before peeling.

use crate::error::{Result, RoutingError};
use crate::message::WireMessage;
use crate::types::NodeId;
use std::fmt;
use tracing::{debug, trace};

/// Where the receiving node sits on the message's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopPosition {
    /// Any hop that still has somewhere to forward to
    Relay,
    /// The last hop of the path
    Final,
}

/// Lifecycle of one message instance at one node.
///
/// There is no retry state: every failure moves straight to `Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopState {
    Received,
    IndexValidated,
    IdentityValidated,
    Peeled,
    Forwarded,
    Delivered,
    Dropped,
}

impl HopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HopState::Forwarded | HopState::Delivered | HopState::Dropped)
    }

    /// Logs the transition into this state within the current message span.
    pub fn reached(self) -> Self {
        if self.is_terminal() {
            debug!(state = %self, "Hop state");
        } else {
            trace!(state = %self, "Hop state");
        }
        self
    }
}

impl fmt::Display for HopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HopState::Received => "received",
            HopState::IndexValidated => "index_validated",
            HopState::IdentityValidated => "identity_validated",
            HopState::Peeled => "peeled",
            HopState::Forwarded => "forwarded",
            HopState::Delivered => "delivered",
            HopState::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Runs the index and identity checks, in that order.
///
/// The message is only inspected, never mutated. Returns the state reached,
/// which is always `IdentityValidated` on success.
pub fn validate(message: &WireMessage, local: &NodeId, position: HopPosition) -> Result<HopState> {
    let index = message.current_hop_index();
    let path_len = message.full_path().len();

    let index_ok = match position {
        HopPosition::Relay => index < path_len,
        HopPosition::Final => path_len > 0 && index == path_len - 1,
    };
    if !index_ok {
        return Err(RoutingError::InvalidHopIndex { index, path_len }.into());
    }
    HopState::IndexValidated.reached();

    let expected = message.current_recipient()?;
    if expected != local {
        return Err(RoutingError::MisroutedMessage {
            expected: expected.clone(),
            local: local.clone(),
        }
        .into());
    }

    Ok(HopState::IdentityValidated.reached())
}
