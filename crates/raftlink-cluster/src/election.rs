//! Election state carried by a node.
//!
//! This is an extension point for a future election state machine. The
//! transport layer stores it but never reads or changes it.

/// Role of a node in a leader election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

/// Term and vote bookkeeping for a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionState {
    /// Current role.
    pub role: NodeRole,
    /// Latest term this node has seen.
    pub current_term: u64,
    /// Candidate voted for in the current term.
    pub voted_for: Option<u64>,
}

impl ElectionState {
    /// State of a node that has just started.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ElectionState::new();
        assert_eq!(state.role, NodeRole::Follower);
        assert_eq!(state.current_term, 0);
        assert!(state.voted_for.is_none());
    }
}
