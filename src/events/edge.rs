//! Edge event types

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Direction of a level transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    /// Edge that produced the given new level
    pub fn from_level(high: bool) -> Self {
        if high {
            Edge::Rising
        } else {
            Edge::Falling
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => write!(f, "rising"),
            Edge::Falling => write!(f, "falling"),
        }
    }
}

/// Set of edges of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EdgeMask(u8);

impl EdgeMask {
    pub const NONE: EdgeMask = EdgeMask(0);
    pub const RISING: EdgeMask = EdgeMask(0b01);
    pub const FALLING: EdgeMask = EdgeMask(0b10);
    pub const BOTH: EdgeMask = EdgeMask(0b11);

    pub fn contains(self, edge: Edge) -> bool {
        self.0 & EdgeMask::from(edge).0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Edge> for EdgeMask {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Rising => EdgeMask::RISING,
            Edge::Falling => EdgeMask::FALLING,
        }
    }
}

impl BitOr for EdgeMask {
    type Output = EdgeMask;

    fn bitor(self, rhs: EdgeMask) -> EdgeMask {
        EdgeMask(self.0 | rhs.0)
    }
}

impl fmt::Display for EdgeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EdgeMask::NONE => write!(f, "none"),
            EdgeMask::RISING => write!(f, "rising"),
            EdgeMask::FALLING => write!(f, "falling"),
            _ => write!(f, "both"),
        }
    }
}

/// A delivered edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeEvent {
    pub pin: u8,
    pub edge: Edge,
    /// Arrived within the debounce window of the previous clean edge
    pub bounced: bool,
    /// Monotonic milliseconds, same clock as `timer::now`
    pub timestamp_ms: f64,
}

/// Outcome of a blocking edge wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub timed_out: bool,
    /// Edges of interest seen since the wait began; empty on timeout
    pub edges: EdgeMask,
}

impl WaitResult {
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            edges: EdgeMask::NONE,
        }
    }

    pub fn edge(edge: Edge) -> Self {
        Self {
            timed_out: false,
            edges: edge.into(),
        }
    }
}

/// Shared flag that ends a pending wait early
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle for removing a registered edge callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub(crate) u64);

/// Edge callback, invoked on the pin's watcher thread
pub type EdgeCallback = Arc<dyn Fn(&EdgeEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_mask() {
        assert!(EdgeMask::BOTH.contains(Edge::Rising));
        assert!(EdgeMask::BOTH.contains(Edge::Falling));
        assert!(!EdgeMask::RISING.contains(Edge::Falling));
        assert_eq!(EdgeMask::RISING | EdgeMask::FALLING, EdgeMask::BOTH);
        assert!(EdgeMask::NONE.is_empty());
        assert_eq!(EdgeMask::from(Edge::Falling).to_string(), "falling");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_result() {
        assert!(WaitResult::timeout().timed_out);
        let result = WaitResult::edge(Edge::Rising);
        assert!(!result.timed_out);
        assert!(result.edges.contains(Edge::Rising));
    }
}
