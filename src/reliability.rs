//! Reliability mode (§3, §4.4, §4.9).

/// Per-connection policy governing write-failure handling and reconnect
/// replay. Immutable for the lifetime of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityMode {
    /// No reconnect housekeeping: a failed write completes the command
    /// exceptionally and the command is never added to the dispatch queue.
    AtMostOnce,
    /// Commands are added to the dispatch queue before the write is
    /// issued; write/flush failures surface only via the channel-level
    /// exception path, and commands still in flight at reconnect time are
    /// replayed.
    AtLeastOnce,
}

impl ReliabilityMode {
    /// Chosen at construction from a single option, per §3: auto-reconnect
    /// enabled implies AT_LEAST_ONCE, disabled implies AT_MOST_ONCE.
    pub fn from_auto_reconnect(auto_reconnect: bool) -> Self {
        if auto_reconnect {
            ReliabilityMode::AtLeastOnce
        } else {
            ReliabilityMode::AtMostOnce
        }
    }

    pub fn is_at_least_once(self) -> bool {
        matches!(self, ReliabilityMode::AtLeastOnce)
    }
}
