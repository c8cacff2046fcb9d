//! Actor tags recorded in transaction history entries.

/// Generic system actor for request-path transitions.
pub const SYSTEM: &str = "SYSTEM";
/// Monitor sweep transitions.
pub const SYSTEM_MONITOR: &str = "SYSTEM_MONITOR";
/// Automatic retry attempts.
pub const SYSTEM_RETRY: &str = "SYSTEM_RETRY";
/// Recovery of transactions found in a problematic state.
pub const SYSTEM_RECOVERY: &str = "SYSTEM_RECOVERY";
/// Automatic reconciliation decisions.
pub const SYSTEM_RECONCILIATION: &str = "SYSTEM_RECONCILIATION";
