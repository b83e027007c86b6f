//! Outbound registry port (Go parity: adapter.OutboundManager).

use crate::dialer::Dialer;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-mostly mapping from detour tag to a dial-capable outbound.
///
/// Populated before dialing starts; lookups must be safe from many concurrent
/// dial compositions.
pub trait OutboundRegistry: Send + Sync {
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Dialer>>;
}

impl OutboundRegistry for HashMap<String, Arc<dyn Dialer>> {
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Dialer>> {
        self.get(tag).cloned()
    }
}
