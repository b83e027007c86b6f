//! Detour dialer: delegates to a named outbound (Go parity: dialer.DetourDialer).

use crate::dialer::{DialContext, DialError, Dialer, IoStream, PacketConn};
use crate::ports::OutboundRegistry;
use async_trait::async_trait;
use sb_types::Destination;
use std::sync::Arc;
use tracing::trace;

/// Dials through a previously configured outbound, looked up by tag once at
/// construction.
pub struct DetourDialer {
    tag: String,
    outbound: Arc<dyn Dialer>,
}

impl DetourDialer {
    pub fn new(registry: &dyn OutboundRegistry, tag: &str) -> Result<Self, DialError> {
        let outbound = registry
            .outbound(tag)
            .ok_or_else(|| DialError::config(format!("outbound detour not found: {tag}")))?;
        Ok(Self {
            tag: tag.to_string(),
            outbound,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl std::fmt::Debug for DetourDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetourDialer").field("tag", &self.tag).finish()
    }
}

#[async_trait]
impl Dialer for DetourDialer {
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError> {
        trace!(detour = %self.tag, %destination, "dial via detour");
        self.outbound.dial_stream(ctx, destination).await
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError> {
        trace!(detour = %self.tag, %destination, "listen via detour");
        self.outbound.listen_packet(ctx, destination).await
    }
}
