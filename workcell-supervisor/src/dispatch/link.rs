//! Outbound device link

use async_trait::async_trait;

/// Somewhere to send protocol frames
///
/// Implemented by the connection manager; sending never fails loudly, it
/// reports whether the frame went out.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn send(&self, frame: &str) -> bool;
}
