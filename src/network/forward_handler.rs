use std::io;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::TcpStream;

use crate::data_capture::context::ConnectionContext;
use crate::data_capture::pipeline::{NextHandler, ProxyStream};
use crate::error_handling::types::NetworkError;

/// Next handler that dials the real destination and copies bytes both ways
/// until each side has closed, propagating half-closes.
#[derive(Debug, Clone)]
pub struct ForwardHandler {
    upstream_address: String,
}

impl ForwardHandler {
    pub fn new(upstream_address: impl Into<String>) -> Self {
        Self {
            upstream_address: upstream_address.into(),
        }
    }
}

#[async_trait]
impl NextHandler for ForwardHandler {
    async fn handle(&self, conn: &mut dyn ProxyStream, ctx: &ConnectionContext) -> io::Result<()> {
        let mut upstream = TcpStream::connect(&self.upstream_address)
            .await
            .map_err(|e| {
                let kind = e.kind();
                let err = NetworkError::UpstreamConnectFailed(e);
                warn!("[{}] {} ({})", ctx.session_id, err, self.upstream_address);
                io::Error::new(kind, err)
            })?;
        upstream.set_nodelay(true)?;

        let (to_upstream, to_client) = tokio::io::copy_bidirectional(conn, &mut upstream).await?;
        debug!(
            "[{}] proxy complete: {} bytes to upstream, {} bytes to client",
            ctx.session_id, to_upstream, to_client
        );
        Ok(())
    }
}
