//! # Proxy Listener Module
//!
//! Accepts TCP connections and runs each one through the [`CapturePipeline`]
//! with a [`NextHandler`] (normally a [`ForwardHandler`](super::forward_handler::ForwardHandler)).
//!
//! ```text
//! ┌─────────────┐    ┌───────────────┐    ┌─────────────────┐    ┌──────────┐
//! │ Client      │───▶│ ProxyListener │───▶│ CapturePipeline │───▶│ Upstream │
//! └─────────────┘    │ - accept      │    │ - duplex tee    │    └──────────┘
//!                    │ - HTTP sniff  │    │ - archival      │
//!                    └───────────────┘    └─────────────────┘
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::http_sniffer::sniff_http_request;
use crate::data_capture::context::{ConnVar, ConnectionContext, HTTP_REQUEST_VAR, UPSTREAM_ADDR_VAR};
use crate::data_capture::pipeline::{CapturePipeline, NextHandler};
use crate::error_handling::types::NetworkError;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ProxyListener {
    listener: TcpListener,
    upstream_address: String,
    sniff_timeout: Duration,
}

impl ProxyListener {
    pub async fn bind(
        addr: SocketAddr,
        upstream_address: impl Into<String>,
        sniff_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("[!] Unable to bind {}: {}", addr, e);
            NetworkError::BindError(e)
        })?;
        Ok(Self {
            listener,
            upstream_address: upstream_address.into(),
            sniff_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::BindError)
    }

    /// Accepts connections until `shutdown` resolves, then gives in-flight
    /// connections `grace` to finish before aborting them.
    pub async fn serve<H, F>(
        self,
        pipeline: Arc<CapturePipeline>,
        handler: Arc<H>,
        shutdown: F,
        grace: Duration,
    ) -> Result<(), NetworkError>
    where
        H: NextHandler + 'static,
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        info!("Capturing proxy listening on {} -> {}", local, self.upstream_address);

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("{}", NetworkError::AcceptFailed(e));
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let pipeline = Arc::clone(&pipeline);
                    let handler = Arc::clone(&handler);
                    let upstream = self.upstream_address.clone();
                    let sniff_timeout = self.sniff_timeout;
                    connections.spawn(async move {
                        serve_connection(stream, peer, upstream, sniff_timeout, &pipeline, handler.as_ref()).await;
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task ended abnormally: {}", e);
                    }
                }
            }
        }

        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Aborting {} connection(s) still open after {:?}",
                connections.len(),
                grace
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
        Ok(())
    }
}

async fn serve_connection<H>(
    stream: TcpStream,
    peer: SocketAddr,
    upstream: String,
    sniff_timeout: Duration,
    pipeline: &CapturePipeline,
    handler: &H,
) where
    H: NextHandler + ?Sized,
{
    let mut ctx = ConnectionContext::new(Some(peer));
    debug!("[{}] accepted connection from {}", ctx.session_id, peer);
    ctx.set_var(UPSTREAM_ADDR_VAR, ConnVar::Text(upstream));
    if let Some(meta) = sniff_http_request(&stream, sniff_timeout).await {
        debug!("[{}] detected HTTP request for {}", ctx.session_id, meta.target_uri());
        ctx.set_var(HTTP_REQUEST_VAR, ConnVar::HttpRequest(meta));
    }

    match pipeline.handle(stream, &ctx, handler).await {
        Ok(()) => debug!("[{}] connection from {} closed", ctx.session_id, peer),
        Err(e) => info!("[{}] connection from {} ended with error: {}", ctx.session_id, peer, e),
    }
}
