//! Connection-scoped metadata handed to the capture pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variable set by protocol detection when the connection carries HTTP.
pub const HTTP_REQUEST_VAR: &str = "http_request";
/// Variable holding the real destination of the connection.
pub const UPSTREAM_ADDR_VAR: &str = "upstream_addr";

/// Request line details recovered by protocol detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestMeta {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
}

impl HttpRequestMeta {
    pub fn target_uri(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}{}", self.scheme, self.host, path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnVar {
    HttpRequest(HttpRequestMeta),
    Addr(SocketAddr),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub session_id: Uuid,
    pub client_addr: Option<SocketAddr>,
    pub accepted_at: DateTime<Utc>,
    vars: HashMap<String, ConnVar>,
}

impl ConnectionContext {
    pub fn new(client_addr: Option<SocketAddr>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            client_addr,
            accepted_at: Utc::now(),
            vars: HashMap::new(),
        }
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: ConnVar) {
        self.vars.insert(name.into(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&ConnVar> {
        self.vars.get(name)
    }

    pub fn http_request(&self) -> Option<&HttpRequestMeta> {
        match self.get_var(HTTP_REQUEST_VAR) {
            Some(ConnVar::HttpRequest(meta)) => Some(meta),
            _ => None,
        }
    }

    /// Logical destination for the archive: the HTTP target when known,
    /// otherwise `tcp://<upstream>`, otherwise empty.
    pub fn target_uri(&self) -> String {
        if let Some(meta) = self.http_request() {
            return meta.target_uri();
        }
        match self.get_var(UPSTREAM_ADDR_VAR) {
            Some(ConnVar::Addr(addr)) => format!("tcp://{}", addr),
            Some(ConnVar::Text(addr)) if !addr.is_empty() => format!("tcp://{}", addr),
            _ => String::new(),
        }
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new(None)
    }
}
