use std::{collections::HashMap, net::SocketAddr, time::Instant};

use http::{HeaderMap, Method, Uri};

/// Per-request view shared across the middleware pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,
    pub started_at: Instant,
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        client_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers,
            client_addr,
            started_at: Instant::now(),
            metadata: HashMap::new(),
        }
    }
}
