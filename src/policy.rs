use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

/// How a caller was identified. The same value under different kinds scopes
/// independent limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Ip,
    Token,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::Token => "TOKEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub kind: KeyKind,
    pub value: String,
}

impl IdentityKey {
    pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// An empty value means the caller could not be identified at all.
    /// Rate limiting is skipped for these rather than funnelling every
    /// unidentifiable caller into one shared bucket.
    pub fn is_anonymous(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Immutable per-request limits: how many accesses fit in the 1-second
/// window, and how long a violator stays blocked.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub max_requests_per_second: u32,
    pub block_time: Duration,
}

/// Maps a request to an identity and the policy that governs it. Pure and
/// infallible; a malformed peer address degrades to an anonymous key.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    pub by_ip: RatePolicy,
    pub by_token: RatePolicy,
    pub token_overrides: HashMap<String, RatePolicy>,
}

impl PolicyTable {
    /// A present credential always wins over the peer address, even when the
    /// token is unknown — it still gets the token default, never the IP
    /// policy. Overrides match the exact token string only.
    pub fn resolve(&self, token: Option<&str>, remote_addr: &str) -> (IdentityKey, RatePolicy) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let policy = self
                .token_overrides
                .get(token)
                .copied()
                .unwrap_or(self.by_token);
            return (IdentityKey::new(KeyKind::Token, token), policy);
        }

        (
            IdentityKey::new(KeyKind::Ip, strip_port(remote_addr)),
            self.by_ip,
        )
    }
}

fn strip_port(addr: &str) -> String {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return sock.ip().to_string();
    }

    if let Ok(ip) = addr.parse::<IpAddr>() {
        return ip.to_string();
    }

    String::new()
}
