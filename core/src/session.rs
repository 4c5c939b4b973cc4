//! Per-endpoint session state for stateful endpoints.
//!
//! A session is a cookie jar: `Set-Cookie` headers of every response are
//! absorbed, and the jar is replayed as one `Cookie` header on the next
//! request. Concurrent calls to one endpoint share the jar; the mutex only
//! serializes individual reads and writes, not whole calls.

use std::any::TypeId;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::KeyedCache;
use crate::http::Headers;

#[derive(Debug, Default)]
pub struct SessionState {
    cookies: Mutex<Vec<(String, String)>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take in every `Set-Cookie` of a response. An empty value or
    /// `Max-Age=0` removes the cookie.
    pub fn absorb(&self, headers: &Headers) {
        let mut cookies = self.cookies.lock();
        for line in headers.get_all("set-cookie") {
            let Some((name, value, expired)) = parse_set_cookie(line) else {
                continue;
            };
            cookies.retain(|(n, _)| n != name);
            if !expired && !value.is_empty() {
                cookies.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// The `Cookie` header value, if the jar is not empty.
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.lock();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn clear(&self) {
        self.cookies.lock().clear();
    }
}

fn parse_set_cookie(line: &str) -> Option<(&str, &str, bool)> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let expired = parts.any(|attr| {
        attr.split_once('=')
            .map(|(k, v)| k.trim().eq_ignore_ascii_case("max-age") && v.trim() == "0")
            .unwrap_or(false)
    });
    Some((name, value.trim().trim_matches('"'), expired))
}

/// One session per endpoint identity, created on first use.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: KeyedCache<TypeId, Arc<SessionState>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: TypeId) -> Arc<SessionState> {
        self.sessions.get_or_init(key, || Arc::new(SessionState::new()))
    }

    pub fn get(&self, key: &TypeId) -> Option<Arc<SessionState>> {
        self.sessions.get(key)
    }
}
