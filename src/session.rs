//! Session affinity: server assigned session cookies remembered per target URL.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::utils::session_cookie;

/// Session cookie store shared by every transaction of an [`RmiClient`](crate::dispatcher::RmiClient).
///
/// Entries live as long as the store; a newer session cookie for the same key replaces the old one.
#[derive(Debug, Default)]
pub struct SessionStore {
    cookies: Mutex<HashMap<Url, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session cookie to send with requests for `key`.
    pub async fn cookie(&self, key: &Url) -> Option<String> {
        self.cookies.lock().await.get(key).cloned()
    }

    /// Scans `Set-Cookie` values and remembers the first session cookie found.
    /// Returns true if the store was updated.
    pub async fn remember<'a, I>(&self, key: &Url, set_cookies: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(cookie) = set_cookies.into_iter().find_map(session_cookie) else {
            return false;
        };
        debug!(url = %key, "Session cookie updated");
        self.cookies
            .lock()
            .await
            .insert(key.clone(), cookie.to_string());
        true
    }

    pub async fn forget(&self, key: &Url) -> Option<String> {
        self.cookies.lock().await.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remembers_session_cookie_per_key() {
        let store = SessionStore::new();
        let app = Url::parse("http://localhost/app/").unwrap();
        let other = Url::parse("http://localhost/other/").unwrap();

        assert!(!store.remember(&app, ["theme=dark"]).await);
        assert!(store.cookie(&app).await.is_none());

        assert!(store.remember(&app, ["theme=dark", "JSESSIONID=42; Path=/app"]).await);
        assert_eq!(store.cookie(&app).await.as_deref(), Some("JSESSIONID=42"));
        assert!(store.cookie(&other).await.is_none());

        store.remember(&app, ["JSESSIONID=43"]).await;
        assert_eq!(store.forget(&app).await.as_deref(), Some("JSESSIONID=43"));
    }
}
