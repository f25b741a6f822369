use std::sync::Arc;

use anyhow::Result;

use crate::host::{Host, Notice};
use crate::storage::Store;

const KEY_DEFAULT_URL: &str = "default_url";
const KEY_AUTH_URL: &str = "auth_url";
const KEY_AUTH_ENABLED: &str = "auth_enabled";
const KEY_EXPLICIT_AUTH_URL: &str = "explicit_auth_url";
const KEY_TOKEN: &str = "token";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("username and password are required")]
    MissingCredentials,
}

/// Endpoint selection plus the auth token bound to it.
///
/// While `auth_enabled` is false, `auth_url` always equals `default_url`.
/// `explicit_auth_url` remembers the last auth endpoint the user picked so
/// re-enabling the separate auth instance can restore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub default_url: String,
    pub auth_url: String,
    pub auth_enabled: bool,
    pub explicit_auth_url: Option<String>,
    pub token: String,
}

impl SessionState {
    pub fn new(default_url: impl Into<String>) -> Self {
        let default_url = default_url.into();
        Self {
            auth_url: default_url.clone(),
            default_url,
            auth_enabled: false,
            explicit_auth_url: None,
            token: String::new(),
        }
    }

    pub fn load(store: &Store, fallback_url: &str) -> Result<Self> {
        let default_url = store
            .get_setting(KEY_DEFAULT_URL)?
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| fallback_url.to_string());
        let auth_enabled = store
            .get_setting(KEY_AUTH_ENABLED)?
            .map(|value| value == "true")
            .unwrap_or(false);
        let explicit_auth_url = store
            .get_setting(KEY_EXPLICIT_AUTH_URL)?
            .filter(|url| !url.is_empty());
        let auth_url = if auth_enabled {
            store
                .get_setting(KEY_AUTH_URL)?
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| default_url.clone())
        } else {
            default_url.clone()
        };
        let token = store.get_setting(KEY_TOKEN)?.unwrap_or_default();

        Ok(Self {
            default_url,
            auth_url,
            auth_enabled,
            explicit_auth_url,
            token,
        })
    }

    /// Persists every field in a single transaction. An unset explicit auth
    /// url is stored as the empty string, which `load` reads back as `None`.
    pub fn flush(&self, store: &Store) -> Result<()> {
        store.set_settings(&[
            (KEY_DEFAULT_URL, self.default_url.as_str()),
            (KEY_AUTH_URL, self.auth_url.as_str()),
            (
                KEY_AUTH_ENABLED,
                if self.auth_enabled { "true" } else { "false" },
            ),
            (
                KEY_EXPLICIT_AUTH_URL,
                self.explicit_auth_url.as_deref().unwrap_or_default(),
            ),
            (KEY_TOKEN, self.token.as_str()),
        ])
    }

    pub fn is_logged_in(&self) -> bool {
        !self.token.is_empty()
    }
}

/// Owns the live [`SessionState`] and writes every token change through to
/// the store.
pub struct SessionStore {
    store: Arc<Store>,
    state: SessionState,
}

impl SessionStore {
    pub fn open(store: Arc<Store>, fallback_url: &str) -> Result<Self> {
        let state = SessionState::load(&store, fallback_url)?;
        log::debug!(
            "session: loaded default={} auth={} auth_enabled={} logged_in={}",
            state.default_url,
            state.auth_url,
            state.auth_enabled,
            state.is_logged_in()
        );
        Ok(Self { store, state })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> &str {
        &self.state.token
    }

    pub fn set_token(&mut self, token: &str) -> Result<()> {
        self.store.set_setting(KEY_TOKEN, token)?;
        self.state.token = token.to_string();
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.is_logged_in()
    }

    pub fn login(&mut self, token: &str) -> Result<()> {
        self.set_token(token)?;
        log::info!("session: logged in against {}", self.state.auth_url);
        Ok(())
    }

    /// Clears the token and tells the host the session ended.
    pub fn logout(&mut self, host: &dyn Host) -> Result<()> {
        self.set_token("")?;
        log::info!("session: logged out");
        host.notify(Notice::LoggedOut);
        Ok(())
    }

    /// Applies `change` to the endpoint part of the state and logs out. The
    /// new urls and the cleared token are persisted together, so a failed
    /// write never leaves a token bound to a different instance.
    pub(crate) fn change_endpoints(
        &mut self,
        host: &dyn Host,
        change: impl FnOnce(&mut SessionState),
    ) -> Result<()> {
        let mut next = self.state.clone();
        change(&mut next);
        next.token.clear();
        next.flush(&self.store)?;
        self.state = next;
        log::info!("session: logged out after endpoint change");
        host.notify(Notice::LoggedOut);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.state.flush(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use crate::storage::open_temp;

    #[test]
    fn fresh_store_uses_fallback() {
        let (_dir, store) = open_temp();
        let state = SessionState::load(&store, "https://fallback.example").unwrap();
        assert_eq!(state, SessionState::new("https://fallback.example"));
        assert!(!state.is_logged_in());
    }

    #[test]
    fn flush_then_load_round_trips() {
        let (_dir, store) = open_temp();
        let state = SessionState {
            default_url: "https://a.example".into(),
            auth_url: "https://auth.example".into(),
            auth_enabled: true,
            explicit_auth_url: Some("https://auth.example".into()),
            token: "tok".into(),
        };
        state.flush(&store).unwrap();
        assert_eq!(SessionState::load(&store, "https://x.example").unwrap(), state);
    }

    #[test]
    fn disabled_auth_mirrors_default_on_load() {
        let (_dir, store) = open_temp();
        store.set_setting(KEY_DEFAULT_URL, "https://a.example").unwrap();
        store.set_setting(KEY_AUTH_URL, "https://stale.example").unwrap();
        store.set_setting(KEY_AUTH_ENABLED, "false").unwrap();
        let state = SessionState::load(&store, "https://x.example").unwrap();
        assert_eq!(state.auth_url, "https://a.example");
    }

    #[test]
    fn token_changes_are_persisted() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);
        let host = RecordingHost::default();
        let mut session = SessionStore::open(store.clone(), "https://a.example").unwrap();

        session.login("secret").unwrap();
        assert!(session.is_logged_in());
        assert_eq!(store.get_setting(KEY_TOKEN).unwrap().as_deref(), Some("secret"));

        session.logout(&host).unwrap();
        assert!(!session.is_logged_in());
        assert_eq!(store.get_setting(KEY_TOKEN).unwrap().as_deref(), Some(""));
        assert_eq!(host.notices(), vec![Notice::LoggedOut]);

        session.logout(&host).unwrap();
        assert_eq!(host.notices(), vec![Notice::LoggedOut, Notice::LoggedOut]);
    }

    #[test]
    fn logout_notifies_without_a_session() {
        let (_dir, store) = open_temp();
        let host = RecordingHost::default();
        let mut session = SessionStore::open(Arc::new(store), "https://a.example").unwrap();
        session.logout(&host).unwrap();
        assert_eq!(host.notices(), vec![Notice::LoggedOut]);
    }

    #[test]
    fn endpoint_change_persists_urls_and_cleared_token_together() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);
        let host = RecordingHost::default();
        let mut session = SessionStore::open(store.clone(), "https://a.example").unwrap();
        session.login("secret").unwrap();

        session
            .change_endpoints(&host, |state| {
                state.default_url = "https://b.example".into();
                state.auth_url = "https://b.example".into();
            })
            .unwrap();

        let reloaded = SessionState::load(&store, "https://unused.example").unwrap();
        assert_eq!(reloaded.default_url, "https://b.example");
        assert_eq!(reloaded.token, "");
        assert_eq!(&reloaded, session.state());
        assert_eq!(host.notices(), vec![Notice::LoggedOut]);
    }
}
