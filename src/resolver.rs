use std::sync::Arc;

use anyhow::Result;

use crate::api::{ApiClient, ClientCache};
use crate::host::Host;
use crate::session::{SessionState, SessionStore};

/// User selections that affect which endpoints are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DefaultEndpointChanged(String),
    AuthEndpointChanged(String),
    AuthEnabledToggled(bool),
}

/// Applies endpoint events to the session. Every event ends the current
/// session, drops the cached client and asks the host to recreate itself:
/// tokens are scoped to the instance that issued them.
pub struct EndpointResolver {
    host: Arc<dyn Host>,
    clients: ClientCache,
}

impl EndpointResolver {
    pub fn new(host: Arc<dyn Host>, clients: ClientCache) -> Self {
        Self { host, clients }
    }

    pub fn apply(&mut self, session: &mut SessionStore, event: Event) -> Result<()> {
        log::info!("resolver: {event:?}");
        session.change_endpoints(self.host.as_ref(), |state| recompute(state, &event))?;
        self.clients.reset();
        self.host.recreate();
        Ok(())
    }

    pub fn client(&self, session: &SessionStore) -> Result<Arc<ApiClient>> {
        self.clients.get(session.state())
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }
}

fn recompute(state: &mut SessionState, event: &Event) {
    match event {
        Event::DefaultEndpointChanged(url) => {
            state.default_url = url.clone();
            if !state.auth_enabled {
                state.auth_url = url.clone();
            }
        }
        Event::AuthEndpointChanged(url) => {
            state.auth_url = url.clone();
            state.explicit_auth_url = Some(url.clone());
        }
        Event::AuthEnabledToggled(enabled) => {
            state.auth_enabled = *enabled;
            state.auth_url = if *enabled {
                state
                    .explicit_auth_url
                    .clone()
                    .unwrap_or_else(|| state.default_url.clone())
            } else {
                state.default_url.clone()
            };
        }
    }
}
