use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{ApiClient, ClientCache, ClientConfig};
use crate::config::Config;
use crate::directory::{self, HttpDirectory, InstanceDirectory};
use crate::host::{Host, Notice};
use crate::instances::InstanceRegistry;
use crate::resolver::{EndpointResolver, Event};
use crate::session::{SessionError, SessionState, SessionStore};
use crate::storage::Store;
use crate::transfer::{FileAccess, SubscriptionTransfer};

/// One settings session: owns the endpoint/session state and wires the
/// registry, resolver and account commands to the same store and host.
pub struct Manager {
    store: Arc<Store>,
    registry: Arc<InstanceRegistry>,
    session: SessionStore,
    resolver: EndpointResolver,
}

impl Manager {
    pub fn new(
        cfg: &Config,
        store: Arc<Store>,
        directory: Arc<dyn InstanceDirectory>,
        host: Arc<dyn Host>,
    ) -> Result<Self> {
        let session = SessionStore::open(store.clone(), &cfg.api.default_instance)
            .context("load session state")?;
        let clients = ClientCache::new(ClientConfig {
            user_agent: cfg.api.user_agent.clone(),
            timeout: Some(cfg.api.timeout),
            http_client: None,
        });
        Ok(Self {
            registry: Arc::new(InstanceRegistry::new(store.clone(), directory)),
            resolver: EndpointResolver::new(host, clients),
            session,
            store,
        })
    }

    /// Builds a manager talking to the configured public instance directory.
    pub fn open(cfg: &Config, store: Arc<Store>, host: Arc<dyn Host>) -> Result<Self> {
        let directory = HttpDirectory::new(directory::ClientConfig {
            url: cfg.directory.url.clone(),
            user_agent: cfg.api.user_agent.clone(),
            timeout: Some(cfg.directory.timeout),
            http_client: None,
        })?;
        Self::new(cfg, store, Arc::new(directory), host)
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn apply(&mut self, event: Event) -> Result<()> {
        self.resolver.apply(&mut self.session, event)
    }

    pub fn select_default_instance(&mut self, url: &str) -> Result<()> {
        self.apply(Event::DefaultEndpointChanged(url.trim().to_string()))
    }

    pub fn select_auth_instance(&mut self, url: &str) -> Result<()> {
        self.apply(Event::AuthEndpointChanged(url.trim().to_string()))
    }

    pub fn set_auth_instance_enabled(&mut self, enabled: bool) -> Result<()> {
        self.apply(Event::AuthEnabledToggled(enabled))
    }

    pub fn client(&self) -> Result<Arc<ApiClient>> {
        self.resolver.client(&self.session)
    }

    pub fn request_login(&mut self, username: &str, password: &str) -> Result<()> {
        check_credentials(username, password)?;
        let token = self.client()?.login(username.trim(), password)?;
        self.session.login(&token)?;
        self.host().notify(Notice::LoggedIn);
        Ok(())
    }

    pub fn request_register(&mut self, username: &str, password: &str) -> Result<()> {
        check_credentials(username, password)?;
        let token = self.client()?.register(username.trim(), password)?;
        self.session.login(&token)?;
        self.host().notify(Notice::LoggedIn);
        Ok(())
    }

    pub fn request_logout(&mut self) -> Result<()> {
        let host = self.resolver.host().clone();
        self.session.logout(host.as_ref())
    }

    pub fn request_delete_account(&mut self, password: &str) -> Result<()> {
        if !self.session.is_logged_in() {
            return Err(SessionError::NotLoggedIn.into());
        }
        if password.is_empty() {
            return Err(SessionError::MissingCredentials.into());
        }
        self.client()?
            .delete_account(self.session.token(), password)?;
        let host = self.resolver.host().clone();
        self.session.logout(host.as_ref())?;
        host.notify(Notice::AccountDeleted);
        Ok(())
    }

    /// Imports from `source`; `None` (picker cancelled) does nothing.
    pub fn import_subscriptions(
        &self,
        files: &dyn FileAccess,
        source: Option<&str>,
    ) -> Result<Option<usize>> {
        if source.is_none() {
            return Ok(None);
        }
        let result = self.client().and_then(|client| {
            SubscriptionTransfer::new(client.as_ref(), files, self.session.token())
                .import_subscriptions(source)
        });
        self.report(result, Notice::SubscriptionsImported)
    }

    /// Exports to `destination`; `None` (picker cancelled) does nothing.
    pub fn export_subscriptions(
        &self,
        files: &dyn FileAccess,
        destination: Option<&str>,
    ) -> Result<Option<usize>> {
        if destination.is_none() {
            return Ok(None);
        }
        let result = self.client().and_then(|client| {
            SubscriptionTransfer::new(client.as_ref(), files, self.session.token())
                .export_subscriptions(destination)
        });
        self.report(result, Notice::SubscriptionsExported)
    }

    /// Flushes the session state and releases the store.
    pub fn close(self) -> Result<()> {
        self.session.flush()?;
        let Self {
            store,
            registry,
            session,
            resolver,
        } = self;
        drop((registry, session, resolver));
        match Arc::try_unwrap(store) {
            Ok(store) => store.close(),
            Err(_) => {
                log::debug!("manager: store still shared, leaving it open");
                Ok(())
            }
        }
    }

    fn host(&self) -> &Arc<dyn Host> {
        self.resolver.host()
    }

    fn report(
        &self,
        result: Result<Option<usize>>,
        notice: fn(usize) -> Notice,
    ) -> Result<Option<usize>> {
        match result {
            Ok(Some(count)) => {
                self.host().notify(notice(count));
                Ok(Some(count))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.host().notify(Notice::Error(format!("{err:#}")));
                Err(err)
            }
        }
    }
}

fn check_credentials(username: &str, password: &str) -> Result<(), SessionError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(SessionError::MissingCredentials);
    }
    Ok(())
}
