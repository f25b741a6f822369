use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use url::Url;

use crate::directory::{InstanceDirectory, PublicInstance};
use crate::storage::{CustomInstance, Store};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("instance name is required")]
    EmptyName,
    #[error("invalid instance url {0:?}")]
    InvalidUrl(String),
    #[error("instance {0} is already registered")]
    Duplicate(String),
}

/// An entry of the endpoint selection list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceChoice {
    pub display_name: String,
    pub api_url: String,
}

impl From<CustomInstance> for InstanceChoice {
    fn from(instance: CustomInstance) -> Self {
        Self {
            display_name: instance.name,
            api_url: instance.api_url,
        }
    }
}

impl InstanceChoice {
    fn from_public(instance: PublicInstance) -> Option<Self> {
        match (instance.name, instance.api_url) {
            (Some(name), Some(api_url)) => Some(Self {
                display_name: name,
                api_url,
            }),
            _ => None,
        }
    }
}

/// Liveness token held by whoever consumes background results (a settings
/// view). Dropping it tears the owner down.
#[derive(Debug, Default)]
pub struct Owner {
    alive: Arc<()>,
}

impl Owner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self) -> OwnerWatch {
        OwnerWatch {
            alive: Arc::downgrade(&self.alive),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OwnerWatch {
    alive: Weak<()>,
}

impl OwnerWatch {
    pub fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// Result of [`InstanceRegistry::spawn_choices`]. Yields nothing once the
/// owner is gone, even if the fetch already finished.
pub struct PendingChoices {
    rx: Receiver<Result<Vec<InstanceChoice>>>,
    owner: OwnerWatch,
}

impl PendingChoices {
    pub fn wait(self) -> Option<Result<Vec<InstanceChoice>>> {
        let result = self.rx.recv().ok()?;
        self.owner.is_alive().then_some(result)
    }

    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<Vec<InstanceChoice>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => self.owner.is_alive().then_some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_take(&self) -> Option<Result<Vec<InstanceChoice>>> {
        let result = self.rx.try_recv().ok()?;
        self.owner.is_alive().then_some(result)
    }
}

pub struct InstanceRegistry {
    store: Arc<Store>,
    directory: Arc<dyn InstanceDirectory>,
}

impl InstanceRegistry {
    pub fn new(store: Arc<Store>, directory: Arc<dyn InstanceDirectory>) -> Self {
        Self { store, directory }
    }

    pub fn list_custom(&self) -> Result<Vec<CustomInstance>> {
        self.store.list_custom_instances()
    }

    /// Validates and stores a custom instance. The stored form (trimmed name,
    /// url without trailing slash) is returned.
    pub fn add_custom(&self, instance: CustomInstance) -> Result<CustomInstance> {
        let instance = normalize(instance)?;
        if !self.store.insert_custom_instance(&instance)? {
            return Err(RegistryError::Duplicate(instance.api_url).into());
        }
        log::info!(
            "registry: added custom instance {} ({})",
            instance.name,
            instance.api_url
        );
        Ok(instance)
    }

    pub fn remove_custom(&self, api_url: &str) -> Result<bool> {
        let key = api_url.trim().trim_end_matches('/');
        let removed = self.store.delete_custom_instance(key)?;
        if removed {
            log::info!("registry: removed custom instance {key}");
        }
        Ok(removed)
    }

    pub fn clear_all(&self) -> Result<()> {
        let removed = self.store.delete_all_custom_instances()?;
        log::info!("registry: cleared {removed} custom instances");
        Ok(())
    }

    /// Public instance list; failures degrade to an empty list so selection
    /// stays usable offline.
    pub fn fetch_public(&self) -> Vec<PublicInstance> {
        match self.directory.instances() {
            Ok(instances) => instances,
            Err(err) => {
                log::warn!("registry: public instance list unavailable: {err:#}");
                Vec::new()
            }
        }
    }

    pub fn build_choices(&self) -> Result<Vec<InstanceChoice>> {
        let mut choices: Vec<InstanceChoice> = self
            .fetch_public()
            .into_iter()
            .filter_map(InstanceChoice::from_public)
            .collect();
        choices.extend(self.list_custom()?.into_iter().map(InstanceChoice::from));
        Ok(choices)
    }

    /// Runs [`build_choices`](Self::build_choices) on a background thread.
    /// The result is discarded if `owner` has been dropped by the time the
    /// fetch completes.
    pub fn spawn_choices(self: &Arc<Self>, owner: OwnerWatch) -> PendingChoices {
        let (tx, rx) = bounded(1);
        let registry = Arc::clone(self);
        let watch = owner.clone();
        thread::spawn(move || {
            let result = registry.build_choices();
            if !watch.is_alive() {
                log::debug!("registry: owner gone, dropping instance choices");
                return;
            }
            let _ = tx.send(result);
        });
        PendingChoices { rx, owner }
    }
}

fn normalize(instance: CustomInstance) -> Result<CustomInstance, RegistryError> {
    let name = instance.name.trim();
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    let raw = instance.api_url.trim();
    let parsed = Url::parse(raw).map_err(|_| RegistryError::InvalidUrl(raw.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(RegistryError::InvalidUrl(raw.to_string()));
    }
    Ok(CustomInstance {
        name: name.to_string(),
        api_url: raw.trim_end_matches('/').to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{public, StaticDirectory};
    use super::*;
    use crate::storage::open_temp;

    fn registry(directory: StaticDirectory) -> (tempfile::TempDir, Arc<InstanceRegistry>) {
        let (dir, store) = open_temp();
        let registry = InstanceRegistry::new(Arc::new(store), Arc::new(directory));
        (dir, Arc::new(registry))
    }

    fn urls(choices: &[InstanceChoice]) -> Vec<&str> {
        choices.iter().map(|c| c.api_url.as_str()).collect()
    }

    #[test]
    fn add_appends_and_clear_empties() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![]));
        registry
            .add_custom(CustomInstance::new("first", "https://first.example"))
            .unwrap();
        registry
            .add_custom(CustomInstance::new("n", "https://u.example/"))
            .unwrap();

        let listed = registry.list_custom().unwrap();
        assert_eq!(
            listed.last(),
            Some(&CustomInstance::new("n", "https://u.example"))
        );

        registry.clear_all().unwrap();
        assert!(registry.list_custom().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_and_duplicate_entries() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![]));
        let err = registry
            .add_custom(CustomInstance::new("  ", "https://a.example"))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::EmptyName)
        );

        for bad in ["not a url", "ftp://a.example", "mailto:me@example.org"] {
            let err = registry
                .add_custom(CustomInstance::new("bad", bad))
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RegistryError>(),
                Some(RegistryError::InvalidUrl(_))
            ));
        }

        registry
            .add_custom(CustomInstance::new("a", "https://a.example"))
            .unwrap();
        let err = registry
            .add_custom(CustomInstance::new("again", "https://a.example/"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::Duplicate(_))
        ));
        assert_eq!(registry.list_custom().unwrap().len(), 1);
    }

    #[test]
    fn remove_single_instance() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![]));
        registry
            .add_custom(CustomInstance::new("a", "https://a.example"))
            .unwrap();
        registry
            .add_custom(CustomInstance::new("b", "https://b.example"))
            .unwrap();
        assert!(registry.remove_custom("https://a.example/").unwrap());
        assert!(!registry.remove_custom("https://a.example").unwrap());
        assert_eq!(
            registry.list_custom().unwrap(),
            vec![CustomInstance::new("b", "https://b.example")]
        );
    }

    #[test]
    fn public_entries_come_before_custom_ones() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![
            public(Some("A"), Some("https://a.example")),
            public(Some("B"), Some("https://b.example")),
        ]));
        registry
            .add_custom(CustomInstance::new("C", "https://c.example"))
            .unwrap();

        let choices = registry.build_choices().unwrap();
        assert_eq!(
            urls(&choices),
            vec!["https://a.example", "https://b.example", "https://c.example"]
        );
        assert_eq!(choices[2].display_name, "C");
    }

    #[test]
    fn incomplete_public_entries_are_dropped() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![
            public(None, Some("x")),
            public(Some("no url"), None),
            public(Some("A"), Some("https://a.example")),
        ]));
        let choices = registry.build_choices().unwrap();
        assert_eq!(urls(&choices), vec!["https://a.example"]);
    }

    #[test]
    fn directory_failure_falls_back_to_custom() {
        let (_dir, registry) = registry(StaticDirectory::failing());
        assert!(registry.fetch_public().is_empty());
        registry
            .add_custom(CustomInstance::new("C", "https://c.example"))
            .unwrap();
        let choices = registry.build_choices().unwrap();
        assert_eq!(urls(&choices), vec!["https://c.example"]);
    }

    #[test]
    fn background_choices_reach_live_owner() {
        let (_dir, registry) = registry(StaticDirectory::with(vec![public(
            Some("A"),
            Some("https://a.example"),
        )]));
        let owner = Owner::new();
        let pending = registry.spawn_choices(owner.watch());
        let choices = pending
            .wait_timeout(Duration::from_secs(5))
            .expect("owner alive")
            .unwrap();
        assert_eq!(urls(&choices), vec!["https://a.example"]);
    }

    #[test]
    fn background_choices_dropped_after_teardown() {
        let mut directory = StaticDirectory::with(vec![public(Some("A"), Some("https://a.example"))]);
        directory.delay = Duration::from_millis(100);
        let (_dir, registry) = registry(directory);

        let owner = Owner::new();
        let watch = owner.watch();
        let pending = registry.spawn_choices(watch.clone());
        drop(owner);
        assert!(!watch.is_alive());
        assert!(pending.wait_timeout(Duration::from_secs(5)).is_none());
    }
}
