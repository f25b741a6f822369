use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::SessionError;

const YOUTUBE_SERVICE_ID: i64 = 0;
const CHANNEL_URL_PREFIX: &str = "https://www.youtube.com/channel/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel_id: String,
    pub name: String,
}

pub trait SubscriptionService {
    fn subscriptions(&self, token: &str) -> Result<Vec<Subscription>>;
    fn subscribe(&self, token: &str, channel_id: &str) -> Result<()>;
}

/// Resolves opaque handles chosen by the user into byte streams.
pub trait FileAccess {
    fn open_read(&self, handle: &str) -> Result<Box<dyn Read>>;
    fn open_write(&self, handle: &str) -> Result<Box<dyn Write>>;
}

/// Treats handles as filesystem paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFileAccess;

impl FileAccess for FsFileAccess {
    fn open_read(&self, handle: &str) -> Result<Box<dyn Read>> {
        let file = File::open(handle).with_context(|| format!("transfer: open {handle}"))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, handle: &str) -> Result<Box<dyn Write>> {
        if let Some(parent) = Path::new(handle).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("transfer: create directory {}", parent.display()))?;
            }
        }
        let file = File::create(handle).with_context(|| format!("transfer: create {handle}"))?;
        Ok(Box::new(file))
    }
}

/// NewPipe subscription export layout.
#[derive(Debug, Serialize, Deserialize)]
struct NewPipeExport {
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    app_version_int: i64,
    #[serde(default)]
    subscriptions: Vec<NewPipeSubscription>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NewPipeSubscription {
    #[serde(default)]
    service_id: i64,
    url: String,
    #[serde(default)]
    name: String,
}

pub fn parse_subscriptions(data: &[u8]) -> Result<Vec<Subscription>> {
    let export: NewPipeExport =
        serde_json::from_slice(data).context("transfer: parse subscription list")?;
    let mut seen = HashSet::new();
    Ok(export
        .subscriptions
        .into_iter()
        .filter(|sub| sub.service_id == YOUTUBE_SERVICE_ID)
        .filter_map(|sub| {
            let channel_id = channel_id_from_url(&sub.url)?;
            seen.insert(channel_id.clone()).then_some(Subscription {
                channel_id,
                name: sub.name,
            })
        })
        .collect())
}

pub fn serialize_subscriptions(subscriptions: &[Subscription]) -> Result<Vec<u8>> {
    let export = NewPipeExport {
        app_version: crate::VERSION.to_string(),
        app_version_int: 0,
        subscriptions: subscriptions
            .iter()
            .map(|sub| NewPipeSubscription {
                service_id: YOUTUBE_SERVICE_ID,
                url: format!("{CHANNEL_URL_PREFIX}{}", sub.channel_id),
                name: sub.name.clone(),
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&export).context("transfer: serialize subscription list")
}

fn channel_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/channel/")?;
    let id = rest.split(['/', '?', '#']).next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Moves the subscription list between a file handle and the session's
/// auth instance.
pub struct SubscriptionTransfer<'a> {
    service: &'a dyn SubscriptionService,
    files: &'a dyn FileAccess,
    token: &'a str,
}

impl<'a> SubscriptionTransfer<'a> {
    pub fn new(
        service: &'a dyn SubscriptionService,
        files: &'a dyn FileAccess,
        token: &'a str,
    ) -> Self {
        Self {
            service,
            files,
            token,
        }
    }

    /// Subscribes to every channel listed in `source`. A missing handle does
    /// nothing and returns `Ok(None)`; otherwise the number of channels sent.
    pub fn import_subscriptions(&self, source: Option<&str>) -> Result<Option<usize>> {
        let Some(handle) = source else {
            return Ok(None);
        };
        self.require_session()?;

        let mut data = Vec::new();
        self.files
            .open_read(handle)?
            .read_to_end(&mut data)
            .with_context(|| format!("transfer: read {handle}"))?;
        let subscriptions = parse_subscriptions(&data)?;

        for sub in &subscriptions {
            self.service
                .subscribe(self.token, &sub.channel_id)
                .with_context(|| format!("transfer: import {}", sub.channel_id))?;
        }
        log::info!(
            "transfer: imported {} subscriptions from {handle}",
            subscriptions.len()
        );
        Ok(Some(subscriptions.len()))
    }

    /// Writes the current subscription list to `destination`. A missing
    /// handle does nothing and returns `Ok(None)`.
    pub fn export_subscriptions(&self, destination: Option<&str>) -> Result<Option<usize>> {
        let Some(handle) = destination else {
            return Ok(None);
        };
        self.require_session()?;

        let subscriptions = self.service.subscriptions(self.token)?;
        let data = serialize_subscriptions(&subscriptions)?;
        let mut writer = self.files.open_write(handle)?;
        writer
            .write_all(&data)
            .and_then(|_| writer.flush())
            .with_context(|| format!("transfer: write {handle}"))?;
        log::info!(
            "transfer: exported {} subscriptions to {handle}",
            subscriptions.len()
        );
        Ok(Some(subscriptions.len()))
    }

    fn require_session(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(SessionError::NotLoggedIn.into());
        }
        Ok(())
    }
}
