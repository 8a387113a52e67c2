use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{Result, SyncError};

pub const SETTINGS_FILE: &str = "messaging.toml";
const MIN_PAGE_LIMIT: u32 = 1;
const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base: String,
    /// Upload endpoints, tried in order until one accepts the file.
    pub upload_endpoints: Vec<String>,
    pub messages_page_limit: u32,
    pub request_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:3000".into(),
            upload_endpoints: vec!["/api/files".into(), "/api/upload".into()],
            messages_page_limit: 50,
            request_timeout_secs: 30,
        }
    }
}

impl ClientSettings {
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    pub fn page_limit(&self) -> u32 {
        clamp_page_limit(self.messages_page_limit)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn validated(mut self) -> Result<Self> {
        let api_base = self.api_base.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&api_base)
            .map_err(|err| SyncError::InvalidConfig(format!("api_base '{api_base}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidConfig(format!(
                "api_base must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        self.api_base = api_base;

        self.upload_endpoints = self
            .upload_endpoints
            .into_iter()
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        if self.upload_endpoints.is_empty() {
            return Err(SyncError::InvalidConfig(
                "at least one upload endpoint is required".into(),
            ));
        }

        Ok(self)
    }
}

pub fn clamp_page_limit(limit: u32) -> u32 {
    limit.clamp(MIN_PAGE_LIMIT, MAX_PAGE_LIMIT)
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> ClientSettings {
    let mut settings = match read_settings_file(path) {
        Ok(Some(file_settings)) => file_settings,
        Ok(None) => ClientSettings::default(),
        Err(err) => {
            warn!("config: ignoring settings file: {err:#}");
            ClientSettings::default()
        }
    };

    if let Some(v) = env("MESSAGING_API_BASE") {
        settings.api_base = v;
    }
    if let Some(v) = env("APP__API_BASE") {
        settings.api_base = v;
    }

    if let Some(v) = env("APP__UPLOAD_ENDPOINTS") {
        let endpoints: Vec<String> = v
            .split(',')
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        if endpoints.is_empty() {
            warn!("config: APP__UPLOAD_ENDPOINTS is empty; keeping {:?}", settings.upload_endpoints);
        } else {
            settings.upload_endpoints = endpoints;
        }
    }

    if let Some(v) = env("APP__MESSAGES_PAGE_LIMIT") {
        match v.parse::<u32>() {
            Ok(parsed) => settings.messages_page_limit = parsed,
            Err(_) => warn!("config: invalid APP__MESSAGES_PAGE_LIMIT '{v}'"),
        }
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.request_timeout_secs = parsed,
            Err(_) => warn!("config: invalid APP__REQUEST_TIMEOUT_SECS '{v}'"),
        }
    }

    settings
}

fn read_settings_file(path: &Path) -> anyhow::Result<Option<ClientSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let settings = toml::from_str::<ClientSettings>(&raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(Some(settings))
}
