//! Counterparty screening against a blacklist
//!
//! A freshly detected deposit is only accepted once every counterparty
//! address involved clears the screener.

use crate::config::ScreenerConfig;
use crate::error::{SwapperError, SwapperResult};
use crate::model::Chain;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blacklist lookup for counterparty addresses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Screener: Send + Sync {
    /// True if any of `addresses` (address -> chain) is blacklisted.
    async fn is_blacklisted(&self, addresses: HashMap<String, Chain>) -> SwapperResult<bool>;
}

#[derive(Debug, Deserialize)]
struct ScreenResponse {
    is_blacklisted: bool,
}

/// Remote compliance service
pub struct HttpScreener {
    url: String,
    http: reqwest::Client,
}

impl HttpScreener {
    pub fn new(url: impl Into<String>) -> SwapperResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SwapperError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl Screener for HttpScreener {
    async fn is_blacklisted(&self, addresses: HashMap<String, Chain>) -> SwapperResult<bool> {
        let response: ScreenResponse = self
            .http
            .post(&self.url)
            .json(&addresses)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SwapperError::Screener(e.to_string()))?
            .json()
            .await
            .map_err(|e| SwapperError::Screener(format!("decoding response: {}", e)))?;

        debug!(
            "Screened {} addresses: blacklisted={}",
            addresses.len(),
            response.is_blacklisted
        );
        Ok(response.is_blacklisted)
    }
}

/// Local deny list, one address per line, `#` starts a comment
#[derive(Debug, Default)]
pub struct DenyListScreener {
    denied: HashSet<String>,
}

impl DenyListScreener {
    pub fn load(path: &Path) -> SwapperResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SwapperError::Config(format!("Failed to read deny list {:?}: {}", path, e))
        })?;
        let screener = Self::parse(&contents);
        info!("Loaded {} denied addresses from {:?}", screener.len(), path);
        Ok(screener)
    }

    pub fn parse(contents: &str) -> Self {
        let denied = contents
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { denied }
    }

    pub fn len(&self) -> usize {
        self.denied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }
}

#[async_trait]
impl Screener for DenyListScreener {
    async fn is_blacklisted(&self, addresses: HashMap<String, Chain>) -> SwapperResult<bool> {
        let hit = addresses.iter().find(|(address, _)| {
            self.denied.contains(&address.to_lowercase())
        });
        if let Some((address, chain)) = hit {
            warn!("Address {} on {} is on the deny list", address, chain);
        }
        Ok(hit.is_some())
    }
}

/// Checks every configured screener; any hit is a hit
pub struct CompositeScreener {
    screeners: Vec<Arc<dyn Screener>>,
}

#[async_trait]
impl Screener for CompositeScreener {
    async fn is_blacklisted(&self, addresses: HashMap<String, Chain>) -> SwapperResult<bool> {
        for screener in &self.screeners {
            if screener.is_blacklisted(addresses.clone()).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Build the screener described by `config`, if any
pub fn from_config(config: &ScreenerConfig) -> SwapperResult<Option<Arc<dyn Screener>>> {
    let mut screeners: Vec<Arc<dyn Screener>> = Vec::new();
    if let Some(path) = &config.deny_list_path {
        screeners.push(Arc::new(DenyListScreener::load(Path::new(path))?));
    }
    if let Some(url) = &config.url {
        screeners.push(Arc::new(HttpScreener::new(url.clone())?));
    }

    Ok(match screeners.len() {
        0 => None,
        1 => screeners.pop(),
        _ => Some(Arc::new(CompositeScreener { screeners })),
    })
}
