use crate::{config::CheckerConfig, model::LinkStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Reachability check for a single URL.
///
/// Implementations never fail: anything that prevents a good answer is
/// reported as `LinkStatus::NotAvailable`. They must return promptly once
/// `cancel` fires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, url: &str, cancel: &CancellationToken) -> LinkStatus;
}

/// Checks `links` one after another and collects their statuses.
///
/// Duplicate URLs collapse into a single entry.
pub async fn check_links(
    probe: &dyn Probe,
    links: &[String],
    cancel: &CancellationToken,
) -> BTreeMap<String, LinkStatus> {
    let mut results = BTreeMap::new();
    for link in links {
        let status = probe.check(link, cancel).await;
        results.insert(link.clone(), status);
    }
    results
}

/// HTTP probe backed by `reqwest`.
///
/// Any response below 500 counts as available. Redirects are not followed.
pub struct Checker {
    client: reqwest::Client,
}

impl Checker {
    pub fn new(conf: &CheckerConfig) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(conf.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(conf.user_agent.clone())
            .build()
            .with_context(|| "Failed to build reqwest client")?;

        Ok(Self { client })
    }

    /// Adds a scheme to bare links, preferring https.
    pub fn normalize_url(link: &str) -> String {
        let link = link.trim();

        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }

        let https = format!("https://{}", link);
        if reqwest::Url::parse(&https).is_ok() {
            return https;
        }

        format!("http://{}", link)
    }

    async fn fetch(&self, url: &str) -> LinkStatus {
        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() < 500 => LinkStatus::Available,
            Ok(response) => {
                tracing::debug!("{} answered {}", url, response.status());
                LinkStatus::NotAvailable
            }
            Err(e) => {
                tracing::debug!("{} unreachable: {}", url, e);
                LinkStatus::NotAvailable
            }
        }
    }
}

#[async_trait]
impl Probe for Checker {
    async fn check(&self, url: &str, cancel: &CancellationToken) -> LinkStatus {
        let url = Self::normalize_url(url);

        tokio::select! {
            status = self.fetch(&url) => status,
            _ = cancel.cancelled() => {
                tracing::debug!("Check of {} cancelled", url);
                LinkStatus::NotAvailable
            }
        }
    }
}
