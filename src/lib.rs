#![deny(clippy::unwrap_used)]

use crate::rule_file::BlockStats;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod attribute;
pub mod catalog_db;
pub mod category;
pub mod config;
pub mod deepl;
pub mod reconcile;
pub mod rule_file;
pub mod scrape;
pub mod site;
pub mod supplier;
pub mod target_file;
pub mod validation;
pub mod woocommerce;

static DEFAULT_ACCEPT_ENCODING: &str = "br;q=1.0, gzip;q=0.6, deflate;q=0.4, *;q=0.2";

/// Outcome of one Enrichment Pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub rows: usize,
    pub stats: BTreeMap<String, BlockStats>,
}

impl EnrichmentReport {
    pub fn replaced(&self) -> usize {
        self.stats.values().map(|s| s.replaced).sum()
    }

    pub fn cleared(&self) -> usize {
        self.stats.values().map(|s| s.cleared).sum()
    }

    pub fn inserted(&self) -> usize {
        self.stats.values().map(|s| s.inserted).sum()
    }
}

pub fn build_http_client(cfg: &config::HttpConfig) -> Result<reqwest::Client, anyhow::Error> {
    let mut map = HeaderMap::new();
    map.append(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_str(DEFAULT_ACCEPT_ENCODING)?,
    );
    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(10))
        .timeout(cfg.timeout)
        .use_rustls_tls()
        .default_headers(map);
    if let Some(agent) = cfg.user_agent.as_ref() {
        builder = builder.user_agent(agent);
    }
    Ok(builder.build()?)
}

/// Uniformly random pause in `min..=max`.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}
