use crate::config::{SiteConfig, SupplierFeed, WooConfig};
use crate::reconcile::normalize_id;
use crate::target_file::TargetFile;
use cached::{Cached, SizedCache};
use catalog_types::record::{SiteRecord, SupplierRecord};
use catalog_types::Availability;
use log_error::LogError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductUpdate {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regular_price: Option<String>,
    pub manage_stock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_quantity: Option<u32>,
    pub stock_status: String,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    update: &'a [ProductUpdate],
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    update: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    pub id: u64,
    #[serde(default)]
    pub source_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    pub failed_chunks: usize,
}

pub struct WooClient {
    client: Client,
    base_url: String,
    key: String,
    secret: String,
    batch_delay: Duration,
    request_delay: Duration,
    media_cache: SizedCache<String, Option<u64>>,
}

impl WooClient {
    pub fn new(client: Client, cfg: &WooConfig) -> Self {
        Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            key: cfg.key.clone(),
            secret: cfg.secret.clone(),
            batch_delay: cfg.batch_delay,
            request_delay: cfg.request_delay,
            media_cache: SizedCache::with_size(cfg.media_cache_size.max(1)),
        }
    }

    /// Media id of an uploaded image, looked up by file name.
    pub async fn find_media_id(&mut self, file_name: &str) -> Result<Option<u64>, anyhow::Error> {
        let file_name = file_name.trim().to_string();
        if let Some(id) = self.media_cache.cache_get(&file_name) {
            return Ok(*id);
        }
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&file_name);
        let media: Vec<Media> = self
            .client
            .get(format!("{}/wp-json/wp/v2/media", self.base_url))
            .basic_auth(&self.key, Some(&self.secret))
            .query(&[("search", stem), ("per_page", "20")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let id = pick_media(&media, &file_name);
        self.media_cache.cache_set(file_name, id);
        tokio::time::sleep(self.request_delay).await;
        Ok(id)
    }

    /// Sends updates in chunks of [`BATCH_SIZE`]. A failed chunk is logged and skipped.
    pub async fn batch_update(&self, updates: &[ProductUpdate]) -> BatchReport {
        let mut report = BatchReport::default();
        let url = format!("{}/wp-json/wc/v3/products/batch", self.base_url);
        for (i, chunk) in updates.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            let res = self.send_batch(&url, chunk).await;
            match res.log_error(&format!("Unable to send batch {i}")) {
                Some(n) => report.sent += n,
                None => report.failed_chunks += 1,
            }
        }
        report
    }

    async fn send_batch(&self, url: &str, chunk: &[ProductUpdate]) -> Result<usize, anyhow::Error> {
        let res: BatchResponse = self
            .client
            .post(url)
            .basic_auth(&self.key, Some(&self.secret))
            .json(&BatchRequest { update: chunk })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(res.update.len())
    }
}

/// Picks the media item whose source URL ends with `file_name`.
pub fn pick_media(media: &[Media], file_name: &str) -> Option<u64> {
    let file_name = file_name.to_lowercase();
    media
        .iter()
        .find(|m| {
            m.source_url
                .rsplit('/')
                .next()
                .is_some_and(|name| name.to_lowercase() == file_name)
        })
        .map(|m| m.id)
}

/// Stock and price updates for site products whose supplier record differs.
pub fn build_updates(site: &[SiteRecord], supplier: &[SupplierRecord]) -> Vec<ProductUpdate> {
    let mut by_sku: HashMap<String, &SupplierRecord> = HashMap::new();
    for record in supplier {
        let sku = normalize_id(&record.sku);
        if !sku.is_empty() {
            by_sku.entry(sku).or_insert(record);
        }
    }

    let mut updates = vec![];
    for s in site {
        let Some(p) = by_sku.get(&normalize_id(&s.sku)) else {
            continue;
        };
        let Ok(id) = s.id.trim().parse::<u64>() else {
            log::debug!("Site product {} has no numeric id", s.sku);
            continue;
        };
        let quantity = match (p.quantity, p.available) {
            (Some(q), _) => Some(q),
            (None, Availability::NotAvailable) => Some(0),
            (None, _) => None,
        };
        let price_changed = p.price.is_some() && p.price != s.price;
        let stock_changed = quantity.is_some() && quantity != s.quantity;
        if !price_changed && !stock_changed {
            continue;
        }
        updates.push(ProductUpdate {
            id,
            regular_price: p.price.map(|d| d.normalize().to_string()),
            manage_stock: quantity.is_some(),
            stock_quantity: quantity,
            stock_status: p.available.stock_status().to_string(),
        });
    }
    updates
}

pub async fn push_stock(
    woo: &WooClient,
    site: &SiteConfig,
    feed: &SupplierFeed,
) -> Result<BatchReport, anyhow::Error> {
    let site_records = crate::site::read_site(site)?;
    let supplier = crate::supplier::read_processed(feed)?;
    let updates = build_updates(&site_records, &supplier);
    log::info!("{} products need a stock update", updates.len());
    let report = woo.batch_update(&updates).await;
    log::info!(
        "{} products updated, {} batches failed",
        report.sent,
        report.failed_chunks
    );
    Ok(report)
}

/// Fills `id_column` with comma-separated media ids of the images named in `image_column`.
pub async fn resolve_media(
    woo: &mut WooClient,
    target: &mut TargetFile,
    image_column: usize,
    id_column: usize,
) -> Result<usize, anyhow::Error> {
    target.pad_rows(image_column.max(id_column) + 1);
    let mut resolved = 0;
    for row in target.rows.iter_mut() {
        if !row[id_column].trim().is_empty() {
            continue;
        }
        let names: Vec<String> = row[image_column]
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let mut ids = vec![];
        for name in &names {
            match woo.find_media_id(name).await {
                Ok(Some(id)) => ids.push(id.to_string()),
                Ok(None) => log::warn!("Media {name:?} not found"),
                Err(err) => log::warn!("Unable to look up media {name:?}: {err}"),
            }
        }
        if !ids.is_empty() {
            row[id_column] = ids.join(",");
            resolved += 1;
        }
    }
    target.write_atomic()?;
    log::info!(
        "Resolved media for {resolved} rows in {}",
        target.path().display()
    );
    Ok(resolved)
}
