use crate::config::ScrapeConfig;
use crate::target_file::TargetFile;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

pub struct Selectors {
    row: Selector,
    name: Selector,
    value: Selector,
}

impl Selectors {
    pub fn new(cfg: &ScrapeConfig) -> Result<Self, anyhow::Error> {
        Ok(Self {
            row: parse_selector(&cfg.row_selector)?,
            name: parse_selector(&cfg.name_selector)?,
            value: parse_selector(&cfg.value_selector)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector, anyhow::Error> {
    Selector::parse(s).map_err(|err| anyhow::anyhow!("Invalid selector {s:?}: {err}"))
}

fn inner_text(e: ElementRef) -> String {
    e.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `(name, value)` pairs of a product page attribute table. Names are lower-cased.
pub fn extract_attributes(html: &str, selectors: &Selectors) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    document
        .select(&selectors.row)
        .filter_map(|row| {
            let name = row.select(&selectors.name).next().map(inner_text)?;
            let value = row.select(&selectors.value).next().map(inner_text)?;
            let name = name.trim_end_matches(':').trim().to_lowercase();
            (!name.is_empty() && !value.is_empty()).then_some((name, value))
        })
        .collect()
}

/// Writes scraped values into empty mapped cells. Returns the number of cells filled.
pub fn apply_attributes(
    row: &mut [String],
    attributes: &[(String, String)],
    columns: &HashMap<String, usize>,
) -> usize {
    let mut filled = 0;
    for (name, value) in attributes {
        let Some(column) = columns.get(name) else {
            continue;
        };
        match row.get_mut(*column) {
            Some(cell) if cell.trim().is_empty() => {
                *cell = value.clone();
                filled += 1;
            }
            _ => (),
        }
    }
    filled
}

pub async fn run(client: &Client, cfg: &ScrapeConfig) -> Result<usize, anyhow::Error> {
    let selectors = Selectors::new(cfg)?;
    let columns: HashMap<String, usize> = cfg
        .attribute_columns
        .iter()
        .map(|(name, c)| (name.trim().to_lowercase(), *c))
        .collect();
    let mut target = TargetFile::read(&cfg.target_file, cfg.delimiter)?;
    let width = columns
        .values()
        .copied()
        .chain(std::iter::once(cfg.url_column))
        .max()
        .unwrap_or_default();
    target.pad_rows(width + 1);

    let mut requests = 0;
    let mut filled = 0;
    for row in target.rows.iter_mut() {
        let url = row[cfg.url_column].trim().to_string();
        if url.is_empty() {
            continue;
        }
        if requests > 0 {
            tokio::time::sleep(crate::random_delay(cfg.delay_min, cfg.delay_max)).await;
        }
        requests += 1;
        let body = match fetch(client, &url).await {
            Ok(body) => body,
            Err(err) => {
                log::warn!("Unable to scrape {url}: {err}");
                continue;
            }
        };
        let attributes = extract_attributes(&body, &selectors);
        let n = apply_attributes(row, &attributes, &columns);
        log::debug!("{url}: {} attributes found, {n} cells filled", attributes.len());
        filled += n;
    }

    target.write_atomic()?;
    log::info!(
        "Scraped {requests} pages, filled {filled} cells in {}",
        target.path().display()
    );
    Ok(filled)
}

async fn fetch(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    client.get(url).send().await?.error_for_status()?.text().await
}
