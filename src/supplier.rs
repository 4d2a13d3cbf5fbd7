use crate::config::{FeedFormat, SupplierFeed};
use crate::target_file;
use anyhow::Context;
use async_zip::base::read::mem::ZipFileReader;
use calamine::{open_workbook, Reader, Xls, Xlsx};
use catalog_types::record::SupplierRecord;
use catalog_types::{round_price_to_9, Availability};
use derive_more::{Display, Error};
use reqwest::Client;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};

/// Delimiter of the standardized supplier CSV and the reports derived from it.
pub const STANDARD_DELIMITER: u8 = b';';

#[derive(Debug, Display, Error)]
pub enum DownloadError {
    #[display("HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error(ignore)]
    #[display("Empty response for {_0}")]
    Empty(String),
    Network(reqwest::Error),
    #[error(ignore)]
    Other(anyhow::Error),
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network(err)
    }
}

impl From<anyhow::Error> for DownloadError {
    fn from(err: anyhow::Error) -> Self {
        DownloadError::Other(err)
    }
}

/// Fetches the feed and stores it at `raw_path`. ZIP payloads are unpacked.
pub async fn download(client: &Client, feed: &SupplierFeed) -> Result<PathBuf, DownloadError> {
    let response = client.get(&feed.url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status,
            url: feed.url.clone(),
        });
    }
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(DownloadError::Empty(feed.url.clone()));
    }
    let content = if looks_like_zip(&bytes) {
        unzip_first(bytes.to_vec()).await?
    } else {
        bytes.to_vec()
    };
    target_file::write_atomic(&feed.raw_path, &content)?;
    log::info!(
        "Downloaded {} bytes from {} to {}",
        content.len(),
        feed.url,
        feed.raw_path.display()
    );
    Ok(feed.raw_path.clone())
}

fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(b"PK\x03\x04")
}

async fn unzip_first(bytes: Vec<u8>) -> Result<Vec<u8>, anyhow::Error> {
    let zip = ZipFileReader::new(bytes).await?;
    let entry_index = zip
        .file()
        .entries()
        .iter()
        .enumerate()
        .find_map(|(idx, entry)| entry.dir().ok().and_then(|is_dir| (!is_dir).then_some(idx)))
        .ok_or_else(|| anyhow::anyhow!("ZIP archive has no files"))?;
    let mut reader = zip.reader_with_entry(entry_index).await?;
    let mut output = Vec::new();
    reader.read_to_end_checked(&mut output).await?;
    Ok(output)
}

/// Positional rows of the downloaded feed.
pub fn read_raw(feed: &SupplierFeed) -> Result<Vec<Vec<String>>, anyhow::Error> {
    let path = feed.raw_path.as_path();
    match feed.format {
        FeedFormat::Csv => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Unable to read {}", path.display()))?;
            let (mut rows, _) = target_file::read_rows(&bytes, feed.delimiter)
                .with_context(|| format!("Unable to parse {}", path.display()))?;
            rows.retain(|row| !row.is_empty());
            Ok(rows)
        }
        FeedFormat::Xls => {
            let workbook: Xls<_> = open_workbook(path)
                .map_err(|err| anyhow::anyhow!("Unable to open {}: {err}", path.display()))?;
            first_sheet(workbook, path)
        }
        FeedFormat::Xlsx => {
            let workbook: Xlsx<_> = open_workbook(path)
                .map_err(|err| anyhow::anyhow!("Unable to open {}: {err}", path.display()))?;
            first_sheet(workbook, path)
        }
    }
}

fn first_sheet<RS, R>(mut workbook: R, path: &Path) -> Result<Vec<Vec<String>>, anyhow::Error>
where
    RS: std::io::Read + std::io::Seek,
    R: Reader<RS>,
{
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow::anyhow!("No worksheet found in {}", path.display()))?
        .map_err(|err| anyhow::anyhow!("Unable to read {}: {err:?}", path.display()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}

/// Compares the header row against `expected_header`, ignoring case and extra trailing columns.
pub fn check_header(feed: &SupplierFeed, rows: &[Vec<String>]) -> Result<(), anyhow::Error> {
    let Some(expected) = feed.expected_header.as_ref() else {
        return Ok(());
    };
    let header = rows.get(feed.skip_rows).map(Vec::as_slice).unwrap_or_default();
    for (i, name) in expected.iter().enumerate() {
        let actual = header.get(i).map(|c| c.trim()).unwrap_or("");
        if actual.to_lowercase() != name.trim().to_lowercase() {
            return Err(anyhow::anyhow!(
                "Unexpected header in {}: column {i} is {actual:?}, expected {name:?}",
                feed.raw_path.display()
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub written: usize,
    pub empty_sku: usize,
    pub out_of_stock: usize,
}

pub fn apply_price_rules(price: Decimal, feed: &SupplierFeed) -> Decimal {
    let price = match feed.markup_percent.and_then(|m| Decimal::try_from(m).ok()) {
        Some(markup) => price * (Decimal::ONE_HUNDRED + markup) / Decimal::ONE_HUNDRED,
        None => price,
    };
    if feed.round_to_9 {
        round_price_to_9(price)
    } else {
        price.round_dp(2)
    }
}

/// Decodes data rows into supplier records and applies the feed's price and stock rules.
pub fn standardize(
    feed: &SupplierFeed,
    rows: &[Vec<String>],
) -> (Vec<SupplierRecord>, ProcessReport) {
    let skip = feed.skip_rows + usize::from(feed.has_header);
    let mut report = ProcessReport::default();
    let mut records = Vec::with_capacity(rows.len().saturating_sub(skip));
    for (i, row) in rows.iter().enumerate().skip(skip) {
        let mut record = SupplierRecord::decode(row, &feed.columns);
        if record.sku.is_empty() {
            log::debug!("{}:{}: empty sku", feed.raw_path.display(), i + 1);
            report.empty_sku += 1;
            continue;
        }
        if feed.in_stock_only && record.available == Availability::NotAvailable {
            report.out_of_stock += 1;
            continue;
        }
        record.price = record.price.map(|p| apply_price_rules(p, feed));
        records.push(record);
    }
    report.written = records.len();
    (records, report)
}

pub fn process(feed: &SupplierFeed) -> Result<ProcessReport, anyhow::Error> {
    let rows = read_raw(feed)?;
    check_header(feed, &rows)?;
    let (records, report) = standardize(feed, &rows);
    target_file::write_records(&feed.output_path, STANDARD_DELIMITER, &records)?;
    log::info!(
        "{}: {} products written to {}, {} rows without sku, {} out of stock dropped",
        feed.url,
        report.written,
        feed.output_path.display(),
        report.empty_sku,
        report.out_of_stock
    );
    Ok(report)
}

/// Reads the standardized supplier CSV written by [`process`].
pub fn read_processed(feed: &SupplierFeed) -> Result<Vec<SupplierRecord>, anyhow::Error> {
    target_file::read_records(&feed.output_path, STANDARD_DELIMITER)
}
