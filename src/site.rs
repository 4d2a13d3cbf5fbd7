use crate::config::SiteConfig;
use crate::target_file::TargetFile;
use catalog_types::record::SiteRecord;

/// Loads the site export. The first row is the header.
pub fn read_site(config: &SiteConfig) -> Result<Vec<SiteRecord>, anyhow::Error> {
    let file = TargetFile::read(&config.path, config.delimiter)?;
    let records: Vec<SiteRecord> = file
        .rows
        .iter()
        .map(|row| SiteRecord::decode(row, &config.columns))
        .collect();
    log::info!(
        "Loaded {} site products from {}",
        records.len(),
        config.path.display()
    );
    Ok(records)
}
