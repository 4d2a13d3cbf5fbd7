use anyhow::Context;
use catalog_types::record::ColumnMap;
use catalog_types::{deserialize_duration_from_string, serialize_duration_into_string};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validation::Profile;

fn default_delimiter() -> u8 {
    b';'
}

fn default_config_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_scrape_delay_min() -> Duration {
    Duration::from_secs(1)
}

fn default_scrape_delay_max() -> Duration {
    Duration::from_secs(3)
}

fn default_batch_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_api_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_media_cache_size() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

pub fn deserialize_delimiter<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "\\t" | "\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        s => Err(serde::de::Error::custom(format!(
            "Delimiter must be a single ASCII character, got {s:?}"
        ))),
    }
}

pub fn serialize_delimiter<S: Serializer>(d: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&(*d as char).to_string())
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Csv,
    Xls,
    Xlsx,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupplierFeed {
    pub url: String,
    #[serde(default)]
    pub format: FeedFormat,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default = "default_true")]
    pub has_header: bool,
    #[serde(default)]
    pub expected_header: Option<Vec<String>>,
    pub columns: ColumnMap,
    #[serde(default)]
    pub markup_percent: Option<f64>,
    #[serde(default)]
    pub round_to_9: bool,
    #[serde(default)]
    pub in_stock_only: bool,
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub new_products_path: Option<PathBuf>,
    #[serde(default)]
    pub discrepancies_path: Option<PathBuf>,
}

impl SupplierFeed {
    pub fn new_products_path(&self) -> PathBuf {
        self.new_products_path
            .clone()
            .unwrap_or_else(|| with_suffix(&self.output_path, "new"))
    }

    pub fn discrepancies_path(&self) -> PathBuf {
        self.discrepancies_path
            .clone()
            .unwrap_or_else(|| with_suffix(&self.output_path, "discrepancies"))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    path.with_file_name(format!("{stem}_{suffix}.csv"))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteConfig {
    pub path: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    pub columns: ColumnMap,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttributeConfig {
    pub rule_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub rule_delimiter: u8,
    pub target_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    #[serde(default)]
    pub list_separator: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CategoryConfig {
    pub rule_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub rule_delimiter: u8,
    pub target_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    #[serde(default)]
    pub supplier_column: Option<usize>,
    pub key_columns: Vec<usize>,
    pub target_column: usize,
    #[serde(default)]
    pub secondary_column: Option<usize>,
    #[serde(default)]
    pub sorted: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScrapeConfig {
    pub target_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    pub url_column: usize,
    pub row_selector: String,
    pub name_selector: String,
    pub value_selector: String,
    pub attribute_columns: HashMap<String, usize>,
    #[serde(
        default = "default_scrape_delay_min",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub delay_min: Duration,
    #[serde(
        default = "default_scrape_delay_max",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub delay_max: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WooConfig {
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_media_cache_size")]
    pub media_cache_size: usize,
    #[serde(
        default = "default_batch_delay",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub batch_delay: Duration,
    #[serde(
        default = "default_api_delay",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub request_delay: Duration,
    /// Target file column holding image file names for `--resolve-media`.
    #[serde(default)]
    pub image_column: Option<usize>,
    #[serde(default)]
    pub media_id_column: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeeplConfig {
    #[serde(default = "default_deepl_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub key: String,
    pub source_lang: String,
    pub target_lang: String,
    pub target_file: PathBuf,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
    pub source_column: usize,
    pub target_column: usize,
    #[serde(
        default = "default_config_delay",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub delay: Duration,
}

fn default_deepl_endpoint() -> String {
    "https://api-free.deepl.com/v2/translate".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub id_column: Option<usize>,
    #[serde(default)]
    pub sku_column: Option<usize>,
    #[serde(default)]
    pub group_column: Option<usize>,
    #[serde(default)]
    pub target_file: Option<PathBuf>,
    #[serde(
        default = "default_delimiter",
        deserialize_with = "deserialize_delimiter",
        serialize_with = "serialize_delimiter"
    )]
    pub delimiter: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration_from_string",
        serialize_with = "serialize_duration_into_string"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    pub site: Option<SiteConfig>,
    #[serde(default)]
    pub suppliers: HashMap<String, SupplierFeed>,
    pub attributes: Option<AttributeConfig>,
    pub categories: Option<CategoryConfig>,
    pub scrape: Option<ScrapeConfig>,
    pub woocommerce: Option<WooConfig>,
    pub deepl: Option<DeeplConfig>,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub validation: HashMap<String, Profile>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read config {}", path.display()))?;
        let mut config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&input)
                .with_context(|| format!("Unable to parse config {}", path.display()))?,
            _ => serde_yaml::from_str(&input)
                .with_context(|| format!("Unable to parse config {}", path.display()))?,
        };
        config.apply_env();
        Ok(config)
    }

    /// Secrets left out of the document are taken from the environment.
    fn apply_env(&mut self) {
        if let Some(woo) = self.woocommerce.as_mut() {
            if woo.key.is_empty() {
                woo.key = envmnt::get_or("WOO_KEY", "");
            }
            if woo.secret.is_empty() {
                woo.secret = envmnt::get_or("WOO_SECRET", "");
            }
        }
        if let Some(deepl) = self.deepl.as_mut() {
            if deepl.key.is_empty() {
                deepl.key = envmnt::get_or("DEEPL_KEY", "");
            }
        }
    }

    pub fn supplier(&self, id: &str) -> Result<&SupplierFeed, anyhow::Error> {
        self.suppliers
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("Supplier {id:?} is not configured"))
    }

    pub fn site(&self) -> Result<&SiteConfig, anyhow::Error> {
        self.site
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Site file is not configured"))
    }

    pub fn section<'a, T>(section: &'a Option<T>, name: &str) -> Result<&'a T, anyhow::Error> {
        section
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Section {name:?} is missing in config"))
    }
}
