use anyhow::Context;
use catalog_sync::catalog_db::{self, SqliteCatalogRepository};
use catalog_sync::config::Config;
use catalog_sync::target_file::TargetFile;
use catalog_sync::woocommerce::{self, WooClient};
use catalog_sync::{
    attribute, build_http_client, category, deepl, reconcile, scrape, supplier, validation,
};
use clap::{ArgGroup, CommandFactory, Parser};
use std::env;
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;

/// One catalog sync step per invocation.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("action").multiple(false)))]
struct Args {
    /// Fetch a supplier feed to its raw path
    #[arg(long, group = "action", value_name = "SUPPLIER")]
    download_supplier: Option<String>,
    /// Decode, filter and standardize a downloaded supplier feed
    #[arg(long, group = "action", value_name = "SUPPLIER")]
    process_supplier: Option<String>,
    /// Write supplier products whose SKU is unknown to the site
    #[arg(long, group = "action", value_name = "SUPPLIER")]
    find_new_products: Option<String>,
    /// Cross-check SKUs and barcodes between supplier and site
    #[arg(long, group = "action", value_name = "SUPPLIER")]
    find_discrepancies: Option<String>,
    /// Fill attribute columns from product pages
    #[arg(long, group = "action")]
    scrape_attributes: bool,
    /// Apply attribute.csv to the target file
    #[arg(long, group = "action")]
    fill_attributes: bool,
    /// Apply category.csv to the target file
    #[arg(long, group = "action")]
    fill_categories: bool,
    /// Translate one column of the target file
    #[arg(long, group = "action")]
    translate: bool,
    /// Validate --file against a validation profile
    #[arg(long, group = "action", value_name = "PROFILE")]
    validate: Option<String>,
    /// Fill product ids from the catalog database by SKU
    #[arg(long, group = "action")]
    resolve_ids: bool,
    /// Upsert a category CSV into the catalog database
    #[arg(long, group = "action", value_name = "FILE")]
    import_categories: Option<PathBuf>,
    /// Send price and stock of --supplier to WooCommerce
    #[arg(long, group = "action")]
    push_stock: bool,
    /// Fill media ids of images named in --file
    #[arg(long, group = "action")]
    resolve_media: bool,

    #[arg(long, default_value = "config.yml")]
    config: PathBuf,
    /// Supplier id for actions that need one
    #[arg(long)]
    supplier: Option<String>,
    /// Overrides the file an action reads
    #[arg(long)]
    file: Option<PathBuf>,
    /// Delimiter of --file
    #[arg(long, default_value_t = ';')]
    delimiter: char,
}

impl Args {
    fn has_action(&self) -> bool {
        self.download_supplier.is_some()
            || self.process_supplier.is_some()
            || self.find_new_products.is_some()
            || self.find_discrepancies.is_some()
            || self.scrape_attributes
            || self.fill_attributes
            || self.fill_categories
            || self.translate
            || self.validate.is_some()
            || self.resolve_ids
            || self.import_categories.is_some()
            || self.push_stock
            || self.resolve_media
    }

    fn delimiter(&self) -> Result<u8, anyhow::Error> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| anyhow::anyhow!("Delimiter must be an ASCII character"))
    }

    fn file(&self) -> Result<&Path, anyhow::Error> {
        self.file
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--file is required for this action"))
    }

    fn supplier(&self) -> Result<&str, anyhow::Error> {
        self.supplier
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--supplier is required for this action"))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO,html5ever=error");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    if Path::new(".env").exists() {
        envmnt::load_file(".env")?;
    }

    let args = Args::parse();
    if !args.has_action() {
        Args::command().print_help()?;
        return Ok(());
    }
    let config = Config::load(&args.config)?;
    if let Err(err) = run(&args, &config).await {
        log::error!("{err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run(args: &Args, config: &Config) -> Result<(), anyhow::Error> {
    if let Some(id) = args.download_supplier.as_deref() {
        let client = build_http_client(&config.http)?;
        supplier::download(&client, config.supplier(id)?).await?;
    } else if let Some(id) = args.process_supplier.as_deref() {
        supplier::process(config.supplier(id)?)?;
    } else if let Some(id) = args.find_new_products.as_deref() {
        reconcile::run_new_products(config.site()?, config.supplier(id)?)?;
    } else if let Some(id) = args.find_discrepancies.as_deref() {
        reconcile::run_discrepancies(config.site()?, config.supplier(id)?)?;
    } else if args.scrape_attributes {
        let client = build_http_client(&config.http)?;
        scrape::run(&client, Config::section(&config.scrape, "scrape")?).await?;
    } else if args.fill_attributes {
        attribute::run(Config::section(&config.attributes, "attributes")?)?;
    } else if args.fill_categories {
        category::run(
            Config::section(&config.categories, "categories")?,
            args.supplier.clone(),
        )?;
    } else if args.translate {
        let client = build_http_client(&config.http)?;
        deepl::run(
            client,
            Config::section(&config.deepl, "deepl")?,
            args.file.as_deref(),
        )
        .await?;
    } else if let Some(profile) = args.validate.as_deref() {
        validation::run(&config.validation, profile, args.file()?, args.delimiter()?)?;
    } else if args.resolve_ids {
        let cfg = Config::section(&config.database, "database")?;
        let repo = open_repository(&cfg.path).await?;
        let path = args
            .file
            .as_deref()
            .or(cfg.target_file.as_deref())
            .ok_or_else(|| anyhow::anyhow!("Set database.target_file or pass --file"))?;
        let (Some(sku_column), Some(id_column)) = (cfg.sku_column, cfg.id_column) else {
            return Err(anyhow::anyhow!(
                "database.sku_column and database.id_column are required"
            ));
        };
        let mut target = TargetFile::read(path, cfg.delimiter)?;
        let report =
            catalog_db::resolve_ids(&repo, &mut target, sku_column, id_column, cfg.group_column)
                .await?;
        target.write_atomic()?;
        log::info!(
            "Resolved {} ids in {}, {} SKUs not found",
            report.resolved,
            path.display(),
            report.missing
        );
    } else if let Some(path) = args.import_categories.as_deref() {
        let cfg = Config::section(&config.database, "database")?;
        let repo = open_repository(&cfg.path).await?;
        catalog_db::import_categories(&repo, path, args.delimiter()?).await?;
    } else if args.push_stock {
        let cfg = Config::section(&config.woocommerce, "woocommerce")?;
        let woo = WooClient::new(build_http_client(&config.http)?, cfg);
        woocommerce::push_stock(&woo, config.site()?, config.supplier(args.supplier()?)?).await?;
    } else if args.resolve_media {
        let cfg = Config::section(&config.woocommerce, "woocommerce")?;
        let (Some(image_column), Some(id_column)) = (cfg.image_column, cfg.media_id_column) else {
            return Err(anyhow::anyhow!(
                "woocommerce.image_column and woocommerce.media_id_column are required"
            ));
        };
        let mut woo = WooClient::new(build_http_client(&config.http)?, cfg);
        let mut target = TargetFile::read(args.file()?, args.delimiter()?)?;
        woocommerce::resolve_media(&mut woo, &mut target, image_column, id_column).await?;
    }
    Ok(())
}

async fn open_repository(path: &Path) -> Result<SqliteCatalogRepository, anyhow::Error> {
    let conn = Connection::open(path)
        .await
        .with_context(|| format!("Unable to open database {}", path.display()))?;
    Ok(SqliteCatalogRepository::init(conn).await?)
}
