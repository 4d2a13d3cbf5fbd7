use crate::reconcile::normalize_id;
use crate::target_file::{self, TargetFile};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_rusqlite::Connection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_id_by_sku(&self, sku: &str) -> Result<Option<i64>, anyhow::Error>;
    /// Translation group of a post, shared by all language versions of a product.
    async fn translation_group(&self, post_id: i64) -> Result<Option<i64>, anyhow::Error>;
    async fn upsert_category(&self, category: Category) -> Result<(), anyhow::Error>;
    async fn get_category(&self, id: i64) -> Result<Option<Category>, anyhow::Error>;
}

pub struct SqliteCatalogRepository {
    conn: Connection,
}

impl SqliteCatalogRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS posts (
                    id INTEGER PRIMARY KEY,
                    post_type TEXT NOT NULL DEFAULT 'product',
                    title TEXT
                );
                CREATE TABLE IF NOT EXISTS postmeta (
                    post_id INTEGER NOT NULL,
                    meta_key TEXT NOT NULL,
                    meta_value TEXT
                );
                CREATE INDEX IF NOT EXISTS postmeta_key_value ON postmeta (meta_key, meta_value);
                CREATE TABLE IF NOT EXISTS translations (
                    group_id INTEGER NOT NULL,
                    lang TEXT NOT NULL,
                    post_id INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS categories (
                    id INTEGER PRIMARY KEY,
                    parent_id INTEGER,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL DEFAULT ''
                );",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    /// SQLite folds ASCII case only, so SKUs are compared with `normalize_id` here.
    async fn find_id_by_sku(&self, sku: &str) -> Result<Option<i64>, anyhow::Error> {
        let sku = normalize_id(sku);
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, m.meta_value FROM posts p
                     JOIN postmeta m ON m.post_id = p.id
                     WHERE m.meta_key = '_sku'
                       AND p.post_type IN ('product', 'product_variation')
                     ORDER BY p.id",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let value: Option<String> = row.get(1)?;
                    if value.is_some_and(|v| normalize_id(&v) == sku) {
                        return Ok(Some(row.get(0)?));
                    }
                }
                Ok(None)
            })
            .await?)
    }

    async fn translation_group(&self, post_id: i64) -> Result<Option<i64>, anyhow::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let id = conn
                    .query_row(
                        "SELECT group_id FROM translations WHERE post_id = ?1",
                        [post_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(id)
            })
            .await?)
    }

    async fn upsert_category(&self, category: Category) -> Result<(), anyhow::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO categories (id, parent_id, name, slug) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        parent_id = excluded.parent_id,
                        name = excluded.name,
                        slug = excluded.slug",
                    params![category.id, category.parent_id, category.name, category.slug],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_category(&self, id: i64) -> Result<Option<Category>, anyhow::Error> {
        Ok(self
            .conn
            .call(move |conn| {
                let c = conn
                    .query_row(
                        "SELECT id, parent_id, name, slug FROM categories WHERE id = ?1",
                        [id],
                        |row| {
                            Ok(Category {
                                id: row.get(0)?,
                                parent_id: row.get(1)?,
                                name: row.get(2)?,
                                slug: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(c)
            })
            .await?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: usize,
    pub missing: usize,
}

/// Fills empty id cells by SKU and, when `group_column` is set, the translation group.
pub async fn resolve_ids(
    repo: &dyn CatalogRepository,
    target: &mut TargetFile,
    sku_column: usize,
    id_column: usize,
    group_column: Option<usize>,
) -> Result<ResolveReport, anyhow::Error> {
    let width = [Some(sku_column), Some(id_column), group_column]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or_default();
    target.pad_rows(width + 1);
    let mut report = ResolveReport::default();
    for row in target.rows.iter_mut() {
        let sku = row[sku_column].trim().to_string();
        if sku.is_empty() || !row[id_column].trim().is_empty() {
            continue;
        }
        let Some(id) = repo.find_id_by_sku(&sku).await? else {
            log::debug!("No product with sku {sku:?}");
            report.missing += 1;
            continue;
        };
        row[id_column] = id.to_string();
        report.resolved += 1;
        if let Some(c) = group_column {
            if let Some(group) = repo.translation_group(id).await? {
                row[c] = group.to_string();
            }
        }
    }
    Ok(report)
}

pub async fn import_categories(
    repo: &dyn CatalogRepository,
    path: &Path,
    delimiter: u8,
) -> Result<usize, anyhow::Error> {
    let categories: Vec<Category> = target_file::read_records(path, delimiter)?;
    let total = categories.len();
    for category in categories {
        repo.upsert_category(category).await?;
    }
    log::info!("Imported {total} categories from {}", path.display());
    Ok(total)
}
