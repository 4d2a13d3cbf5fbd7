use crate::config::CategoryConfig;
use crate::rule_file::{LookupKey, Resolution, RuleFile, RuleLayout};
use crate::target_file::TargetFile;
use crate::EnrichmentReport;

#[derive(Debug, Clone)]
pub struct CategoryOptions {
    pub supplier_column: Option<usize>,
    /// Used for rows when no supplier column is configured.
    pub supplier: Option<String>,
    pub key_columns: Vec<usize>,
    pub target_column: usize,
    pub secondary_column: Option<usize>,
    pub sorted: bool,
}

impl CategoryOptions {
    pub fn from_config(cfg: &CategoryConfig, supplier: Option<String>) -> Self {
        Self {
            supplier_column: cfg.supplier_column,
            supplier,
            key_columns: cfg.key_columns.clone(),
            target_column: cfg.target_column,
            secondary_column: cfg.secondary_column,
            sorted: cfg.sorted,
        }
    }

    fn width(&self) -> usize {
        self.key_columns
            .iter()
            .copied()
            .chain(self.supplier_column)
            .chain(self.secondary_column)
            .chain(std::iter::once(self.target_column))
            .max()
            .map(|c| c + 1)
            .unwrap_or(0)
    }

    pub fn layout(&self) -> RuleLayout {
        RuleLayout::categories(self.key_columns.len(), self.sorted)
    }
}

/// Maps supplier category tuples onto site categories, block per supplier.
pub fn fill_categories(
    target: &mut TargetFile,
    rules: &mut RuleFile,
    opts: &CategoryOptions,
) -> EnrichmentReport {
    target.pad_rows(opts.width());
    let kind = rules.rules().kind;

    for row in target.rows.iter_mut() {
        let block = match opts.supplier_column {
            Some(c) => row[c].trim().to_string(),
            None => opts.supplier.clone().unwrap_or_default(),
        };
        if !kind.accepts(&block) {
            log::debug!("Skipping row with supplier id {block:?}");
            continue;
        }
        let key = LookupKey::new(opts.key_columns.iter().map(|c| &row[*c]), opts.sorted);
        if key.is_empty() {
            continue;
        }
        match rules.resolve(&block, &key) {
            Resolution::Replace(values) => {
                let mut values = values.into_iter();
                row[opts.target_column] = values.next().unwrap_or_default();
                if let Some(c) = opts.secondary_column {
                    row[c] = values.next().unwrap_or_default();
                }
            }
            Resolution::Clear => {
                row[opts.target_column].clear();
                if let Some(c) = opts.secondary_column {
                    row[c].clear();
                }
            }
            Resolution::Keep => (),
        }
    }

    EnrichmentReport {
        rows: target.rows.len(),
        stats: rules.stats().clone(),
    }
}

pub fn run(cfg: &CategoryConfig, supplier: Option<String>) -> Result<EnrichmentReport, anyhow::Error> {
    if cfg.supplier_column.is_none() && supplier.is_none() {
        return Err(anyhow::anyhow!(
            "Either categories.supplier_column or --supplier is required"
        ));
    }
    let opts = CategoryOptions::from_config(cfg, supplier);
    let mut rules = RuleFile::load(&cfg.rule_file, cfg.rule_delimiter, opts.layout())?;
    let mut target = TargetFile::read(&cfg.target_file, cfg.delimiter)?;
    let report = fill_categories(&mut target, &mut rules, &opts);
    target.write_atomic()?;
    if rules.is_dirty() {
        rules.write()?;
    }
    rules.log_stats("category");
    log::info!(
        "Categories filled in {}: {} rows, {} replaced, {} cleared, {} new synonyms",
        target.path().display(),
        report.rows,
        report.replaced(),
        report.cleared(),
        report.inserted()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = "id;category;category_ru;raw_1;raw_2\n\
acme;;;;\n\
;Спойлери;Спойлеры;тюнінг;спойлери\n\
;;;акції;\n";

    fn opts() -> CategoryOptions {
        CategoryOptions {
            supplier_column: Some(0),
            supplier: None,
            key_columns: vec![2, 3],
            target_column: 4,
            secondary_column: Some(5),
            sorted: false,
        }
    }

    fn setup(target: &str) -> (tempfile::TempDir, TargetFile, RuleFile) {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("category.csv");
        let target_path = dir.path().join("new.csv");
        std::fs::write(&rules_path, RULES).unwrap();
        std::fs::write(&target_path, target).unwrap();
        let rules = RuleFile::load(&rules_path, b';', opts().layout()).unwrap();
        (dir, TargetFile::read(&target_path, b';').unwrap(), rules)
    }

    #[test]
    fn maps_tuples_per_supplier() {
        let (_dir, mut target, mut rules) = setup(
            "supplier;sku;cat;sub;site_cat;site_cat_ru\n\
acme;A1;Тюнінг;Спойлери;;\n\
acme;A2;Акції;;old;old\n\
acme;A3;Тюнінг;Пороги\n\
best;B1;Тюнінг;Спойлери;;\n\
;C1;Тюнінг;Спойлери;;\n",
        );
        let report = fill_categories(&mut target, &mut rules, &opts());
        assert_eq!(report.rows, 5);
        assert_eq!(target.rows[0][4..], ["Спойлери", "Спойлеры"]);
        assert_eq!(target.rows[1][4..], ["", ""]);
        assert_eq!(target.rows[2][4..], ["", ""]);
        assert_eq!(target.rows[3][4..], ["", ""]);

        let acme = report.stats["acme"];
        assert_eq!((acme.replaced, acme.cleared, acme.inserted), (1, 1, 1));
        assert_eq!(report.stats["best"].inserted, 1);

        let firsts: Vec<&str> = rules.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(firsts, vec!["id", "acme", "", "", "", "best", ""]);
        assert_eq!(rules.rows()[4], vec!["", "", "", "тюнінг", "пороги"]);
        assert_eq!(rules.rows()[6], vec!["", "", "", "тюнінг", "спойлери"]);
    }

    #[test]
    fn run_requires_supplier() {
        let cfg = CategoryConfig {
            rule_file: "category.csv".into(),
            rule_delimiter: b';',
            target_file: "new.csv".into(),
            delimiter: b';',
            supplier_column: None,
            key_columns: vec![1],
            target_column: 2,
            secondary_column: None,
            sorted: false,
        };
        assert!(run(&cfg, None).is_err());
    }
}
