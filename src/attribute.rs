use crate::config::AttributeConfig;
use crate::rule_file::{LookupKey, Resolution, RuleFile, RuleLayout};
use crate::target_file::TargetFile;
use crate::EnrichmentReport;
use itertools::Itertools;

#[derive(Debug, Clone, Default)]
pub struct AttributeOptions {
    /// Cells holding several values (`Чорний|Білий`) are resolved value by value.
    pub list_separator: Option<String>,
}

/// Replaces raw attribute values of every column that has a block in `rules`.
pub fn fill_attributes(
    target: &mut TargetFile,
    rules: &mut RuleFile,
    opts: &AttributeOptions,
) -> EnrichmentReport {
    let columns: Vec<(String, usize)> = rules
        .block_ids()
        .into_iter()
        .filter_map(|id| id.parse::<usize>().ok().map(|c| (id.to_string(), c)))
        .sorted_by_key(|(_, c)| *c)
        .collect();
    if let Some(max) = columns.iter().map(|(_, c)| *c).max() {
        target.pad_rows(max + 1);
    }

    for row in target.rows.iter_mut() {
        for (block, column) in &columns {
            let cell = &mut row[*column];
            let value = match opts.list_separator.as_deref() {
                Some(sep) if !sep.is_empty() => resolve_list(rules, block, cell, sep),
                _ => resolve_single(rules, block, cell),
            };
            if let Some(value) = value {
                *cell = value;
            }
        }
    }

    EnrichmentReport {
        rows: target.rows.len(),
        stats: rules.stats().clone(),
    }
}

fn resolve_single(rules: &mut RuleFile, block: &str, cell: &str) -> Option<String> {
    let raw = cell.trim();
    if raw.is_empty() {
        return None;
    }
    match rules.resolve(block, &LookupKey::single(raw)) {
        Resolution::Replace(values) => values.into_iter().next(),
        Resolution::Clear => Some(String::new()),
        Resolution::Keep => None,
    }
}

fn resolve_list(rules: &mut RuleFile, block: &str, cell: &str, sep: &str) -> Option<String> {
    if cell.trim().is_empty() {
        return None;
    }
    let mut values = vec![];
    let mut changed = false;
    for part in cell.split(sep).map(str::trim).filter(|p| !p.is_empty()) {
        match rules.resolve(block, &LookupKey::single(part)) {
            Resolution::Replace(v) => {
                changed = true;
                values.extend(v.into_iter().next());
            }
            Resolution::Clear => changed = true,
            Resolution::Keep => values.push(part.to_string()),
        }
    }
    changed.then(|| values.into_iter().unique().join(sep))
}

pub fn run(cfg: &AttributeConfig) -> Result<EnrichmentReport, anyhow::Error> {
    let mut rules = RuleFile::load(&cfg.rule_file, cfg.rule_delimiter, RuleLayout::attributes())?;
    let mut target = TargetFile::read(&cfg.target_file, cfg.delimiter)?;
    let opts = AttributeOptions {
        list_separator: cfg.list_separator.clone(),
    };
    let report = fill_attributes(&mut target, &mut rules, &opts);
    target.write_atomic()?;
    if rules.is_dirty() {
        rules.write()?;
    }
    rules.log_stats("attribute");
    log::info!(
        "Attributes filled in {}: {} rows, {} replaced, {} cleared, {} new synonyms",
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

    const RULES: &str = "id;value;raw_1;raw_2\n\
2;Колір;;\n\
;Чорний;black;чорн\n\
;;чорний;\n\
3;Матеріал;;\n\
;Пластик;abs;\n";

    fn setup(target: &str) -> (tempfile::TempDir, TargetFile, RuleFile) {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("attribute.csv");
        let target_path = dir.path().join("products.csv");
        std::fs::write(&rules_path, RULES).unwrap();
        std::fs::write(&target_path, target).unwrap();
        let rules = RuleFile::load(&rules_path, b';', RuleLayout::attributes()).unwrap();
        let target = TargetFile::read(&target_path, b';').unwrap();
        (dir, target, rules)
    }

    #[test]
    fn replaces_clears_and_learns() {
        let (_dir, mut target, mut rules) =
            setup("sku;name;color;material\nA1;x;Black;ABS\nA2;y;Чорний;Метал\nA3;z\n");
        let report = fill_attributes(&mut target, &mut rules, &AttributeOptions::default());

        assert_eq!(report.rows, 3);
        assert_eq!(target.rows[0], vec!["A1", "x", "Чорний", "Пластик"]);
        assert_eq!(target.rows[1], vec!["A2", "y", "", "Метал"]);
        assert_eq!(target.rows[2], vec!["A3", "z", "", ""]);
        assert_eq!(report.stats["2"].replaced, 1);
        assert_eq!(report.stats["2"].cleared, 1);
        assert_eq!(report.stats["3"].inserted, 1);
        assert_eq!(rules.rows().last().unwrap(), &vec!["", "", "метал", ""]);
    }

    #[test]
    fn resolves_lists_value_by_value() {
        let (_dir, mut target, mut rules) = setup("sku;name;color\nA1;x;black|чорний|Сірий|чорн\n");
        let opts = AttributeOptions {
            list_separator: Some("|".to_string()),
        };
        fill_attributes(&mut target, &mut rules, &opts);
        assert_eq!(target.rows[0][2], "Чорний|Сірий");
        assert_eq!(rules.stats()["2"].inserted, 1);
    }

    #[test]
    fn list_without_hits_is_left_as_is() {
        let (_dir, mut target, mut rules) = setup("sku;name;color\nA1;x;Red | Blue | Red\n");
        let opts = AttributeOptions {
            list_separator: Some("|".to_string()),
        };
        fill_attributes(&mut target, &mut rules, &opts);
        assert_eq!(target.rows[0][2], "Red | Blue | Red");
        assert_eq!(rules.stats()["2"].inserted, 2);
    }

    #[test]
    fn run_rewrites_target_and_rules() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AttributeConfig {
            rule_file: dir.path().join("attribute.csv"),
            rule_delimiter: b';',
            target_file: dir.path().join("products.csv"),
            delimiter: b',',
            list_separator: None,
        };
        std::fs::write(&cfg.rule_file, RULES).unwrap();
        std::fs::write(&cfg.target_file, "sku,name,color\nA1,x,black\nA2,y,Сірий\n").unwrap();

        let report = run(&cfg).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(
            std::fs::read_to_string(&cfg.target_file).unwrap(),
            "sku,name,color\nA1,x,Чорний\nA2,y,Сірий\n"
        );
        let rules = std::fs::read_to_string(&cfg.rule_file).unwrap();
        assert!(rules.contains(";;сірий;\n3;Матеріал"));
    }
}
