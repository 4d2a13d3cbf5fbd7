use catalog_sync::attribute::{fill_attributes, AttributeOptions};
use catalog_sync::reconcile::find_discrepancies;
use catalog_sync::rule_file::{LookupKey, RuleFile, RuleLayout};
use catalog_sync::target_file::TargetFile;
use catalog_types::record::{ColumnMap, SiteRecord, SupplierRecord};

const RULES: &str = "\u{feff}id;value;raw_1;raw_2\r\n\
27;Колір;;\r\n\
;Чорний;black;чорн\r\n\
;;чорний;\r\n\
31;\"Матеріал; основний\";;\r\n\
;Пластик;abs;\r\n";

fn target_row(width: usize, cells: &[(usize, &str)]) -> String {
    let mut row = vec![String::new(); width];
    for (i, v) in cells {
        row[*i] = v.to_string();
    }
    row.join(";")
}

#[test]
fn rule_file_round_trips_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attribute.csv");
    std::fs::write(&path, RULES).unwrap();
    let rules = RuleFile::load(&path, b';', RuleLayout::attributes()).unwrap();
    rules.write().unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), RULES);
}

#[test]
fn hit_with_empty_value_clears_the_cell() {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("attribute.csv");
    let target_path = dir.path().join("new.csv");
    std::fs::write(&rules_path, RULES).unwrap();
    let header = target_row(32, &[(0, "sku"), (27, "color"), (31, "material")]);
    let rows = [
        target_row(32, &[(0, "A1"), (27, "Чорний")]),
        target_row(32, &[(0, "A2"), (27, "BLACK"), (31, "Метал")]),
        target_row(28, &[(0, "A3"), (27, "синій")]),
    ];
    std::fs::write(&target_path, format!("{header}\n{}\n", rows.join("\n"))).unwrap();

    let mut rules = RuleFile::load(&rules_path, b';', RuleLayout::attributes()).unwrap();
    let mut target = TargetFile::read(&target_path, b';').unwrap();
    let report = fill_attributes(&mut target, &mut rules, &AttributeOptions::default());
    target.write_atomic().unwrap();
    rules.write().unwrap();

    assert_eq!(report.rows, 3);
    assert_eq!(report.stats["27"].cleared, 1);
    assert_eq!(report.stats["27"].replaced, 1);
    assert_eq!(report.stats["27"].inserted, 1);
    assert_eq!(report.stats["31"].inserted, 1);

    let target = TargetFile::read(&target_path, b';').unwrap();
    assert_eq!(target.rows.len(), 3);
    assert_eq!(target.rows[0][27], "");
    assert_eq!(target.rows[1][27], "Чорний");
    assert_eq!(target.rows[1][31], "Метал");
    assert_eq!(target.rows[2][27], "синій");

    let written = std::fs::read_to_string(&rules_path).unwrap();
    assert!(written.starts_with('\u{feff}'));
    assert!(written.contains(";;чорний;\r\n;;синій;\r\n31;"));
    assert!(written.ends_with(";Пластик;abs;\r\n;;метал;\r\n"));

    let reloaded = RuleFile::load(&rules_path, b';', RuleLayout::attributes()).unwrap();
    let learned = reloaded.get("27", &LookupKey::single("Синій")).unwrap();
    assert_eq!(learned.values, vec![""]);
    assert!(!learned.learned);
}

#[test]
fn barcode_differing_only_by_whitespace_is_one_discrepancy() {
    let columns = ColumnMap {
        id: Some(0),
        sku: 1,
        barcode: Some(2),
        ..Default::default()
    };
    let to_row = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    let site = vec![SiteRecord::decode(&to_row(&["501", "SP-100", "4820168 "]), &columns)];
    let supplier = vec![
        SupplierRecord::decode(&to_row(&["", "SP-100-B", "4820168"]), &columns),
        SupplierRecord::decode(&to_row(&["", "sp-100-b", "4820168"]), &columns),
    ];
    let found = find_discrepancies(&site, &supplier);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].site_sku, "SP-100");
    assert_eq!(found[0].supplier_sku, "SP-100-B");
}
