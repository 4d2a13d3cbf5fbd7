use crate::config::{SiteConfig, SupplierFeed};
use crate::target_file;
use catalog_types::record::{SiteRecord, SupplierRecord};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use xxhash_rust::xxh3::Xxh3DefaultBuilder;

pub type IdSet = HashSet<String, Xxh3DefaultBuilder>;

/// Canonical form of a SKU or barcode for comparisons.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

pub fn id_set<I, S>(ids: I) -> IdSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|id| normalize_id(id.as_ref()))
        .filter(|id| !id.is_empty())
        .fold(
            HashSet::with_hasher(Xxh3DefaultBuilder::new()),
            |mut r, id| {
                r.insert(id);
                r
            },
        )
}

/// Candidate ids split against a known set, in candidate order, first occurrence only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub known: Vec<String>,
    pub new: Vec<String>,
}

impl Partition {
    pub fn of<I, S>(known: &IdSet, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::with_hasher(Xxh3DefaultBuilder::new());
        let mut res = Self::default();
        for id in candidates {
            let id = normalize_id(id.as_ref());
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            if known.contains(&id) {
                res.known.push(id);
            } else {
                res.new.push(id);
            }
        }
        res
    }
}

/// Supplier rows whose SKU is absent from the site.
pub fn find_new_products(site: &[SiteRecord], supplier: &[SupplierRecord]) -> Vec<SupplierRecord> {
    let site_skus = id_set(site.iter().map(|r| &r.sku));
    let partition = Partition::of(&site_skus, supplier.iter().map(|r| &r.sku));
    let new = id_set(&partition.new);
    let mut emitted = HashSet::with_hasher(Xxh3DefaultBuilder::new());
    supplier
        .iter()
        .filter(|r| {
            let sku = normalize_id(&r.sku);
            new.contains(&sku) && emitted.insert(sku)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    #[display("sku")]
    Sku,
    #[display("barcode")]
    Barcode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub matched_by: MatchedBy,
    pub site_id: String,
    pub site_sku: String,
    pub site_barcode: String,
    pub supplier_sku: String,
    pub supplier_barcode: String,
    pub supplier_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscrepancyKey {
    site_sku: String,
    site_barcode: String,
    supplier_sku: String,
    supplier_barcode: String,
}

impl Discrepancy {
    fn new(matched_by: MatchedBy, site: &SiteRecord, supplier: &SupplierRecord) -> Self {
        Self {
            matched_by,
            site_id: site.id.clone(),
            site_sku: site.sku.clone(),
            site_barcode: site.barcode.clone(),
            supplier_sku: supplier.sku.clone(),
            supplier_barcode: supplier.barcode.clone(),
            supplier_name: supplier.name.clone(),
        }
    }

    pub fn key(&self) -> DiscrepancyKey {
        DiscrepancyKey {
            site_sku: normalize_id(&self.site_sku),
            site_barcode: normalize_id(&self.site_barcode),
            supplier_sku: normalize_id(&self.supplier_sku),
            supplier_barcode: normalize_id(&self.supplier_barcode),
        }
    }
}

type SiteIndex<'a> = HashMap<String, Vec<&'a SiteRecord>, Xxh3DefaultBuilder>;

fn index_by<F>(site: &[SiteRecord], field: F) -> SiteIndex<'_>
where
    F: Fn(&SiteRecord) -> &str,
{
    let mut index: SiteIndex = HashMap::with_hasher(Xxh3DefaultBuilder::new());
    for record in site {
        let id = normalize_id(field(record));
        if !id.is_empty() {
            index.entry(id).or_default().push(record);
        }
    }
    index
}

/// Products that match on one identifier but disagree on the other.
/// SKU matches are reported before barcode matches; duplicates are dropped.
pub fn find_discrepancies(site: &[SiteRecord], supplier: &[SupplierRecord]) -> Vec<Discrepancy> {
    let by_sku = index_by(site, |r| r.sku.as_str());
    let by_barcode = index_by(site, |r| r.barcode.as_str());
    let mut seen = HashSet::with_hasher(Xxh3DefaultBuilder::new());
    let mut res = vec![];

    let mut check = |matched_by: MatchedBy, s: &SiteRecord, p: &SupplierRecord| {
        let (a, b) = match matched_by {
            MatchedBy::Sku => (&s.barcode, &p.barcode),
            MatchedBy::Barcode => (&s.sku, &p.sku),
        };
        let (a, b) = (normalize_id(a), normalize_id(b));
        if a.is_empty() || b.is_empty() || a == b {
            return;
        }
        let d = Discrepancy::new(matched_by, s, p);
        if seen.insert(d.key()) {
            res.push(d);
        }
    };

    for p in supplier {
        if let Some(matches) = by_sku.get(&normalize_id(&p.sku)) {
            for s in matches {
                check(MatchedBy::Sku, *s, p);
            }
        }
    }
    for p in supplier {
        if let Some(matches) = by_barcode.get(&normalize_id(&p.barcode)) {
            for s in matches {
                check(MatchedBy::Barcode, *s, p);
            }
        }
    }
    res
}

pub fn run_new_products(site: &SiteConfig, feed: &SupplierFeed) -> Result<usize, anyhow::Error> {
    let site_records = crate::site::read_site(site)?;
    let supplier = crate::supplier::read_processed(feed)?;
    let new = find_new_products(&site_records, &supplier);
    let path = feed.new_products_path();
    target_file::write_records(&path, crate::supplier::STANDARD_DELIMITER, &new)?;
    log::info!(
        "{} of {} supplier products are new, written to {}",
        new.len(),
        supplier.len(),
        path.display()
    );
    Ok(new.len())
}

pub fn run_discrepancies(site: &SiteConfig, feed: &SupplierFeed) -> Result<usize, anyhow::Error> {
    let site_records = crate::site::read_site(site)?;
    let supplier = crate::supplier::read_processed(feed)?;
    let found = find_discrepancies(&site_records, &supplier);
    let path = feed.discrepancies_path();
    target_file::write_records(&path, crate::supplier::STANDARD_DELIMITER, &found)?;
    log::info!("{} discrepancies written to {}", found.len(), path.display());
    Ok(found.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str, sku: &str, barcode: &str) -> SiteRecord {
        SiteRecord {
            id: id.to_string(),
            sku: sku.to_string(),
            barcode: barcode.to_string(),
            ..Default::default()
        }
    }

    fn supplier(sku: &str, barcode: &str) -> SupplierRecord {
        SupplierRecord {
            sku: sku.to_string(),
            barcode: barcode.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let known = id_set(["A1", " b2", "C3"]);
        let p = Partition::of(&known, ["b2", "X9", "a1 ", "", "x9", "Y0"]);
        assert_eq!(p.known, vec!["b2", "a1"]);
        assert_eq!(p.new, vec!["x9", "y0"]);
        assert!(p.known.iter().all(|id| !p.new.contains(id)));
    }

    #[test]
    fn new_products_keep_first_occurrence() {
        let s = vec![site("1", "AB-1", ""), site("2", "", "")];
        let p = vec![
            supplier("ab-1 ", ""),
            supplier("CD-2", "111"),
            supplier("cd-2", "222"),
            supplier("", "333"),
        ];
        let new = find_new_products(&s, &p);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].barcode, "111");
    }

    #[test]
    fn barcode_with_trailing_space_yields_one_discrepancy() {
        let s = vec![site("10", "ART-1", "4820168 ")];
        let p = vec![supplier("ART-2", "4820168")];
        let found = find_discrepancies(&s, &p);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].matched_by, MatchedBy::Barcode);
        assert_eq!(found[0].site_id, "10");
    }

    #[test]
    fn sku_match_with_different_barcodes() {
        let s = vec![site("1", "X1", "111"), site("2", "X2", "")];
        let p = vec![
            supplier("x1", "222"),
            supplier("X1", "222"),
            supplier("X2", "333"),
            supplier("X3", "111"),
        ];
        let found = find_discrepancies(&s, &p);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].matched_by, MatchedBy::Sku);
        assert_eq!(found[0].supplier_barcode, "222");
        assert_eq!(found[1].matched_by, MatchedBy::Barcode);
        assert_eq!(found[1].supplier_sku, "X3");
    }

    #[test]
    fn site_index_groups_normalized_ids() {
        let s = vec![site("1", "Шк-7", ""), site("2", " шк-7", ""), site("3", "", "")];
        let index = index_by(&s, |r| r.sku.as_str());
        assert_eq!(index.len(), 1);
        let ids: Vec<&str> = index["шк-7"].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn matching_pairs_are_not_reported() {
        let s = vec![site("1", "X1", "111")];
        let p = vec![supplier("X1", "111"), supplier("X1", "")];
        assert!(find_discrepancies(&s, &p).is_empty());
    }
}
