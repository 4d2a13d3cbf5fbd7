//! Block-structured rule files (`attribute.csv`, `category.csv`).
//!
//! Row 0 is the column header and fixes the width of every row. A row with a
//! non-empty first cell opens a block; the rows below it, up to the next
//! non-empty first cell, are synonym rows laid out as
//! `["", value_1 .. value_n, raw_1, raw_2, ..]`. Blank lines are kept as they are.

use crate::target_file::{self, Layout};
use anyhow::Context;
use lazy_regex::regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdKind {
    /// Column index of the target file.
    ColumnIndex,
    SupplierId,
}

impl BlockIdKind {
    pub fn accepts(&self, id: &str) -> bool {
        match self {
            Self::ColumnIndex => !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()),
            Self::SupplierId => regex!(r"^[A-Za-z0-9_.\-]+$").is_match(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Every raw cell of a synonym row is a synonym on its own.
    Single,
    /// The first `arity` raw cells form one composite key.
    Tuple { arity: usize, sorted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleLayout {
    pub kind: BlockIdKind,
    pub value_columns: usize,
    pub key: KeyMode,
}

impl RuleLayout {
    pub fn attributes() -> Self {
        Self {
            kind: BlockIdKind::ColumnIndex,
            value_columns: 1,
            key: KeyMode::Single,
        }
    }

    pub fn categories(arity: usize, sorted: bool) -> Self {
        Self {
            kind: BlockIdKind::SupplierId,
            value_columns: 2,
            key: KeyMode::Tuple { arity, sorted },
        }
    }

    fn raw_start(&self) -> usize {
        1 + self.value_columns
    }

    fn column_name(&self, idx: usize) -> String {
        match idx {
            0 => "id".to_string(),
            i if i < self.raw_start() => format!("value_{i}"),
            i => format!("raw_{}", i - self.raw_start() + 1),
        }
    }

    fn default_header(&self) -> Vec<String> {
        let raw = match self.key {
            KeyMode::Single => 1,
            KeyMode::Tuple { arity, .. } => arity.max(1),
        };
        (0..self.raw_start() + raw)
            .map(|i| self.column_name(i))
            .collect()
    }

    fn keys(&self, row: &[String]) -> Vec<LookupKey> {
        let raw = row.get(self.raw_start()..).unwrap_or_default();
        match self.key {
            KeyMode::Single => raw
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| LookupKey::single(c))
                .collect(),
            KeyMode::Tuple { arity, sorted } => {
                let parts: Vec<&str> = (0..arity)
                    .map(|i| raw.get(i).map(String::as_str).unwrap_or(""))
                    .collect();
                if parts.iter().all(|p| p.trim().is_empty()) {
                    vec![]
                } else {
                    vec![LookupKey::new(parts, sorted)]
                }
            }
        }
    }

    fn synonym_row(&self, key: &LookupKey, width: usize) -> Vec<String> {
        let mut row = vec![String::new(); self.raw_start()];
        row.extend(key.parts().iter().cloned());
        if row.len() < width {
            row.resize(width, String::new());
        }
        row
    }
}

/// Lower-cased, trimmed key parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupKey(Vec<String>);

impl LookupKey {
    pub fn new<I, S>(parts: I, sorted: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: Vec<String> = parts
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .collect();
        if sorted {
            parts.sort();
        }
        Self(parts)
    }

    pub fn single<S: AsRef<str>>(raw: S) -> Self {
        Self::new([raw], false)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(String::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub values: Vec<String>,
    /// Inserted during this run; nobody has filled in the values yet.
    pub learned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockSpan {
    header: usize,
    /// Exclusive.
    end: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub replaced: usize,
    pub cleared: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Replace(Vec<String>),
    Clear,
    Keep,
}

#[derive(Debug)]
pub struct RuleFile {
    path: PathBuf,
    layout: Layout,
    rules: RuleLayout,
    rows: Vec<Vec<String>>,
    blocks: Vec<(String, BlockSpan)>,
    map: HashMap<String, HashMap<LookupKey, RuleEntry>>,
    stats: BTreeMap<String, BlockStats>,
    dirty: bool,
}

impl RuleFile {
    pub fn load<P: AsRef<Path>>(
        path: P,
        delimiter: u8,
        rules: RuleLayout,
    ) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Rule file {} not found, starting empty", path.display());
                return Ok(Self::from_rows(
                    path,
                    Layout::new(delimiter),
                    rules,
                    vec![rules.default_header()],
                ));
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("Unable to read rule file {}", path.display())))
            }
        };
        let (mut rows, layout) = target_file::read_rows(&bytes, delimiter)
            .with_context(|| format!("Unable to parse rule file {}", path.display()))?;
        if rows.is_empty() {
            rows.push(rules.default_header());
        }
        Ok(Self::from_rows(path, layout, rules, rows))
    }

    fn from_rows(
        path: &Path,
        layout: Layout,
        rules: RuleLayout,
        mut rows: Vec<Vec<String>>,
    ) -> Self {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        for row in rows.iter_mut().filter(|r| !r.is_empty()) {
            row.resize(width, String::new());
        }

        let mut blocks: Vec<(String, BlockSpan)> = vec![];
        let mut map: HashMap<String, HashMap<LookupKey, RuleEntry>> = HashMap::new();
        let mut active: Option<usize> = None;
        let total = rows.len();
        for (i, row) in rows.iter().enumerate().skip(1) {
            let first = row.first().map(|c| c.trim()).unwrap_or("");
            if !first.is_empty() {
                if let Some(b) = active {
                    blocks[b].1.end = i;
                }
                if rules.kind.accepts(first) {
                    blocks.push((
                        first.to_string(),
                        BlockSpan {
                            header: i,
                            end: total,
                        },
                    ));
                    map.entry(first.to_string()).or_default();
                    active = Some(blocks.len() - 1);
                } else {
                    log::warn!(
                        "{}:{}: {first:?} is not a valid block id, skipping until next block",
                        path.display(),
                        i + 1
                    );
                    active = None;
                }
                continue;
            }
            let Some(b) = active else {
                continue;
            };
            let values: Vec<String> = row
                .iter()
                .skip(1)
                .take(rules.value_columns)
                .map(|v| v.trim().to_string())
                .collect();
            let block = map.entry(blocks[b].0.clone()).or_default();
            for key in rules.keys(row) {
                block.insert(
                    key,
                    RuleEntry {
                        values: values.clone(),
                        learned: false,
                    },
                );
            }
        }

        Self {
            path: path.to_path_buf(),
            layout,
            rules,
            rows,
            blocks,
            map,
            stats: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> RuleLayout {
        self.rules
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Block ids in file order, without duplicates.
    pub fn block_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = vec![];
        for (id, _) in &self.blocks {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn get(&self, block: &str, key: &LookupKey) -> Option<&RuleEntry> {
        self.map.get(block).and_then(|m| m.get(key))
    }

    pub fn stats(&self) -> &BTreeMap<String, BlockStats> {
        &self.stats
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Looks `key` up in `block`, learning it when it was never seen.
    pub fn resolve(&mut self, block: &str, key: &LookupKey) -> Resolution {
        let resolution = match self.get(block, key) {
            Some(entry) if entry.learned => return Resolution::Keep,
            Some(entry) => match entry.values.first() {
                Some(v) if !v.is_empty() => Resolution::Replace(entry.values.clone()),
                _ => Resolution::Clear,
            },
            None => {
                self.learn(block, key);
                Resolution::Keep
            }
        };
        let stats = self.stats.entry(block.to_string()).or_default();
        match &resolution {
            Resolution::Replace(_) => stats.replaced += 1,
            Resolution::Clear => stats.cleared += 1,
            Resolution::Keep => stats.inserted += 1,
        }
        resolution
    }

    /// Adds header columns until a synonym row of `width` cells fits.
    fn widen(&mut self, width: usize) {
        let current = self.width();
        if current >= width {
            return;
        }
        let names: Vec<String> = (current..width)
            .map(|i| self.rules.column_name(i))
            .collect();
        if let Some(header) = self.rows.first_mut() {
            header.extend(names);
        }
        for row in self.rows.iter_mut().skip(1).filter(|r| !r.is_empty()) {
            row.resize(width, String::new());
        }
    }

    fn learn(&mut self, block: &str, key: &LookupKey) {
        self.widen(self.rules.raw_start() + key.parts().len());
        let width = self.width();
        let at = match self.blocks.iter().find(|(id, _)| id == block) {
            Some((_, span)) => {
                let mut at = span.end;
                while at > span.header + 1 && self.rows[at - 1].is_empty() {
                    at -= 1;
                }
                at
            }
            None => {
                let header = self.rows.len();
                let mut row = vec![String::new(); width.max(1)];
                row[0] = block.to_string();
                self.rows.push(row);
                self.blocks.push((
                    block.to_string(),
                    BlockSpan {
                        header,
                        end: header + 1,
                    },
                ));
                header + 1
            }
        };
        self.rows.insert(at, self.rules.synonym_row(key, width));
        for (_, span) in self.blocks.iter_mut() {
            if span.header >= at {
                span.header += 1;
                span.end += 1;
            } else if span.end >= at {
                span.end += 1;
            }
        }
        self.map.entry(block.to_string()).or_default().insert(
            key.clone(),
            RuleEntry {
                values: vec![String::new(); self.rules.value_columns],
                learned: true,
            },
        );
        self.dirty = true;
    }

    pub fn encode(&self) -> Result<Vec<u8>, anyhow::Error> {
        target_file::encode_rows(self.rows.iter(), self.layout)
    }

    pub fn write(&self) -> Result<(), anyhow::Error> {
        let bytes = self.encode()?;
        target_file::write_atomic(&self.path, &bytes)
    }

    pub fn log_stats(&self, what: &str) {
        for (block, s) in &self.stats {
            log::info!(
                "{what} block {block}: {} replaced, {} cleared, {} new",
                s.replaced,
                s.cleared,
                s.inserted
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTRIBUTES: &str = "id;value;raw_1;raw_2\n\
27;Колір;;\n\
;Чорний;чорн;black\n\
;;чорний;\n\
31;Матеріал;;\n\
;Пластик;abs;пластик\n";

    fn load(input: &str, rules: RuleLayout) -> (tempfile::TempDir, RuleFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        std::fs::write(&path, input).unwrap();
        let file = RuleFile::load(&path, b';', rules).unwrap();
        (dir, file)
    }

    #[test]
    fn builds_lookup_map_per_block() {
        let (_dir, file) = load(ATTRIBUTES, RuleLayout::attributes());
        assert_eq!(file.block_ids(), vec!["27", "31"]);
        let black = file.get("27", &LookupKey::single("BLACK")).unwrap();
        assert_eq!(black.values, vec!["Чорний"]);
        assert_eq!(
            file.get("27", &LookupKey::single("чорний")).unwrap().values,
            vec![""]
        );
        assert!(file.get("31", &LookupKey::single("black")).is_none());
    }

    #[test]
    fn round_trips_without_insertions() {
        let (_dir, file) = load(ATTRIBUTES, RuleLayout::attributes());
        assert_eq!(file.encode().unwrap(), ATTRIBUTES.as_bytes());
    }

    #[test]
    fn resolves_hits_and_counts() {
        let (_dir, mut file) = load(ATTRIBUTES, RuleLayout::attributes());
        assert_eq!(
            file.resolve("27", &LookupKey::single(" Black ")),
            Resolution::Replace(vec!["Чорний".to_string()])
        );
        assert_eq!(
            file.resolve("27", &LookupKey::single("Чорний")),
            Resolution::Clear
        );
        let stats = file.stats()["27"];
        assert_eq!((stats.replaced, stats.cleared, stats.inserted), (1, 1, 0));
        assert!(!file.is_dirty());
    }

    #[test]
    fn miss_is_inserted_before_next_block() {
        let (_dir, mut file) = load(ATTRIBUTES, RuleLayout::attributes());
        assert_eq!(file.resolve("27", &LookupKey::single("Графіт")), Resolution::Keep);
        assert_eq!(file.resolve("27", &LookupKey::single("графіт")), Resolution::Keep);
        assert_eq!(file.resolve("31", &LookupKey::single("Метал")), Resolution::Keep);
        assert_eq!(file.stats()["27"].inserted, 1);
        let rows = file.rows();
        assert_eq!(rows[4], vec!["", "", "графіт", ""]);
        assert_eq!(rows[5][0], "31");
        assert_eq!(rows[7], vec!["", "", "метал", ""]);
        assert_eq!(rows.len(), 8);
        assert!(file.is_dirty());
    }

    #[test]
    fn insertions_keep_later_blocks_aligned() {
        let (_dir, mut file) = load(ATTRIBUTES, RuleLayout::attributes());
        for raw in ["a", "b", "c"] {
            file.resolve("27", &LookupKey::single(raw));
        }
        file.resolve("31", &LookupKey::single("d"));
        file.resolve("27", &LookupKey::single("e"));
        let firsts: Vec<&str> = file.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(
            firsts,
            vec!["id", "27", "", "", "", "", "", "", "31", "", ""]
        );
        assert_eq!(file.rows()[7][2], "e");
        assert_eq!(file.rows()[10][2], "d");
    }

    #[test]
    fn malformed_header_disables_mapping_until_next_block() {
        let input = "id;value;raw\n\
колір;Чорний;black\n\
;Білий;white\n\
5;Так;yes\n\
;Ні;no\n";
        let (_dir, mut file) = load(input, RuleLayout::attributes());
        assert_eq!(file.block_ids(), vec!["5"]);
        assert!(file.get("5", &LookupKey::single("white")).is_none());
        assert_eq!(
            file.resolve("5", &LookupKey::single("no")),
            Resolution::Replace(vec!["Ні".to_string()])
        );
    }

    #[test]
    fn malformed_header_closes_previous_block() {
        let input = "id;value;raw\n\
5;;\n\
;Так;yes\n\
bad id;;\n\
;Ні;no\n";
        let (_dir, mut file) = load(input, RuleLayout::attributes());
        file.resolve("5", &LookupKey::single("maybe"));
        assert_eq!(file.rows()[3], vec!["", "", "maybe"]);
        assert_eq!(file.rows()[4][0], "bad id");
    }

    #[test]
    fn missing_file_starts_with_default_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("category.csv");
        let mut file = RuleFile::load(&path, b';', RuleLayout::categories(2, false)).unwrap();
        assert_eq!(file.rows().len(), 1);
        assert!(file.block_ids().is_empty());

        let key = LookupKey::new(["Тюнінг", "Спойлери"], false);
        assert_eq!(file.resolve("acme", &key), Resolution::Keep);
        file.write().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id;value_1;value_2;raw_1;raw_2\nacme;;;;\n;;;тюнінг;спойлери\n"
        );
    }

    #[test]
    fn sorted_tuple_keys_ignore_order() {
        let input = "id;value_1;value_2;raw_1;raw_2\n\
acme;;;;\n\
;Спойлери;Спойлеры;спойлери;тюнінг\n";
        let (_dir, mut file) = load(input, RuleLayout::categories(2, true));
        let key = LookupKey::new(["Тюнінг", "Спойлери"], true);
        assert_eq!(
            file.resolve("acme", &key),
            Resolution::Replace(vec!["Спойлери".to_string(), "Спойлеры".to_string()])
        );
    }

    #[test]
    fn blank_lines_survive_rewrite() {
        let input = "id;value;raw\n27;Колір;\n;Чорний;black\n\n31;Матеріал;\n;Пластик;abs\n";
        let (_dir, mut file) = load(input, RuleLayout::attributes());
        assert_eq!(file.encode().unwrap(), input.as_bytes());
        assert_eq!(
            file.resolve("31", &LookupKey::single("pla")),
            Resolution::Keep
        );
        file.resolve("27", &LookupKey::single("Графіт"));
        assert_eq!(
            String::from_utf8(file.encode().unwrap()).unwrap(),
            "id;value;raw\n27;Колір;\n;Чорний;black\n;;графіт\n\n31;Матеріал;\n;Пластик;abs\n;;pla\n"
        );
    }

    #[test]
    fn narrow_header_is_widened_for_tuple_keys() {
        let input = "id;value_1;value_2;raw\nacme;;;\n;Диски;Диски;диски\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("category.csv");
        std::fs::write(&path, input).unwrap();
        let key = LookupKey::new(["Тюнінг", "Спойлери"], false);

        let mut file = RuleFile::load(&path, b';', RuleLayout::categories(2, false)).unwrap();
        assert_eq!(file.resolve("acme", &key), Resolution::Keep);
        file.write().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id;value_1;value_2;raw;raw_2\nacme;;;;\n;Диски;Диски;диски;\n;;;тюнінг;спойлери\n"
        );

        let mut file = RuleFile::load(&path, b';', RuleLayout::categories(2, false)).unwrap();
        assert!(file.get("acme", &key).is_some());
        assert_eq!(file.resolve("acme", &key), Resolution::Clear);
        assert!(!file.is_dirty());
    }

    #[test]
    fn later_duplicate_wins() {
        let input = "id;value;raw\n3;;\n;Old;x\n;New;x\n";
        let (_dir, file) = load(input, RuleLayout::attributes());
        assert_eq!(
            file.get("3", &LookupKey::single("x")).unwrap().values,
            vec!["New"]
        );
    }
}
