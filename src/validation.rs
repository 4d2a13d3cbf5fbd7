use derive_more::{Display, Error};
use lazy_regex::regex_is_match;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    #[display("not_empty")]
    NotEmpty,
    #[display("integer")]
    Integer,
    #[display("integer_or_empty")]
    IntegerOrEmpty,
    #[display("float_or_empty")]
    FloatOrEmpty,
    #[display("datetime")]
    Datetime,
    #[display("one_of {_0:?}")]
    OneOf(Vec<String>),
}

impl Rule {
    pub fn check(&self, value: &str) -> bool {
        let value = value.trim();
        match self {
            Self::NotEmpty => !value.is_empty(),
            Self::Integer => is_integer(value),
            Self::IntegerOrEmpty => value.is_empty() || is_integer(value),
            Self::FloatOrEmpty => value.is_empty() || regex_is_match!(r"^[+-]?\d+([.,]\d+)?$", value),
            Self::Datetime => is_datetime(value),
            Self::OneOf(allowed) => allowed.iter().any(|a| a == value),
        }
    }
}

fn is_integer(value: &str) -> bool {
    regex_is_match!(r"^[+-]?\d+$", value)
}

fn is_datetime(value: &str) -> bool {
    let full = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let date = format_description!("[year]-[month]-[day]");
    PrimitiveDateTime::parse(value, full).is_ok() || Date::parse(value, date).is_ok()
}

/// Column name to rule.
pub type Profile = HashMap<String, Rule>;

#[derive(Debug, Display, Error)]
pub enum ValidationError {
    #[error(ignore)]
    #[display("Unknown validation profile {_0:?}")]
    UnknownProfile(String),
    #[display("{}: column {column:?} is missing", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[display("Line {line}: {column} = {value:?} does not satisfy {rule}")]
    Violation {
        line: u64,
        column: String,
        value: String,
        rule: Rule,
    },
    #[display("{}: {source}", path.display())]
    Io { path: PathBuf, source: csv::Error },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub rows: usize,
    pub blank: usize,
}

pub fn validate_file(
    path: &Path,
    delimiter: u8,
    profile: &Profile,
) -> Result<ValidationReport, ValidationError> {
    let io = |source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(io)?;
    let header = rdr.headers().map_err(io)?.clone();

    let mut checks: Vec<(usize, &str, &Rule)> = Vec::with_capacity(profile.len());
    for (column, rule) in profile {
        let idx = header
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
            .ok_or_else(|| ValidationError::MissingColumn {
                path: path.to_path_buf(),
                column: column.clone(),
            })?;
        checks.push((idx, column.as_str(), rule));
    }
    checks.sort_by_key(|(idx, _, _)| *idx);

    let mut report = ValidationReport::default();
    for record in rdr.records() {
        let record = record.map_err(io)?;
        if record.iter().all(|c| c.trim().is_empty()) {
            report.blank += 1;
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        for (idx, column, rule) in &checks {
            let value = record.get(*idx).unwrap_or("");
            if !rule.check(value) {
                return Err(ValidationError::Violation {
                    line,
                    column: column.to_string(),
                    value: value.to_string(),
                    rule: (*rule).clone(),
                });
            }
        }
        report.rows += 1;
    }
    Ok(report)
}

pub fn run(
    profiles: &HashMap<String, Profile>,
    name: &str,
    path: &Path,
    delimiter: u8,
) -> Result<ValidationReport, ValidationError> {
    let profile = profiles
        .get(name)
        .ok_or_else(|| ValidationError::UnknownProfile(name.to_string()))?;
    let report = validate_file(path, delimiter, profile)?;
    log::info!(
        "{} is valid against {name:?}: {} rows checked, {} blank rows skipped",
        path.display(),
        report.rows,
        report.blank
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(rules: &[(&str, Rule)]) -> Profile {
        rules
            .iter()
            .map(|(c, r)| (c.to_string(), r.clone()))
            .collect()
    }

    fn write(input: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock.csv");
        std::fs::write(&path, input).unwrap();
        (dir, path)
    }

    #[test]
    fn integer_rule() {
        let p = profile(&[("Qty", Rule::Integer)]);
        let (_dir, path) = write("Sku,Qty\nA1,-5\nA2,12\n");
        let report = validate_file(&path, b',', &p).unwrap();
        assert_eq!(report.rows, 2);

        let (_dir, path) = write("Sku,Qty\nA1,1\nA2,abc\n");
        match validate_file(&path, b',', &p) {
            Err(ValidationError::Violation {
                line, column, value, ..
            }) => {
                assert_eq!(line, 3);
                assert_eq!(column, "Qty");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_rows_are_skipped() {
        let p = profile(&[("Qty", Rule::Integer), ("Sku", Rule::NotEmpty)]);
        let (_dir, path) = write("Sku;Qty\nA1;3\n;\n \t; \nA2;4\n");
        let report = validate_file(&path, b';', &p).unwrap();
        assert_eq!(report, ValidationReport { rows: 2, blank: 2 });
    }

    #[test]
    fn missing_column() {
        let p = profile(&[("Price", Rule::FloatOrEmpty)]);
        let (_dir, path) = write("Sku,Qty\nA1,1\n");
        assert!(matches!(
            validate_file(&path, b',', &p),
            Err(ValidationError::MissingColumn { column, .. }) if column == "Price"
        ));
    }

    #[test]
    fn rule_checks() {
        assert!(Rule::FloatOrEmpty.check("12,50"));
        assert!(Rule::FloatOrEmpty.check("12.5"));
        assert!(Rule::FloatOrEmpty.check(""));
        assert!(!Rule::FloatOrEmpty.check("12,5,0"));
        assert!(Rule::IntegerOrEmpty.check(" "));
        assert!(!Rule::Integer.check(""));
        assert!(Rule::Datetime.check("2024-03-01 12:30:00"));
        assert!(Rule::Datetime.check("2024-03-01"));
        assert!(!Rule::Datetime.check("01.03.2024"));
        let status = Rule::OneOf(vec!["new".to_string(), "used".to_string()]);
        assert!(status.check("used"));
        assert!(!status.check("broken"));
    }

    #[test]
    fn unknown_profile() {
        let (_dir, path) = write("Sku\nA1\n");
        assert!(matches!(
            run(&HashMap::new(), "stock", &path, b','),
            Err(ValidationError::UnknownProfile(_))
        ));
    }
}
