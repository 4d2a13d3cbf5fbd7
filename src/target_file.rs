use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Line layout of a delimited file, kept so that a rewrite matches the original bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub delimiter: u8,
    pub bom: bool,
    pub crlf: bool,
}

impl Layout {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            bom: false,
            crlf: false,
        }
    }

    fn terminator(&self) -> csv::Terminator {
        if self.crlf {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        }
    }
}

/// Splits `body` at line ends outside quoted fields. A trailing `\r` is dropped.
fn lines(body: &[u8]) -> Vec<&[u8]> {
    let mut lines = vec![];
    let mut start = 0;
    let mut quoted = false;
    for (i, b) in body.iter().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'\n' if !quoted => {
                let line = &body[start..i];
                lines.push(line.strip_suffix(b"\r").unwrap_or(line));
                start = i + 1;
            }
            _ => (),
        }
    }
    if start < body.len() {
        lines.push(&body[start..]);
    }
    lines
}

/// Reads every record of a delimited file as positional cells. Ragged rows are allowed.
/// A blank line comes back as a row without cells.
pub fn read_rows(bytes: &[u8], delimiter: u8) -> Result<(Vec<Vec<String>>, Layout), anyhow::Error> {
    let bom = bytes.starts_with(UTF8_BOM);
    let body = if bom { &bytes[UTF8_BOM.len()..] } else { bytes };
    let crlf = body
        .iter()
        .position(|b| *b == b'\n')
        .is_some_and(|i| i > 0 && body[i - 1] == b'\r');
    let mut rows = Vec::new();
    for line in lines(body) {
        if line.is_empty() {
            rows.push(vec![]);
            continue;
        }
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(line);
        let mut record = csv::ByteRecord::new();
        rdr.read_byte_record(&mut record)?;
        rows.push(
            record
                .iter()
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect(),
        );
    }
    Ok((
        rows,
        Layout {
            delimiter,
            bom,
            crlf,
        },
    ))
}

/// Encodes `rows` with `layout`. A row without cells is written as a blank line.
pub fn encode_rows<'a, I>(rows: I, layout: Layout) -> Result<Vec<u8>, anyhow::Error>
where
    I: IntoIterator<Item = &'a Vec<String>>,
{
    let mut out = Vec::new();
    if layout.bom {
        out.extend_from_slice(UTF8_BOM);
    }
    let newline: &[u8] = if layout.crlf { b"\r\n" } else { b"\n" };
    for row in rows {
        if row.is_empty() {
            out.extend_from_slice(newline);
            continue;
        }
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(layout.delimiter)
            .terminator(layout.terminator())
            .flexible(true)
            .from_writer(out);
        wtr.write_record(row)?;
        out = wtr
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Unable to flush csv writer: {err}"))?;
    }
    Ok(out)
}

pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".temp");
    PathBuf::from(name)
}

/// Writes `bytes` next to `path` and renames the temp file over it.
/// The temp file is removed when anything fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create {}", parent.display()))?;
    }
    let tmp = temp_path(path);
    let res = std::fs::File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all()
        })
        .and_then(|_| std::fs::rename(&tmp, path));
    if let Err(err) = res {
        if let Err(rm_err) = std::fs::remove_file(&tmp) {
            if rm_err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Unable to remove {}: {rm_err}", tmp.display());
            }
        }
        return Err(anyhow::Error::from(err).context(format!("Unable to write {}", path.display())));
    }
    Ok(())
}

/// Serializes named records with a header row and replaces `path` with the result.
pub fn write_records<T: Serialize>(
    path: &Path,
    delimiter: u8,
    records: &[T],
) -> Result<(), anyhow::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    for record in records {
        wtr.serialize(record)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|err| anyhow::anyhow!("Unable to flush csv writer: {err}"))?;
    write_atomic(path, &bytes)
}

pub fn read_records<T: serde::de::DeserializeOwned>(
    path: &Path,
    delimiter: u8,
) -> Result<Vec<T>, anyhow::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("Unable to open {}", path.display()))?;
    let mut records = Vec::new();
    for record in rdr.deserialize() {
        records.push(record.with_context(|| format!("Unable to decode {}", path.display()))?);
    }
    Ok(records)
}

/// Product CSV addressed by column position.
#[derive(Debug, Clone)]
pub struct TargetFile {
    path: PathBuf,
    layout: Layout,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TargetFile {
    pub fn read<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("Unable to read {}", path.display()))?;
        let (mut rows, layout) = read_rows(&bytes, delimiter)
            .with_context(|| format!("Unable to parse {}", path.display()))?;
        rows.retain(|row| !row.is_empty());
        let header = if rows.is_empty() {
            vec![]
        } else {
            rows.remove(0)
        };
        Ok(Self {
            path: path.to_path_buf(),
            layout,
            header,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    /// Right-pads every row shorter than `width` with empty cells.
    pub fn pad_rows(&mut self, width: usize) {
        for row in self.rows.iter_mut() {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
    }

    pub fn write_atomic(&self) -> Result<(), anyhow::Error> {
        let bytes = encode_rows(std::iter::once(&self.header).chain(self.rows.iter()), self.layout)?;
        write_atomic(&self.path, &bytes)
    }
}
