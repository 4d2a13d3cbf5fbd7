use crate::config::DeeplConfig;
use crate::target_file::TargetFile;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

pub struct DeepL {
    client: Client,
    endpoint: String,
    key: String,
}

impl DeepL {
    pub fn new(client: Client, cfg: &DeeplConfig) -> Result<Self, anyhow::Error> {
        if cfg.key.is_empty() {
            return Err(anyhow::anyhow!("DeepL key is not set (deepl.key or DEEPL_KEY)"));
        }
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            key: cfg.key.clone(),
        })
    }

    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, anyhow::Error> {
        let res: TranslateResponse = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.key),
            )
            .form(&[
                ("text", text),
                ("source_lang", source),
                ("target_lang", target),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        res.translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| anyhow::anyhow!("Empty translation response"))
    }
}

/// Rows needing a translation: empty target cell, non-empty source cell.
pub fn pending_rows(target: &TargetFile, source_column: usize, target_column: usize) -> Vec<usize> {
    target
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let source = row.get(source_column).map(|c| c.trim()).unwrap_or("");
            let translated = row.get(target_column).map(|c| c.trim()).unwrap_or("");
            !source.is_empty() && translated.is_empty()
        })
        .map(|(i, _)| i)
        .collect()
}

pub async fn translate_column(
    deepl: &DeepL,
    target: &mut TargetFile,
    source_column: usize,
    target_column: usize,
    (source_lang, target_lang): (&str, &str),
    delay: Duration,
) -> Result<usize, anyhow::Error> {
    target.pad_rows(source_column.max(target_column) + 1);
    let pending = pending_rows(target, source_column, target_column);
    let mut translated = 0;
    for (n, i) in pending.iter().enumerate() {
        if n > 0 {
            tokio::time::sleep(delay).await;
        }
        let text = target.rows[*i][source_column].trim().to_string();
        match deepl.translate(&text, source_lang, target_lang).await {
            Ok(t) => {
                target.rows[*i][target_column] = t;
                translated += 1;
            }
            Err(err) => log::warn!("Unable to translate row {}: {err}", i + 2),
        }
    }
    target.write_atomic()?;
    log::info!(
        "Translated {translated} of {} rows in {}",
        pending.len(),
        target.path().display()
    );
    Ok(translated)
}

pub async fn run(
    client: Client,
    cfg: &DeeplConfig,
    file: Option<&std::path::Path>,
) -> Result<usize, anyhow::Error> {
    let deepl = DeepL::new(client, cfg)?;
    let path = file.unwrap_or(cfg.target_file.as_path());
    let mut target = TargetFile::read(path, cfg.delimiter)?;
    translate_column(
        &deepl,
        &mut target,
        cfg.source_column,
        cfg.target_column,
        (cfg.source_lang.as_str(), cfg.target_lang.as_str()),
        cfg.delay,
    )
    .await
}
