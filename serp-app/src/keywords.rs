//! Keyword input files.
//!
//! `.json` files hold either an array of strings or `{"keywords": [...]}`;
//! anything else is read as text, one keyword per line, `#` starting a
//! comment line.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum KeywordFile {
    List(Vec<String>),
    Object { keywords: Vec<String> },
}

pub fn read_keywords(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading keywords from {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json(&raw).with_context(|| format!("parsing {}", path.display()))
    } else {
        Ok(parse_text(&raw))
    }
}

fn parse_json(raw: &str) -> Result<Vec<String>> {
    match serde_json::from_str::<KeywordFile>(raw) {
        Ok(KeywordFile::List(list)) | Ok(KeywordFile::Object { keywords: list }) => Ok(list),
        Err(_) => bail!("expected a JSON array of strings or an object with a \"keywords\" array"),
    }
}

fn parse_text(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
