// src/ingest/config.rs
//! Seed list of categories driving bulk ingestion.
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "INGEST_CATEGORIES_PATH";

/// Looked up in order when $INGEST_CATEGORIES_PATH is unset.
const SEED_CANDIDATES: [&str; 2] = ["config/categories.toml", "config/categories.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedFormat {
    /// `categories = ["Bars", ...]`
    Toml,
    /// `["Bars", ...]`
    Json,
}

impl SeedFormat {
    fn for_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn parse(self, content: &str) -> Result<Vec<String>> {
        match self {
            Self::Toml => {
                #[derive(Deserialize)]
                struct Seed {
                    categories: Vec<String>,
                }
                Ok(toml::from_str::<Seed>(content)?.categories)
            }
            Self::Json => Ok(serde_json::from_str(content)?),
        }
    }
}

/// Trimmed, without blanks or duplicates, sorted.
fn tidy(raw: Vec<String>) -> Vec<String> {
    raw.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Load a seed file. The extension picks the format; any other extension is
/// accepted in whichever of the two formats parses.
pub fn load_categories_from(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading categories from {}", path.display()))?;
    let raw = match SeedFormat::for_path(path) {
        Some(format) => format
            .parse(&content)
            .with_context(|| format!("parsing {format:?} category seed {}", path.display()))?,
        None => SeedFormat::Toml
            .parse(&content)
            .or_else(|_| SeedFormat::Json.parse(&content))
            .with_context(|| format!("{} is neither a TOML nor a JSON category list", path.display()))?,
    };
    Ok(tidy(raw))
}

/// $INGEST_CATEGORIES_PATH (must exist), then the first existing candidate
/// under config/, else an empty seed.
pub fn load_categories_default() -> Result<Vec<String>> {
    let path = match std::env::var_os(ENV_PATH) {
        Some(p) => {
            let p = PathBuf::from(p);
            if !p.is_file() {
                bail!("{ENV_PATH}={} does not exist", p.display());
            }
            Some(p)
        }
        None => SEED_CANDIDATES.iter().map(PathBuf::from).find(|p| p.is_file()),
    };
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let seed = load_categories_from(&path)?;
    tracing::debug!(target: "ingest", path = %path.display(), categories = seed.len(), "category seed read");
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tidy_trims_drops_blanks_and_sorts() {
        let raw = vec![" Pizza ".into(), "".into(), "Bars".into(), "  Bars".into(), "   ".into()];
        assert_eq!(tidy(raw), vec!["Bars".to_string(), "Pizza".to_string()]);
    }

    #[test]
    fn extension_picks_the_format() {
        assert_eq!(SeedFormat::for_path(Path::new("a/seed.TOML")), Some(SeedFormat::Toml));
        assert_eq!(SeedFormat::for_path(Path::new("seed.json")), Some(SeedFormat::Json));
        assert_eq!(SeedFormat::for_path(Path::new("seed.txt")), None);
        assert_eq!(SeedFormat::for_path(Path::new("seed")), None);
        // a .toml file must hold TOML
        assert!(SeedFormat::Toml.parse(r#"["Dentists"]"#).is_err());
    }

    #[test]
    fn unnamed_format_is_sniffed() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("seed.list");
        std::fs::write(&p, r#"["Dentists", "Bars"]"#).unwrap();
        assert_eq!(
            load_categories_from(&p).unwrap(),
            vec!["Bars".to_string(), "Dentists".to_string()]
        );
        std::fs::write(&p, "not a list").unwrap();
        assert!(load_categories_from(&p).is_err());
    }
}
