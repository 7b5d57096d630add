use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwap;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{errors::Error, Result};

/// On-disk blocklist document.
///
/// ```yaml
/// blocked_keywords:
///   - secret
/// regex_patterns:
///   - '\d{3}-\d{2}-\d{4}'
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub regex_patterns: Vec<String>,
}

impl ConfigDocument {
    pub fn parse(input: &str) -> Result<Self> {
        // A truncated file mid-save must not be read as "no rules".
        if input.trim().is_empty() {
            return Err(Error::Config("document is empty".to_string()));
        }
        Ok(serde_yaml::from_str(input)?)
    }
}

/// Compiled, immutable blocklist.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl RuleSet {
    /// Compile a document. Any bad pattern rejects the whole document.
    pub fn compile(doc: &ConfigDocument) -> Result<Self> {
        let keywords = doc
            .blocked_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut patterns = Vec::with_capacity(doc.regex_patterns.len());
        for (idx, raw) in doc.regex_patterns.iter().enumerate() {
            let re = RegexBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Config(format!("regex_patterns[{idx}] {raw:?}: {e}")))?;
            patterns.push(re);
        }

        Ok(Self { keywords, patterns })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.patterns.is_empty()
    }
}

/// Read, parse and compile the blocklist at `path`.
pub fn load(path: &Path) -> Result<RuleSet> {
    let invalid = |reason: String| Error::FilterConfig {
        path: path.to_path_buf(),
        reason,
    };

    let contents = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let doc = ConfigDocument::parse(&contents).map_err(|e| invalid(e.to_string()))?;
    RuleSet::compile(&doc).map_err(|e| invalid(e.to_string()))
}

/// The currently published [`RuleSet`], swapped wholesale on reload.
///
/// One writer (the file watcher), any number of readers (the dispatcher).
pub struct RuleStore {
    path: PathBuf,
    current: ArcSwap<RuleSet>,
}

impl RuleStore {
    /// Initial load. Errors here are fatal to startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rules = load(&path)?;
        info!(
            path = %path.display(),
            keywords = rules.keywords().len(),
            patterns = rules.patterns().len(),
            "blocklist loaded"
        );
        if rules.is_empty() {
            warn!(path = %path.display(), "blocklist has no rules; nothing will be blocked");
        }
        Ok(Self::with_rules(path, rules))
    }

    pub fn with_rules(path: impl Into<PathBuf>, rules: RuleSet) -> Self {
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(rules),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Re-read the file and publish the result. On error nothing is published.
    pub fn reload(&self) -> Result<Arc<RuleSet>> {
        let rules = Arc::new(load(&self.path)?);
        self.current.store(rules.clone());
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(name: &str, contents: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/sgpt-store-{}-{ts}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    const SAMPLE: &str = r#"
blocked_keywords:
  - Secret
  - "  Password "
  - ""
regex_patterns:
  - '\d{3}-\d{2}-\d{4}'
"#;

    #[test]
    fn compiles_document_and_normalizes_keywords() {
        let path = tmp_file("config.yaml", SAMPLE);
        let rules = load(&path).unwrap();
        assert_eq!(rules.keywords(), ["secret", "password"]);
        assert_eq!(rules.patterns().len(), 1);
        assert!(rules.patterns()[0].is_match("ssn 123-45-6789"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let doc = ConfigDocument::parse("blocked_keywords: [a]\n").unwrap();
        assert_eq!(doc.blocked_keywords, ["a"]);
        assert!(doc.regex_patterns.is_empty());

        let rules = RuleSet::compile(&ConfigDocument::parse("regex_patterns: []\n").unwrap())
            .unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(ConfigDocument::parse("").is_err());
        assert!(ConfigDocument::parse("  \n").is_err());
    }

    #[test]
    fn invalid_pattern_rejects_whole_document() {
        let doc = ConfigDocument {
            blocked_keywords: vec!["ok".to_string()],
            regex_patterns: vec!["fine".to_string(), "(unclosed".to_string()],
        };
        let err = RuleSet::compile(&doc).unwrap_err();
        assert!(err.to_string().contains("regex_patterns[1]"), "{err}");
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = load(Path::new("/nonexistent/sgpt/config.yaml")).unwrap_err();
        match err {
            Error::FilterConfig { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/sgpt/config.yaml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_fails_on_invalid_initial_config() {
        let path = tmp_file("config.yaml", "regex_patterns: ['[']\n");
        assert!(RuleStore::open(&path).is_err());
    }

    #[test]
    fn reload_publishes_new_rules() {
        let path = tmp_file("config.yaml", "blocked_keywords: [alpha]\n");
        let store = RuleStore::open(&path).unwrap();
        assert_eq!(store.current().keywords(), ["alpha"]);

        fs::write(&path, "blocked_keywords: [beta]\nregex_patterns: ['x+']\n").unwrap();
        let published = store.reload().unwrap();
        assert_eq!(published.keywords(), ["beta"]);
        assert_eq!(store.current().keywords(), ["beta"]);
        assert_eq!(store.current().patterns().len(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_rules() {
        let path = tmp_file("config.yaml", "blocked_keywords: [alpha]\n");
        let store = RuleStore::open(&path).unwrap();
        let before = store.current();

        fs::write(
            &path,
            "blocked_keywords: [beta]\nregex_patterns: ['(bad']\n",
        )
        .unwrap();
        assert!(store.reload().is_err());

        let after = store.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.keywords(), ["alpha"]);
    }

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let path = tmp_file("config.yaml", "blocked_keywords: [alpha]\n");
        let store = RuleStore::open(&path).unwrap();
        let snapshot = store.current();

        fs::write(&path, "blocked_keywords: [beta]\n").unwrap();
        store.reload().unwrap();

        assert_eq!(snapshot.keywords(), ["alpha"]);
        assert_eq!(store.current().keywords(), ["beta"]);
    }
}
