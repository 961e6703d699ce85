//! Loads and caches per-language build/run descriptors from a scripts
//! directory, one subdirectory per language id, each holding a
//! `config.json`.

use getset::Getters;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

pub mod error;

use error::{CatalogError, Result};

const DEFAULT_CODE_FILE: &str = "code";

/// On-disk shape of `<scripts_root>/<language>/config.json`. `build_timeout`
/// is stored in milliseconds; everything else is taken verbatim.
#[derive(Deserialize, Debug)]
struct RawDescriptor {
    #[serde(default)]
    build: Vec<String>,
    run: Vec<String>,
    #[serde(default)]
    build_memory_limit: u64,
    #[serde(default)]
    build_timeout: u64,
    #[serde(default)]
    build_max_file_size: u64,
    #[serde(default)]
    codefile: Option<String>,
}

/// Build and run configuration for a single language, resolved once and
/// cached for the life of the process.
#[derive(Getters, Clone, Debug)]
pub struct LanguageDescriptor {
    #[get = "pub"]
    build_cmd: Vec<String>,

    #[get = "pub"]
    run_cmd: Vec<String>,

    #[get = "pub"]
    build_memory_limit: u64,

    #[get = "pub"]
    build_timeout: Duration,

    #[get = "pub"]
    build_max_file_size: u64,

    #[get = "pub"]
    code_file: String,
}

impl LanguageDescriptor {
    /// A compiled language declares a non-empty `build_cmd`; interpreted
    /// languages skip the build phase entirely.
    pub fn has_build_step(&self) -> bool {
        !self.build_cmd.is_empty()
    }

    fn from_raw(raw: RawDescriptor) -> Self {
        Self {
            build_cmd: raw.build,
            run_cmd: raw.run,
            build_memory_limit: raw.build_memory_limit,
            build_timeout: Duration::from_millis(raw.build_timeout),
            build_max_file_size: raw.build_max_file_size,
            code_file: raw.codefile.unwrap_or_else(|| DEFAULT_CODE_FILE.into()),
        }
    }
}

/// Read-mostly cache of `LanguageDescriptor`s keyed by language id, backed by
/// a directory of per-language `config.json` files.
#[derive(Debug)]
pub struct LanguageCatalog {
    scripts_root: PathBuf,
    cache: RwLock<HashMap<String, Arc<LanguageDescriptor>>>,
}

impl LanguageCatalog {
    pub fn new(scripts_root: impl Into<PathBuf>) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the descriptor for `language_id`, loading and caching it from
    /// disk on first use.
    pub fn get(&self, language_id: &str) -> Result<Arc<LanguageDescriptor>> {
        if let Some(cached) = self.cache.read().unwrap().get(language_id) {
            return Ok(cached.clone());
        }

        let descriptor = Arc::new(self.load(language_id)?);
        self.cache
            .write()
            .unwrap()
            .insert(language_id.to_owned(), descriptor.clone());
        Ok(descriptor)
    }

    fn load(&self, language_id: &str) -> Result<LanguageDescriptor> {
        log::debug!("loading descriptor for language {}", language_id);
        let dir = self.scripts_root.join(language_id);
        if !dir.is_dir() {
            return Err(CatalogError::LanguageNotFound(language_id.to_owned()));
        }

        let config_path = dir.join("config.json");
        let data = fs::read(&config_path).map_err(|source| CatalogError::Io {
            path: config_path.clone(),
            source,
        })?;
        let raw: RawDescriptor =
            serde_json::from_slice(&data).map_err(|source| CatalogError::InvalidDescriptor {
                path: config_path,
                source,
            })?;

        Ok(LanguageDescriptor::from_raw(raw))
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_descriptor(root: &Path, language: &str, json: &str) {
        let dir = root.join(language);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), json).unwrap();
    }

    #[test]
    fn loads_interpreted_language() {
        let root = tempdir().unwrap();
        write_descriptor(
            root.path(),
            "python3",
            r#"{"run":["/usr/bin/python3","/w/code"],"codefile":"code"}"#,
        );

        let catalog = LanguageCatalog::new(root.path());
        let descriptor = catalog.get("python3").unwrap();

        assert!(!descriptor.has_build_step());
        assert_eq!(descriptor.run_cmd(), &["/usr/bin/python3", "/w/code"]);
        assert_eq!(descriptor.code_file(), "code");
    }

    #[test]
    fn loads_compiled_language_with_build_timeout_in_millis() {
        let root = tempdir().unwrap();
        write_descriptor(
            root.path(),
            "c",
            r#"{
                "build": ["/usr/bin/gcc", "-O2", "/w/code.c", "-o", "/w/a.out"],
                "run": ["/w/a.out"],
                "build_memory_limit": 268435456,
                "build_timeout": 10000,
                "build_max_file_size": 104857600,
                "codefile": "code.c"
            }"#,
        );

        let catalog = LanguageCatalog::new(root.path());
        let descriptor = catalog.get("c").unwrap();

        assert!(descriptor.has_build_step());
        assert_eq!(descriptor.build_timeout(), &Duration::from_secs(10));
        assert_eq!(descriptor.code_file(), "code.c");
    }

    #[test]
    fn caches_after_first_load() {
        let root = tempdir().unwrap();
        write_descriptor(root.path(), "go", r#"{"run":["/w/a.out"]}"#);

        let catalog = LanguageCatalog::new(root.path());
        let first = catalog.get("go").unwrap();
        let second = catalog.get("go").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_language_is_not_found() {
        let root = tempdir().unwrap();
        let catalog = LanguageCatalog::new(root.path());

        assert!(matches!(
            catalog.get("does-not-exist"),
            Err(CatalogError::LanguageNotFound(_))
        ));
    }

    #[test]
    fn invalid_json_is_reported() {
        let root = tempdir().unwrap();
        write_descriptor(root.path(), "broken", "not json");

        let catalog = LanguageCatalog::new(root.path());

        assert!(matches!(
            catalog.get("broken"),
            Err(CatalogError::InvalidDescriptor { .. })
        ));
    }
}
