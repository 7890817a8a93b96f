//! Tool directory: lookup and storage of synthesized tools.
//!
//! SQLite is the store of record; a TTL cache sits in front of it and keeps
//! the directory usable (for this process) when the database cannot be
//! opened. Audit copies of each tool land in `tools_dir`.

pub mod cache;
pub mod files;
pub mod matcher;
pub mod schema;
pub mod store;

pub use cache::ToolCache;
pub use matcher::{KeywordMatcher, ToolMatcher};
pub use store::{ToolStore, Upsert};

use crate::config::SelfToolConfig;
use crate::types::{ToolCategory, ToolSpec};
use async_trait::async_trait;
use similar::TextDiff;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("tool directory unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid tool name: {0:?}")]
    InvalidName(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where a registration landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registration {
    /// Written to the store of record.
    pub stored: bool,
    /// Written to the volatile cache.
    pub cached: bool,
}

/// Lookup/store capability the workflow depends on.
#[async_trait]
pub trait ToolDirectory: Send + Sync {
    /// Find a reusable tool for `text`; `category` is the planner's guess.
    async fn lookup_by_category_keywords(
        &self,
        text: &str,
        category: ToolCategory,
    ) -> Result<Option<ToolSpec>, DirectoryError>;

    /// Upsert keyed on `spec.name`.
    async fn register(&self, spec: &ToolSpec) -> Result<Registration, DirectoryError>;

    /// Write the audit copy and return its path.
    async fn persist_as_file(&self, spec: &ToolSpec) -> Result<PathBuf, DirectoryError>;

    async fn list_names(&self) -> Result<Vec<String>, DirectoryError>;

    async fn get(&self, name: &str) -> Result<Option<ToolSpec>, DirectoryError>;
}

/// SQLite-backed directory with a cache fast path.
pub struct Directory {
    store: Option<Arc<Mutex<ToolStore>>>,
    /// Written only while the store lock is held, so both agree on the last writer.
    cache: Arc<ToolCache>,
    matcher: Box<dyn ToolMatcher>,
    tools_dir: PathBuf,
}

impl Directory {
    fn assemble(store: Option<ToolStore>, tools_dir: PathBuf, cache_ttl: Duration) -> Self {
        Self {
            store: store.map(|s| Arc::new(Mutex::new(s))),
            cache: Arc::new(ToolCache::new(cache_ttl)),
            matcher: Box::new(KeywordMatcher::default()),
            tools_dir,
        }
    }

    /// Open the database at `db_path`; on failure, run cache-only.
    pub fn open(db_path: &Path, tools_dir: PathBuf, cache_ttl: Duration) -> Self {
        let store = match ToolStore::open(db_path) {
            Ok(store) => {
                match store.count() {
                    Ok(n) => info!("Tool directory opened at {} ({} tools)", db_path.display(), n),
                    Err(e) => warn!("Tool directory opened but not readable: {}", e),
                }
                Some(store)
            }
            Err(e) => {
                warn!(
                    "Tool directory database unavailable ({}): {}; tools will only be cached",
                    db_path.display(),
                    e
                );
                None
            }
        };
        Self::assemble(store, tools_dir, cache_ttl)
    }

    pub fn from_config(config: &SelfToolConfig) -> Self {
        Self::open(
            Path::new(&config.resolved_db_path()),
            PathBuf::from(config.resolved_tools_dir()),
            Duration::from_secs(config.cache_ttl_secs),
        )
    }

    /// In-memory SQLite (for tests and dry runs).
    pub fn in_memory(tools_dir: impl Into<PathBuf>) -> Self {
        let store = match ToolStore::open_memory() {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("In-memory tool store unavailable: {}", e);
                None
            }
        };
        Self::assemble(store, tools_dir.into(), Duration::from_secs(3600))
    }

    /// No store of record at all.
    pub fn cache_only(tools_dir: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self::assemble(None, tools_dir.into(), cache_ttl)
    }

    pub fn with_matcher(mut self, matcher: impl ToolMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    /// Stems of the audit files on disk.
    pub async fn audit_files(&self) -> Result<Vec<String>, DirectoryError> {
        files::list(&self.tools_dir).await
    }

    /// Run `f` against the store on the blocking pool. `None` when cache-only.
    async fn with_store<T, F>(&self, f: F) -> Result<Option<T>, DirectoryError>
    where
        F: FnOnce(&ToolStore) -> Result<T, DirectoryError> + Send + 'static,
        T: Send + 'static,
    {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let store = store.clone();
        let out = tokio::task::spawn_blocking(move || {
            let store = store.blocking_lock();
            f(&store)
        })
        .await??;
        Ok(Some(out))
    }
}

fn log_code_change(name: &str, previous: &str, current: &str) {
    let diff = TextDiff::from_lines(previous, current);
    let mut unified = diff.unified_diff();
    unified.context_radius(2).header("previous", "current");
    info!("Tool '{}' re-registered with different code:\n{}", name, unified);
}

#[async_trait]
impl ToolDirectory for Directory {
    async fn lookup_by_category_keywords(
        &self,
        text: &str,
        category: ToolCategory,
    ) -> Result<Option<ToolSpec>, DirectoryError> {
        let Some(category) = self.matcher.category_for(text, category) else {
            debug!("No category keywords in '{}', skipping lookup", text);
            return Ok(None);
        };

        let candidates = match self.with_store(move |s| s.by_category(category)).await? {
            Some(tools) => tools,
            None => self.cache.by_category(category),
        };

        let picked = self.matcher.pick(text, &candidates).cloned();
        if let Some(tool) = &picked {
            debug!("Matched '{}' in category {}", tool.name, category);
        }
        Ok(picked)
    }

    async fn register(&self, spec: &ToolSpec) -> Result<Registration, DirectoryError> {
        if !ToolSpec::is_valid_name(&spec.name) {
            return Err(DirectoryError::InvalidName(spec.name.clone()));
        }
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!("Dropped {} expired cache entries", purged);
        }

        let owned = spec.clone();
        let cache = self.cache.clone();
        let outcome = self
            .with_store(move |s| {
                let upserted = s.upsert(&owned);
                cache.put(owned);
                upserted
            })
            .await?;
        if outcome.is_none() {
            self.cache.put(spec.clone());
        }
        match &outcome {
            Some(Upsert::Replaced { previous_code }) => {
                log_code_change(&spec.name, previous_code, &spec.code)
            }
            Some(_) => info!("Registered tool '{}' v{}", spec.name, spec.version),
            None => info!("Cached tool '{}' (no store of record)", spec.name),
        }

        Ok(Registration {
            stored: outcome.is_some(),
            cached: true,
        })
    }

    async fn persist_as_file(&self, spec: &ToolSpec) -> Result<PathBuf, DirectoryError> {
        files::write(&self.tools_dir, spec).await
    }

    async fn list_names(&self) -> Result<Vec<String>, DirectoryError> {
        match self.with_store(|s| s.names()).await? {
            Some(names) => Ok(names),
            None => Ok(self.cache.names()),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<ToolSpec>, DirectoryError> {
        if let Some(hit) = self.cache.get(name) {
            return Ok(Some(hit));
        }
        let key = name.to_string();
        let cache = self.cache.clone();
        let found = self
            .with_store(move |s| {
                let found = s.get(&key)?;
                if let Some(tool) = &found {
                    cache.put(tool.clone());
                }
                Ok(found)
            })
            .await?
            .flatten();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, description: &str, category: ToolCategory, code: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            parameters: Default::default(),
            return_kind: "string".into(),
            category,
            code: code.into(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn re_registration_is_an_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::in_memory(dir.path());
        let first = spec("get_time", "clock", ToolCategory::Datetime, "fn get_time() { \"1\" }");
        let mut second = first.clone();
        second.code = "fn get_time() { \"2\" }".into();

        let reg = directory.register(&first).await.unwrap();
        assert_eq!(reg, Registration { stored: true, cached: true });
        directory.register(&second).await.unwrap();

        assert_eq!(directory.list_names().await.unwrap(), vec!["get_time"]);
        assert_eq!(directory.get("get_time").await.unwrap().unwrap().code, second.code);
    }

    #[tokio::test]
    async fn lookup_uses_keywords_and_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::in_memory(dir.path());
        directory
            .register(&spec("get_current_time", "current clock time", ToolCategory::Datetime, "fn a() {}"))
            .await
            .unwrap();
        directory
            .register(&spec("add_numbers", "add two numbers", ToolCategory::Math, "fn b() {}"))
            .await
            .unwrap();

        let hit = directory
            .lookup_by_category_keywords("what time is it", ToolCategory::Other)
            .await
            .unwrap();
        assert_eq!(hit.unwrap().name, "get_current_time");

        let none = directory
            .lookup_by_category_keywords("roll two dice", ToolCategory::Math)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn cache_only_directory_still_serves_tools() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::cache_only(dir.path(), Duration::from_secs(60));
        assert!(!directory.is_persistent());

        let reg = directory
            .register(&spec("get_date", "today's date", ToolCategory::Datetime, "fn d() {}"))
            .await
            .unwrap();
        assert_eq!(reg, Registration { stored: false, cached: true });

        let hit = directory
            .lookup_by_category_keywords("what is the date", ToolCategory::Other)
            .await
            .unwrap();
        assert_eq!(hit.unwrap().name, "get_date");
        assert_eq!(directory.list_names().await.unwrap(), vec!["get_date"]);
    }

    #[tokio::test]
    async fn unopenable_database_degrades_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let directory = Directory::open(
            &blocker.join("tools.db"),
            dir.path().join("tools"),
            Duration::from_secs(60),
        );
        assert!(!directory.is_persistent());
        assert!(directory.list_names().await.unwrap().is_empty());
    }

    /// Trusts the planner's category and takes the oldest tool.
    struct DeclaredCategory;

    impl ToolMatcher for DeclaredCategory {
        fn category_for(&self, _query: &str, declared: ToolCategory) -> Option<ToolCategory> {
            Some(declared)
        }

        fn pick<'a>(&self, _query: &str, candidates: &'a [ToolSpec]) -> Option<&'a ToolSpec> {
            candidates.first()
        }
    }

    #[tokio::test]
    async fn matcher_is_replaceable() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::in_memory(dir.path()).with_matcher(DeclaredCategory);
        directory
            .register(&spec("roll_dice", "roll dice", ToolCategory::Math, "fn r() {}"))
            .await
            .unwrap();

        // No keyword in the text, but the declared category is enough here.
        let hit = directory
            .lookup_by_category_keywords("throw the bones", ToolCategory::Math)
            .await
            .unwrap();
        assert_eq!(hit.unwrap().name, "roll_dice");
    }

    #[tokio::test]
    async fn invalid_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::in_memory(dir.path());
        let bad = spec("../escape", "", ToolCategory::Other, "fn x() {}");
        assert!(matches!(
            directory.register(&bad).await,
            Err(DirectoryError::InvalidName(_))
        ));
        assert!(directory.persist_as_file(&bad).await.is_err());
    }

    #[tokio::test]
    async fn persisted_file_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Directory::in_memory(dir.path().join("tools"));
        let tool = spec("greet", "say hi", ToolCategory::Text, "fn greet() { \"hi\" }");
        let path = directory.persist_as_file(&tool).await.unwrap();
        assert!(path.ends_with("greet.rhai"));
        assert_eq!(directory.audit_files().await.unwrap(), vec!["greet"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_leave_one_consistent_tool() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(Directory::open(
            &dir.path().join("tools.db"),
            dir.path().join("tools"),
            Duration::from_secs(60),
        ));
        assert!(directory.is_persistent());

        let bodies: Vec<String> = (0..32).map(|i| format!("fn same() {{ \"{}\" }}", i)).collect();
        let handles: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|code| {
                let directory = directory.clone();
                tokio::spawn(async move {
                    let tool = spec("same", "one name, many writers", ToolCategory::Text, &code);
                    directory.register(&tool).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().stored);
        }

        assert_eq!(directory.list_names().await.unwrap(), vec!["same"]);
        let stored = directory
            .with_store(|s| s.get("same"))
            .await
            .unwrap()
            .flatten()
            .unwrap();
        assert!(bodies.contains(&stored.code));
        // The cache fast path must agree with the store on the last writer.
        assert_eq!(directory.get("same").await.unwrap().unwrap().code, stored.code);
    }
}
