use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PortalError, Result};
use crate::store::{DiskStore, KeyValueStore, MemoryStore};

/// Portal client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Root of the document-evaluation API
    pub api_url: String,
    /// Account the document operations are scoped to
    pub user_id: String,
    /// Directory for the persisted session; in-memory when absent
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    /// Conversation thread used for summary generation and chat
    #[serde(default = "default_thread_id")]
    pub summary_thread_id: String,
    /// Folder whose files are auto-indexed by the testing workflow
    #[serde(default = "default_tests_folder")]
    pub tests_folder: String,
}

fn default_thread_id() -> String {
    "generated-summary-file".to_string()
}

fn default_tests_folder() -> String {
    "Tests".to_string()
}

impl PortalConfig {
    pub fn new(api_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user_id: user_id.into(),
            session_dir: None,
            summary_thread_id: default_thread_id(),
            tests_folder: default_tests_folder(),
        }
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from `DOC_PORTAL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("DOC_PORTAL_API_URL").ok_or_else(|| PortalError::InvalidConfig {
            message: "DOC_PORTAL_API_URL is not set".to_string(),
        })?;
        let user_id = lookup("DOC_PORTAL_USER_ID").unwrap_or_else(|| "user123".to_string());

        let mut config = Self::new(api_url, user_id);
        config.session_dir = lookup("DOC_PORTAL_SESSION_DIR").map(PathBuf::from);
        if let Some(thread) = lookup("DOC_PORTAL_THREAD_ID") {
            config.summary_thread_id = thread;
        }
        if let Some(folder) = lookup("DOC_PORTAL_TESTS_FOLDER") {
            config.tests_folder = folder;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.api_url.trim();
        if url.is_empty() {
            return Err(PortalError::InvalidConfig {
                message: "api_url must not be empty".to_string(),
            });
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PortalError::InvalidConfig {
                message: format!("api_url must be an http(s) URL, got {}", url),
            });
        }
        if self.user_id.trim().is_empty() {
            return Err(PortalError::InvalidConfig {
                message: "user_id must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Open the session store these settings describe
    pub async fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = match &self.session_dir {
            Some(dir) => Arc::new(DiskStore::new(dir.clone()).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
