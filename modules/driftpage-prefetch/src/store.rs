//! File-backed store of recently seen structural signatures.
//!
//! One JSON file mapping signature to timestamp, re-read on every query so
//! external processes can share it. Load failures mean an empty store; save
//! failures are logged and swallowed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use driftpage_common::Config;
use driftpage_llm::DedupeStore;
use tracing::{debug, warn};

pub struct SignatureStore {
    path: PathBuf,
    cap: usize,
    enabled: bool,
    write_lock: Mutex<()>,
}

impl SignatureStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize, enabled: bool) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            enabled,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.dedupe_file,
            config.effective_dedupe_max(),
            config.dedupe_enabled,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, f64> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn save(&self, data: &HashMap<String, f64>) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, serde_json::to_string(data).unwrap_or_default())?;
            fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to save signature store");
        }
    }

    pub fn has(&self, sig: &str) -> bool {
        if !self.enabled || sig.is_empty() {
            return false;
        }
        self.load().contains_key(sig)
    }

    pub fn add(&self, sig: &str) {
        if !self.enabled || sig.is_empty() {
            return;
        }
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load();
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        data.insert(sig.to_string(), now);

        if data.len() > self.cap {
            let mut by_age: Vec<(String, f64)> = data
                .iter()
                .filter(|(k, _)| k.as_str() != sig)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            by_age.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let excess = data.len() - self.cap;
            for (key, _) in by_age.into_iter().take(excess) {
                data.remove(&key);
            }
            debug!(evicted = excess, "Signature store trimmed to cap");
        }
        self.save(&data);
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupeStore for SignatureStore {
    fn has(&self, sig: &str) -> bool {
        SignatureStore::has(self, sig)
    }

    fn add(&self, sig: &str) {
        SignatureStore::add(self, sig)
    }
}
