//! Process-wide served-pages counter, persisted as a single JSON file.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterState {
    #[serde(default)]
    total: u64,
}

pub struct ServedCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ServedCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> CounterState {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => CounterState::default(),
        }
    }

    fn write(&self, state: &CounterState) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, serde_json::to_string(state).unwrap_or_default())?;
            fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to persist counter");
        }
    }

    pub fn total(&self) -> u64 {
        let _guard = self.lock.lock().unwrap();
        self.read().total
    }

    pub fn increment(&self, n: u64) -> u64 {
        if n == 0 {
            return self.total();
        }
        let _guard = self.lock.lock().unwrap();
        let mut state = self.read();
        state.total += n;
        self.write(&state);
        state.total
    }
}
