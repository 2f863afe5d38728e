//! Environment overlay, preload list and the ambient environment snapshot
//!
//! Nothing in here touches the real process environment. The launcher reads
//! from an [`AmbientEnv`] snapshot and writes into an [`EnvironmentOverlay`]
//! that the spawn layer applies to child processes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// jemalloc tuning used with `--benchmark`
pub const JEMALLOC_BENCHMARK_CONF: &str =
    "oversize_threshold:1,background_thread:false,metadata_thp:always,dirty_decay_ms:-1,muzzy_decay_ms:-1";

/// jemalloc tuning for regular runs
pub const JEMALLOC_DEFAULT_CONF: &str = "oversize_threshold:1,background_thread:true,metadata_thp:auto";

/// Intel OpenMP thread placement
pub const KMP_AFFINITY_PRESET: &str = "granularity=fine,compact,1,0";

/// Intel OpenMP spin time before sleeping, in milliseconds
pub const KMP_BLOCKTIME_PRESET: &str = "1";

/// Read-only snapshot of the process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientEnv {
    vars: BTreeMap<String, String>,
}

impl AmbientEnv {
    /// Snapshot the current process environment
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Value of a variable, if set
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Value of a variable, treating unset and empty the same
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }
}

/// An ambient value that won over the launcher's desired value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConflict {
    /// Variable name
    pub name: String,
    /// Value already present in the environment (kept)
    pub ambient: String,
    /// Value the launcher wanted
    pub desired: String,
}

impl EnvConflict {
    /// Message reported to the launcher log
    pub fn message(&self) -> String {
        format!(
            "{} in environment variable is {} while the value you would like to set is {}. Use the existing value.",
            self.name, self.ambient, self.desired
        )
    }
}

/// Variables the launcher wants spawned processes to see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentOverlay {
    vars: BTreeMap<String, String>,
    #[serde(skip)]
    reported: BTreeSet<String>,
}

impl EnvironmentOverlay {
    /// Create an empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name=desired` unless the ambient environment already disagrees
    ///
    /// A non-empty ambient value that differs from `desired` is recorded
    /// instead. The conflict is returned the first time it is seen for a
    /// variable and `None` afterwards, so callers report it once.
    pub fn add(&mut self, ambient: &AmbientEnv, name: &str, desired: &str) -> Option<EnvConflict> {
        match ambient.non_empty(name) {
            Some(current) if current != desired => {
                self.vars.insert(name.to_string(), current.to_string());
                if self.reported.insert(name.to_string()) {
                    Some(EnvConflict {
                        name: name.to_string(),
                        ambient: current.to_string(),
                        desired: desired.to_string(),
                    })
                } else {
                    None
                }
            }
            _ => {
                self.vars.insert(name.to_string(), desired.to_string());
                None
            }
        }
    }

    /// Recorded value for a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Whether a variable has been recorded
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Iterate over recorded assignments in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of recorded assignments
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Consume into a plain map
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.vars
    }
}

/// File name searched for a library token (`jemalloc` -> `libjemalloc.so`)
pub fn library_file_name(token: &str) -> String {
    format!("lib{}.so", token)
}

/// Ordered list of shared libraries to inject through `LD_PRELOAD`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadList {
    entries: Vec<String>,
}

impl PreloadList {
    /// Seed from the ambient `LD_PRELOAD`
    ///
    /// Empty segments are dropped and repeated entries keep their first
    /// position.
    pub fn from_ambient(ambient: &AmbientEnv) -> Self {
        let mut list = Self::default();
        if let Some(spec) = ambient.get("LD_PRELOAD") {
            for entry in spec.split(':').filter(|e| !e.is_empty()) {
                list.push(entry);
            }
        }
        list
    }

    /// Append an entry unless it is already present
    pub fn push(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Whether some entry is `lib<token>.so`
    pub fn contains_library(&self, token: &str) -> bool {
        let file = library_file_name(token);
        self.entries.iter().any(|e| is_library_file(e, &file))
    }

    /// Drop every entry that is `lib<token>.so`
    pub fn remove_library(&mut self, token: &str) {
        let file = library_file_name(token);
        self.entries.retain(|e| !is_library_file(e, &file));
    }

    /// Entries in preload order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Colon-joined preload specification
    pub fn to_spec(&self) -> String {
        self.entries.join(":")
    }
}

fn is_library_file(entry: &str, file: &str) -> bool {
    Path::new(entry)
        .file_name()
        .map(|name| name == file)
        .unwrap_or(false)
}
