//! Library and tool resolution
//!
//! A [`LibraryCategory`] describes one choice the launcher has to make
//! (memory allocator, OpenMP runtime, multi-task manager): the legal names in
//! priority order, how each name is found on the machine, and what to tell
//! the user when it is not. [`Resolver`] reconciles the user's request with
//! what is actually installed and never fails; the worst outcome is the
//! category's default choice.

use super::env::{library_file_name, PreloadList};
use super::logging::{LaunchLogger, LogLevel};
use crate::error::{LaunchError, Result};
use std::path::{Path, PathBuf};

/// The sentinel asking the resolver to pick the best available candidate
pub const AUTO: &str = "auto";

/// How a candidate's search token is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Search the library paths for `lib<token>.so` and queue it for preload
    Preload,
    /// Search `PATH` for an executable named `<token>`
    Executable,
}

/// Search token and installation hint for one concrete candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Name of the candidate as accepted on the command line
    pub name: &'static str,
    /// Token used to locate it (`iomp5` for `libiomp5.so`)
    pub token: &'static str,
    /// Installation command shown when it is missing, may be empty
    pub install_hint: &'static str,
}

/// Immutable description of one resolvable category
#[derive(Debug, Clone)]
pub struct LibraryCategory {
    label: &'static str,
    preferences: Vec<&'static str>,
    names: Vec<NameEntry>,
    strategy: ProbeStrategy,
    fallback_hint: &'static str,
}

impl LibraryCategory {
    /// Build a category
    ///
    /// `preferences[0]` must be `auto`, `preferences[1]` is the default
    /// choice and every later entry needs a matching [`NameEntry`].
    pub fn new(
        label: &'static str,
        preferences: Vec<&'static str>,
        names: Vec<NameEntry>,
        strategy: ProbeStrategy,
        fallback_hint: &'static str,
    ) -> Result<Self> {
        let invalid = |reason: String| LaunchError::InvalidPreferenceList {
            category: label.to_string(),
            reason,
        };

        if preferences.len() < 2 {
            return Err(invalid(format!(
                "expected at least 'auto' and a default choice, got {:?}",
                preferences
            )));
        }
        if preferences[0] != AUTO {
            return Err(invalid(format!("first entry must be '{}', got '{}'", AUTO, preferences[0])));
        }
        if let Some(name) = preferences.iter().find(|p| p.to_lowercase() != **p) {
            return Err(invalid(format!("'{}' must be lower case", name)));
        }
        if let Some(missing) = preferences[2..]
            .iter()
            .find(|p| !names.iter().any(|n| n.name == **p))
        {
            return Err(invalid(format!("no search token for '{}'", missing)));
        }

        Ok(Self {
            label,
            preferences,
            names,
            strategy,
            fallback_hint,
        })
    }

    /// Memory allocators injected through `LD_PRELOAD`
    pub fn memory_allocator() -> Self {
        Self {
            label: "memory allocator",
            preferences: vec![AUTO, "default", "tcmalloc", "jemalloc"],
            names: vec![
                NameEntry {
                    name: "jemalloc",
                    token: "jemalloc",
                    install_hint: "conda install -c conda-forge jemalloc",
                },
                NameEntry {
                    name: "tcmalloc",
                    token: "tcmalloc",
                    install_hint: "conda install -c conda-forge gperftools",
                },
            ],
            strategy: ProbeStrategy::Preload,
            fallback_hint: "This may drop the performance.",
        }
    }

    /// OpenMP runtimes injected through `LD_PRELOAD`
    pub fn omp_runtime() -> Self {
        Self {
            label: "OpenMP runtime",
            preferences: vec![AUTO, "default", "intel"],
            names: vec![NameEntry {
                name: "intel",
                token: "iomp5",
                install_hint: "conda install intel-openmp",
            }],
            strategy: ProbeStrategy::Preload,
            fallback_hint: "",
        }
    }

    /// External tools that apply CPU and memory binding to an instance
    pub fn task_manager() -> Self {
        Self {
            label: "multi-task manager",
            preferences: vec![AUTO, "none", "numactl", "taskset"],
            names: vec![
                NameEntry {
                    name: "numactl",
                    token: "numactl",
                    install_hint: "conda install numactl",
                },
                NameEntry {
                    name: "taskset",
                    token: "taskset",
                    install_hint: "conda install util-linux",
                },
            ],
            strategy: ProbeStrategy::Executable,
            fallback_hint: "",
        }
    }

    /// Human-readable label used in messages
    pub fn label(&self) -> &str {
        self.label
    }

    /// All legal names, `auto` first
    pub fn preferences(&self) -> &[&'static str] {
        &self.preferences
    }

    /// The choice used when nothing better is available
    pub fn default_choice(&self) -> &'static str {
        self.preferences[1]
    }

    /// Concrete candidates in descending priority
    pub fn candidates(&self) -> &[&'static str] {
        &self.preferences[2..]
    }

    /// How candidates are looked up
    pub fn strategy(&self) -> ProbeStrategy {
        self.strategy
    }

    /// Lookup entry for a concrete candidate
    pub fn entry(&self, name: &str) -> Option<&NameEntry> {
        self.names.iter().find(|n| n.name == name)
    }

    /// Every lookup entry of this category
    pub fn entries(&self) -> &[NameEntry] {
        &self.names
    }

    fn is_supported(&self, name: &str) -> bool {
        self.preferences.iter().any(|p| *p == name)
    }
}

/// Ordered library search directories
///
/// Active conda and virtualenv prefixes come first, then the user's local
/// lib directory, then the usual system locations.
pub fn default_library_paths(
    conda_prefix: Option<&str>,
    virtual_env: Option<&str>,
    home: Option<&str>,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(prefix) = conda_prefix {
        paths.push(Path::new(prefix).join("lib"));
    }
    if let Some(prefix) = virtual_env {
        paths.push(Path::new(prefix).join("lib"));
    }
    if let Some(home) = home {
        paths.push(Path::new(home).join(".local").join("lib"));
    }
    paths.extend(
        [
            "/usr/local/lib",
            "/usr/local/lib64",
            "/usr/lib",
            "/usr/lib64",
            "/usr/lib/x86_64-linux-gnu",
        ]
        .iter()
        .map(PathBuf::from),
    );
    paths
}

/// Resolves categories against the machine, borrowing launcher state
pub struct Resolver<'a> {
    preload: &'a mut PreloadList,
    library_paths: &'a [PathBuf],
    search_path: Option<&'a str>,
    logger: &'a dyn LaunchLogger,
}

impl<'a> Resolver<'a> {
    /// Create a resolver
    ///
    /// `search_path` is the `PATH` value used for executable lookups.
    pub fn new(
        preload: &'a mut PreloadList,
        library_paths: &'a [PathBuf],
        search_path: Option<&'a str>,
        logger: &'a dyn LaunchLogger,
    ) -> Self {
        Self {
            preload,
            library_paths,
            search_path,
            logger,
        }
    }

    /// Pick the active candidate of `category` for a user request
    ///
    /// The request is matched case-insensitively. Unknown and excluded names
    /// are treated as `auto`. The result is always the default choice or a
    /// candidate that was found, never `auto`.
    pub fn resolve(&mut self, requested: &str, category: &LibraryCategory, exclusions: &[&str]) -> String {
        let label = category.label();
        let supported = category.preferences();
        let mut name = requested.to_lowercase();

        if !category.is_supported(&name) {
            name = AUTO.to_string();
            self.log(
                LogLevel::Warning,
                format!(
                    "Designated {} '{}' is unknown. Changing it to '{}'. Supported {} are {:?}.",
                    label, requested, name, label, supported
                ),
            );
        }
        if exclusions.iter().any(|e| *e == name) {
            name = AUTO.to_string();
            self.log(
                LogLevel::Warning,
                format!(
                    "Designated {} '{}' is not applicable at this moment. Changing it to '{}'. Please choose another {} from {:?}.",
                    label, requested, name, label, supported
                ),
            );
        }

        let resolved = if name == AUTO {
            self.resolve_auto(category, exclusions)
        } else if category.candidates().iter().any(|c| *c == name) {
            self.resolve_explicit(category, &name)
        } else {
            self.log(LogLevel::Info, format!("Use '{}' {}.", name, label));
            name
        };

        if category.strategy() == ProbeStrategy::Preload {
            for entry in category.entries().iter().filter(|e| e.name != resolved) {
                self.preload.remove_library(entry.token);
            }
        }

        resolved
    }

    fn resolve_auto(&mut self, category: &LibraryCategory, exclusions: &[&str]) -> String {
        let label = category.label();
        for &candidate in category.candidates() {
            if exclusions.iter().any(|e| *e == candidate) {
                continue;
            }
            let found = category
                .entry(candidate)
                .map(|entry| self.probe(category.strategy(), entry.token))
                .unwrap_or(false);
            if found {
                self.log(LogLevel::Info, format!("Use '{}' => '{}' {}.", AUTO, candidate, label));
                return candidate.to_string();
            }
        }

        let candidates = category.candidates();
        if !candidates.is_empty() {
            let msg = match candidates.len() {
                1 => format!("'{}' {} is not found", candidates[0], label),
                2 => format!("Neither of {:?} {} is found", candidates, label),
                _ => format!("None of {:?} {} is found", candidates, label),
            };
            self.log(LogLevel::Warning, format!("{} in {}.", msg, self.search_location(category)));
        }
        self.use_default(category)
    }

    fn resolve_explicit(&mut self, category: &LibraryCategory, name: &str) -> String {
        let label = category.label();
        let Some(entry) = category.entry(name) else {
            return self.use_default(category);
        };

        if self.probe(category.strategy(), entry.token) {
            self.log(LogLevel::Info, format!("Use '{}' {}.", name, label));
            return name.to_string();
        }

        let guide = if entry.install_hint.is_empty() {
            String::new()
        } else {
            format!(" You can install it with \"{}\".", entry.install_hint)
        };
        self.log(
            LogLevel::Warning,
            format!(
                "Unable to find the '{}' {} file in {}.{}",
                name,
                label,
                self.search_location(category),
                guide
            ),
        );
        self.use_default(category)
    }

    fn use_default(&mut self, category: &LibraryCategory) -> String {
        let default = category.default_choice();
        let hint = if category.fallback_hint.is_empty() {
            String::new()
        } else {
            format!(" {}", category.fallback_hint)
        };
        self.log(LogLevel::Info, format!("Use '{}' {}.{}", default, category.label(), hint));
        default.to_string()
    }

    fn probe(&mut self, strategy: ProbeStrategy, token: &str) -> bool {
        match strategy {
            ProbeStrategy::Preload => self.add_lib_preload(token),
            ProbeStrategy::Executable => self.find_executable(token).is_some(),
        }
    }

    /// Make sure `lib<token>.so` is preloaded
    ///
    /// Returns `true` if it was already in the preload list or was found in
    /// one of the library paths (and appended).
    pub fn add_lib_preload(&mut self, token: &str) -> bool {
        if self.preload.contains_library(token) {
            return true;
        }

        let file = library_file_name(token);
        match self.library_paths.iter().map(|dir| dir.join(&file)).find(|p| p.is_file()) {
            Some(path) => {
                self.preload.push(path.to_string_lossy().into_owned());
                true
            }
            None => false,
        }
    }

    /// Locate an executable on the configured `PATH`
    pub fn find_executable(&self, token: &str) -> Option<PathBuf> {
        let paths = self.search_path?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(token, Some(paths), cwd).ok()
    }

    fn search_location(&self, category: &LibraryCategory) -> String {
        match category.strategy() {
            ProbeStrategy::Preload => format!("{:?}", self.library_paths),
            ProbeStrategy::Executable => format!("PATH ({})", self.search_path.unwrap_or("")),
        }
    }

    fn log(&self, level: LogLevel, msg: String) {
        self.logger.log(level, &msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::logging::testing::RecordingLogger;
    use std::fs;
    use tempfile::TempDir;

    fn lib_dir_with(libs: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for lib in libs {
            fs::write(dir.path().join(library_file_name(lib)), b"").unwrap();
        }
        dir
    }

    fn resolve(
        preload: &mut PreloadList,
        paths: &[PathBuf],
        logger: &RecordingLogger,
        requested: &str,
        category: &LibraryCategory,
        exclusions: &[&str],
    ) -> String {
        Resolver::new(preload, paths, None, logger).resolve(requested, category, exclusions)
    }

    #[test]
    fn test_category_validation() {
        let short = LibraryCategory::new("x", vec![AUTO], vec![], ProbeStrategy::Preload, "");
        assert!(matches!(short, Err(LaunchError::InvalidPreferenceList { .. })));

        let no_token = LibraryCategory::new("x", vec![AUTO, "default", "foo"], vec![], ProbeStrategy::Preload, "");
        assert!(no_token.is_err());

        let ok = LibraryCategory::new("x", vec![AUTO, "default"], vec![], ProbeStrategy::Preload, "").unwrap();
        assert!(ok.candidates().is_empty());
        assert_eq!(ok.default_choice(), "default");
    }

    #[test]
    fn test_auto_picks_first_available_in_priority_order() {
        let dir = lib_dir_with(&["tcmalloc", "jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "auto", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "tcmalloc");
        assert_eq!(preload.len(), 1);
        assert!(preload.contains_library("tcmalloc"));
        assert!(logger.infos().iter().any(|m| m.contains("'auto' => 'tcmalloc'")));
    }

    #[test]
    fn test_auto_with_three_missing_candidates() {
        let category = LibraryCategory::new(
            "BLAS library",
            vec![AUTO, "default", "mkl", "openblas", "blis"],
            vec![
                NameEntry { name: "mkl", token: "mkl_rt", install_hint: "" },
                NameEntry { name: "openblas", token: "openblas", install_hint: "" },
                NameEntry { name: "blis", token: "blis", install_hint: "" },
            ],
            ProbeStrategy::Preload,
            "",
        )
        .unwrap();
        let dir = lib_dir_with(&[]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "auto", &category, &[]);
        assert_eq!(chosen, "default");
        assert!(preload.is_empty());

        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("None of [\"mkl\", \"openblas\", \"blis\"] BLAS library is found"));
    }

    #[test]
    fn test_auto_respects_exclusions() {
        let dir = lib_dir_with(&["tcmalloc", "jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(
            &mut preload,
            &paths,
            &logger,
            "auto",
            &LibraryCategory::memory_allocator(),
            &["tcmalloc"],
        );
        assert_eq!(chosen, "jemalloc");
    }

    #[test]
    fn test_excluded_explicit_request_falls_back_to_auto_policy() {
        let dir = lib_dir_with(&["tcmalloc", "jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(
            &mut preload,
            &paths,
            &logger,
            "jemalloc",
            &LibraryCategory::memory_allocator(),
            &["jemalloc"],
        );
        assert_eq!(chosen, "tcmalloc");
        assert!(logger.warnings()[0].contains("not applicable"));
    }

    #[test]
    fn test_auto_without_candidates_installed() {
        let dir = lib_dir_with(&[]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "auto", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "default");
        assert!(preload.is_empty());
        assert!(logger.warnings()[0].starts_with("Neither of"));
        assert!(logger.infos().iter().any(|m| m.contains("This may drop the performance.")));

        let omp = resolve(&mut preload, &paths, &logger, "auto", &LibraryCategory::omp_runtime(), &[]);
        assert_eq!(omp, "default");
        assert!(logger.warnings()[1].starts_with("'intel' OpenMP runtime is not found"));
    }

    #[test]
    fn test_explicit_missing_candidate_reports_install_hint() {
        let dir = lib_dir_with(&["tcmalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "jemalloc", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "default");
        assert!(preload.is_empty());
        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("conda install -c conda-forge jemalloc"));
    }

    #[test]
    fn test_request_is_case_insensitive() {
        let dir = lib_dir_with(&["jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let category = LibraryCategory::memory_allocator();

        let mut lower = PreloadList::default();
        let mut mixed = PreloadList::default();
        let logger = RecordingLogger::default();
        let a = resolve(&mut lower, &paths, &logger, "jemalloc", &category, &[]);
        let b = resolve(&mut mixed, &paths, &logger, "Jemalloc", &category, &[]);
        assert_eq!(a, b);
        assert_eq!(lower, mixed);
        assert!(logger.warnings().is_empty());
    }

    #[test]
    fn test_unknown_request_behaves_like_auto() {
        let dir = lib_dir_with(&["jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let category = LibraryCategory::memory_allocator();

        let mut auto_preload = PreloadList::default();
        let auto_logger = RecordingLogger::default();
        let auto = resolve(&mut auto_preload, &paths, &auto_logger, "auto", &category, &[]);

        let mut unknown_preload = PreloadList::default();
        let unknown_logger = RecordingLogger::default();
        let unknown = resolve(&mut unknown_preload, &paths, &unknown_logger, "foobar", &category, &[]);

        assert_eq!(auto, unknown);
        assert_eq!(auto_preload, unknown_preload);
        let warnings = unknown_logger.warnings();
        assert_eq!(warnings.len(), auto_logger.warnings().len() + 1);
        assert!(warnings[0].contains("'foobar' is unknown"));
    }

    #[test]
    fn test_default_request_does_not_probe() {
        let dir = lib_dir_with(&["jemalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "default", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "default");
        assert!(preload.is_empty());
    }

    #[test]
    fn test_ambient_preload_satisfies_probe_without_search() {
        let mut preload = PreloadList::default();
        preload.push("/somewhere/else/libjemalloc.so");
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &[], &logger, "jemalloc", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "jemalloc");
        assert_eq!(preload.entries(), &["/somewhere/else/libjemalloc.so".to_string()]);
    }

    #[test]
    fn test_competing_preloads_are_removed() {
        let dir = lib_dir_with(&["tcmalloc"]);
        let paths = vec![dir.path().to_path_buf()];
        let mut preload = PreloadList::default();
        preload.push("/ambient/libjemalloc.so");
        preload.push("/ambient/libiomp5.so");
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &paths, &logger, "tcmalloc", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "tcmalloc");
        assert!(!preload.contains_library("jemalloc"));
        assert!(preload.contains_library("tcmalloc"));
        // Other categories are untouched
        assert!(preload.contains_library("iomp5"));

        let allocator_entries = preload
            .entries()
            .iter()
            .filter(|e| e.ends_with("libtcmalloc.so") || e.ends_with("libjemalloc.so"))
            .count();
        assert_eq!(allocator_entries, 1);
    }

    #[test]
    fn test_default_choice_clears_category_preloads() {
        let mut preload = PreloadList::default();
        preload.push("/ambient/libjemalloc.so");
        let logger = RecordingLogger::default();

        let chosen = resolve(&mut preload, &[], &logger, "default", &LibraryCategory::memory_allocator(), &[]);
        assert_eq!(chosen, "default");
        assert!(preload.is_empty());
    }

    #[test]
    fn test_search_order_prefers_earlier_directories() {
        let first = lib_dir_with(&["iomp5"]);
        let second = lib_dir_with(&["iomp5"]);
        let paths = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();

        resolve(&mut preload, &paths, &logger, "intel", &LibraryCategory::omp_runtime(), &[]);
        assert_eq!(
            preload.entries(),
            &[first.path().join("libiomp5.so").to_string_lossy().into_owned()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_probe_uses_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let bin = TempDir::new().unwrap();
        let taskset = bin.path().join("taskset");
        fs::write(&taskset, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&taskset, fs::Permissions::from_mode(0o755)).unwrap();

        let search_path = bin.path().to_string_lossy().into_owned();
        let mut preload = PreloadList::default();
        let logger = RecordingLogger::default();
        let mut resolver = Resolver::new(&mut preload, &[], Some(&search_path), &logger);

        let chosen = resolver.resolve("auto", &LibraryCategory::task_manager(), &[]);
        assert_eq!(chosen, "taskset");
        assert!(preload.is_empty());
    }

    #[test]
    fn test_default_library_paths_order() {
        let paths = default_library_paths(Some("/conda"), Some("/venv"), Some("/home/u"));
        assert_eq!(paths[0], PathBuf::from("/conda/lib"));
        assert_eq!(paths[1], PathBuf::from("/venv/lib"));
        assert_eq!(paths[2], PathBuf::from("/home/u/.local/lib"));
        assert_eq!(paths.last().unwrap(), &PathBuf::from("/usr/lib/x86_64-linux-gnu"));
        assert_eq!(default_library_paths(None, None, None).len(), 5);
    }
}
