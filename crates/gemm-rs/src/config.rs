//! Host runtime configuration.
//!
//! Every environment switch the runtime honours is collected into [`HostConfig`]
//! once per process. Tests and embedders build a config by hand instead and pass it
//! to [`crate::registry::HostRegistry::new`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::env;

/// Install location searched when neither an override nor a binary-relative
/// catalog directory is available.
pub const DEFAULT_INSTALL_DIR: &str = "/opt/rocm/lib/gemm-rs";

/// Base name shared by every catalog file (`GemmLibrary_lazy_gfx90a.dat`, ...).
pub const DEFAULT_CATALOG_NAME: &str = "GemmLibrary";

/// Default number of best-fit results remembered per catalog.
pub const DEFAULT_SOLUTION_CACHE_CAPACITY: usize = 4096;

pub const ENV_LIBPATH: &str = "GEMMRS_LIBPATH";
pub const ENV_OVERRIDE_PATH: &str = "GEMMRS_GEMM_OVERRIDE_PATH";
pub const ENV_FORCE_VALU_FOR_DGEMM: &str = "GEMMRS_FORCE_VALU_FOR_DGEMM";
pub const ENV_FP16_ALT_IMPL: &str = "GEMMRS_FP16_ALT_IMPL";
pub const ENV_FP16_ALT_IMPL_RNZ: &str = "GEMMRS_FP16_ALT_IMPL_RNZ";
pub const ENV_EAGER_KERNEL_LOAD: &str = "GEMMRS_EAGER_KERNEL_LOAD";
pub const ENV_VERBOSE_ERRORS: &str = "GEMMRS_VERBOSE_ERRORS";
pub const ENV_SUPPRESS_ERRORS: &str = "GEMMRS_SUPPRESS_ERRORS";
pub const ENV_CATALOG_PREFERENCE: &str = "GEMMRS_CATALOG_PREFERENCE";
pub const ENV_CATALOG_ENCODING: &str = "GEMMRS_CATALOG_ENCODING";
pub const ENV_BACKGROUND_LOAD: &str = "GEMMRS_BACKGROUND_LOAD";
pub const ENV_SOLUTION_CACHE_CAPACITY: &str = "GEMMRS_SOLUTION_CACHE_CAPACITY";
pub const ENV_FATAL_POLICY: &str = "GEMMRS_FATAL_POLICY";

/// Which architecture-specific catalog file wins when both layouts are installed.
///
/// The generic `<name>.<ext>` file is always the last resort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogPreference {
    /// `<name>_lazy_<arch>`, then `<name>_<arch>`, then `<name>`.
    #[default]
    Lazy,
    /// `<name>_<arch>`, then `<name>_lazy_<arch>`, then `<name>`.
    Eager,
}

impl CatalogPreference {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "lazy" => Some(CatalogPreference::Lazy),
            "eager" => Some(CatalogPreference::Eager),
            _ => None,
        }
    }
}

/// On-disk encoding of catalog files, picked by file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogEncoding {
    /// Compact bincode payload, `.dat`.
    #[default]
    Binary,
    /// Human readable JSON, `.json`.
    Json,
}

impl CatalogEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            CatalogEncoding::Binary => "dat",
            CatalogEncoding::Json => "json",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "dat" => Some(CatalogEncoding::Binary),
            "json" => Some(CatalogEncoding::Json),
            _ => None,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "binary" | "dat" | "bincode" => Some(CatalogEncoding::Binary),
            "json" => Some(CatalogEncoding::Json),
            _ => None,
        }
    }
}

/// What happens when device initialization hits an unrecoverable condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Log the failure and abort the process.
    #[default]
    Abort,
    /// Log the failure and hand it back to the caller.
    Report,
}

impl FatalPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "abort" => Some(FatalPolicy::Abort),
            "report" => Some(FatalPolicy::Report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Explicit catalog directory. Used as-is, no probing.
    pub library_path: Option<PathBuf>,
    /// Problem to solution override file applied to every loaded catalog.
    pub override_path: Option<PathBuf>,
    /// Directory holding the running binary; the first probe base.
    pub binary_dir: Option<PathBuf>,
    /// Hard-coded install location; the probe base when `binary_dir` is unknown.
    pub install_dir: PathBuf,
    pub catalog_name: String,
    /// Force the VALU arithmetic unit for pure double precision problems.
    pub force_valu_for_dgemm: bool,
    /// Process-wide choice of the alternate reduced-precision kernel family.
    /// `None` defers to the per-call flag.
    pub fp16_alt_impl: Option<bool>,
    /// Same as `fp16_alt_impl` for its round-to-nearest-zero variant.
    pub fp16_alt_impl_round: Option<bool>,
    /// Register every kernel binary at init even when a lazy catalog is found.
    pub eager_kernel_load: bool,
    pub verbose_errors: bool,
    pub suppress_errors: bool,
    pub catalog_preference: CatalogPreference,
    pub catalog_encoding: CatalogEncoding,
    /// Parse the catalog on a helper thread while kernel binaries register.
    pub background_load: bool,
    /// Best-fit cache entries per catalog; zero disables the cache.
    pub solution_cache_capacity: usize,
    pub fatal_policy: FatalPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            override_path: None,
            binary_dir: None,
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            catalog_name: DEFAULT_CATALOG_NAME.to_string(),
            force_valu_for_dgemm: false,
            fp16_alt_impl: None,
            fp16_alt_impl_round: None,
            eager_kernel_load: false,
            verbose_errors: false,
            suppress_errors: false,
            catalog_preference: CatalogPreference::default(),
            catalog_encoding: CatalogEncoding::default(),
            background_load: true,
            solution_cache_capacity: DEFAULT_SOLUTION_CACHE_CAPACITY,
            fatal_policy: FatalPolicy::default(),
        }
    }
}

static GLOBAL_CONFIG: OnceLock<HostConfig> = OnceLock::new();

impl HostConfig {
    /// Builds a config from the process environment.
    ///
    /// Unparseable enumerated values fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = HostConfig::default();
        Self {
            library_path: env::path(ENV_LIBPATH),
            override_path: env::path(ENV_OVERRIDE_PATH),
            binary_dir: current_binary_dir(),
            install_dir: defaults.install_dir,
            catalog_name: defaults.catalog_name,
            force_valu_for_dgemm: env::present(ENV_FORCE_VALU_FOR_DGEMM),
            fp16_alt_impl: env::tristate(ENV_FP16_ALT_IMPL),
            fp16_alt_impl_round: env::tristate(ENV_FP16_ALT_IMPL_RNZ),
            eager_kernel_load: env::flag(ENV_EAGER_KERNEL_LOAD),
            verbose_errors: env::present(ENV_VERBOSE_ERRORS),
            suppress_errors: env::flag(ENV_SUPPRESS_ERRORS),
            catalog_preference: parsed_or_default(ENV_CATALOG_PREFERENCE, CatalogPreference::parse),
            catalog_encoding: parsed_or_default(ENV_CATALOG_ENCODING, CatalogEncoding::parse),
            background_load: env::non_empty(ENV_BACKGROUND_LOAD)
                .map(|value| env::parse_bool(&value))
                .unwrap_or(defaults.background_load),
            solution_cache_capacity: env::parse_usize(ENV_SOLUTION_CACHE_CAPACITY)
                .unwrap_or(defaults.solution_cache_capacity),
            fatal_policy: parsed_or_default(ENV_FATAL_POLICY, FatalPolicy::parse),
        }
    }

    /// Process-wide config, read from the environment on first use.
    pub fn global() -> &'static HostConfig {
        GLOBAL_CONFIG.get_or_init(HostConfig::from_env)
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    pub fn with_override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn with_binary_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_dir = Some(path.into());
        self
    }

    pub fn with_install_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_dir = path.into();
        self
    }

    pub fn with_catalog_preference(mut self, preference: CatalogPreference) -> Self {
        self.catalog_preference = preference;
        self
    }

    pub fn with_catalog_encoding(mut self, encoding: CatalogEncoding) -> Self {
        self.catalog_encoding = encoding;
        self
    }

    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    pub fn with_eager_kernel_load(mut self, eager: bool) -> Self {
        self.eager_kernel_load = eager;
        self
    }

    pub fn with_background_load(mut self, background: bool) -> Self {
        self.background_load = background;
        self
    }

    pub fn with_solution_cache_capacity(mut self, capacity: usize) -> Self {
        self.solution_cache_capacity = capacity;
        self
    }

    /// Probe base for binary-relative catalog discovery.
    pub fn search_base(&self) -> &Path {
        self.binary_dir.as_deref().unwrap_or(&self.install_dir)
    }
}

fn parsed_or_default<T: Default>(key: &str, parse: fn(&str) -> Option<T>) -> T {
    match env::non_empty(key) {
        Some(raw) => parse(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "ignoring unrecognized configuration value");
            T::default()
        }),
        None => T::default(),
    }
}

fn current_binary_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}
