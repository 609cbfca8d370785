//! Finding catalog files and kernel binaries on disk.
//!
//! Directory resolution, in order:
//! 1. `library_path` from the config, used as-is;
//! 2. otherwise a base directory (the running binary's directory, or the install
//!    directory when that is unknown) probed for `../../gemm-catalog/library`,
//!    then `library`, falling back to `gemm-rs/library`;
//! 3. an `<arch>` subdirectory of the result is used when it exists.
//!
//! File names inside that directory are tried in [`CatalogPreference`] order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::{CatalogPreference, HostConfig};
use crate::device::XnackMode;
use crate::error::CatalogError;

/// Catalog file chosen for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLocation {
    /// Directory holding the catalog and its kernel binaries.
    pub directory: PathBuf,
    pub file: PathBuf,
    /// Found under the lazy naming scheme; kernel binaries load on demand.
    pub lazy: bool,
}

pub fn library_directory(config: &HostConfig, arch: &str) -> PathBuf {
    if let Some(path) = &config.library_path {
        return path.clone();
    }

    let base = config.search_base();
    let mut dir = [base.join("../../gemm-catalog/library"), base.join("library")]
        .into_iter()
        .find(|candidate| is_readable(candidate))
        .unwrap_or_else(|| base.join("gemm-rs/library"));

    let arch_dir = dir.join(arch);
    if is_readable(&arch_dir) {
        dir = arch_dir;
    }
    dir
}

/// Candidate catalog files in probe order, each tagged with whether it uses the
/// lazy naming scheme.
pub fn candidate_files(dir: &Path, config: &HostConfig, arch: &str) -> Vec<(PathBuf, bool)> {
    let name = &config.catalog_name;
    let ext = config.catalog_encoding.extension();
    let lazy = (dir.join(format!("{name}_lazy_{arch}.{ext}")), true);
    let specific = (dir.join(format!("{name}_{arch}.{ext}")), false);
    let generic = (dir.join(format!("{name}.{ext}")), false);
    match config.catalog_preference {
        CatalogPreference::Lazy => vec![lazy, specific, generic],
        CatalogPreference::Eager => vec![specific, lazy, generic],
    }
}

pub fn locate_catalog(config: &HostConfig, arch: &str) -> Result<CatalogLocation, CatalogError> {
    let directory = library_directory(config, arch);
    let candidates = candidate_files(&directory, config, arch);
    for (file, lazy) in &candidates {
        if file.is_file() && is_readable(file) {
            tracing::debug!(catalog = %file.display(), lazy, "located catalog");
            return Ok(CatalogLocation {
                directory: directory.clone(),
                file: file.clone(),
                lazy: *lazy,
            });
        }
    }

    let tried = candidates
        .iter()
        .map(|(file, _)| file.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let available = available_catalogs(&directory, config);
    Err(CatalogError::NotFound {
        arch: arch.to_string(),
        dir: directory,
        tried,
        available: if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        },
    })
}

/// Catalog files present in `dir` for any architecture, for error reports.
pub fn available_catalogs(dir: &Path, config: &HostConfig) -> Vec<String> {
    let pattern = format!(
        r"^{}(_lazy)?_[A-Za-z0-9]+\.{}$",
        regex::escape(&config.catalog_name),
        config.catalog_encoding.extension()
    );
    let Ok(matcher) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| matcher.is_match(name))
        .collect();
    names.sort();
    names
}

/// Kernel binaries in `dir` built for `arch`: file names containing the
/// architecture and ending in `co`.
///
/// Binaries tagged for the opposite xnack mode and experimental binaries are
/// skipped. The result is sorted.
pub fn discover_code_objects(dir: &Path, arch: &str, xnack: XnackMode) -> io::Result<Vec<PathBuf>> {
    let matcher = Regex::new(&format!(r"^.*{}.*co$", regex::escape(arch)))
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let skip = xnack.opposite_tag();

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !matcher.is_match(file_name) {
            continue;
        }
        let full = path.to_string_lossy();
        if skip.is_some_and(|tag| full.contains(tag)) {
            continue;
        }
        if full.contains("Experimental") {
            continue;
        }
        found.push(path);
    }
    found.sort();
    Ok(found)
}

fn is_readable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path).is_ok(),
        Ok(_) => fs::File::open(path).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"").expect("write file");
    }

    #[test]
    fn explicit_library_path_is_used_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("gfx90a").join("placeholder"));
        let config = HostConfig::default().with_library_path(dir.path());
        // No arch subdirectory probing for an explicit path.
        assert_eq!(library_directory(&config, "gfx90a"), dir.path());
    }

    #[test]
    fn binary_relative_probing_prefers_sibling_tree_then_library() {
        let root = tempfile::tempdir().expect("tempdir");
        let bin = root.path().join("opt/pkg/bin");
        fs::create_dir_all(&bin).expect("bin dir");
        let config = HostConfig::default().with_binary_dir(&bin);

        assert_eq!(
            library_directory(&config, "gfx90a"),
            bin.join("gemm-rs/library")
        );

        fs::create_dir_all(bin.join("library")).expect("library dir");
        assert_eq!(library_directory(&config, "gfx90a"), bin.join("library"));

        fs::create_dir_all(bin.join("library/gfx90a")).expect("arch dir");
        assert_eq!(
            library_directory(&config, "gfx90a"),
            bin.join("library/gfx90a")
        );

        let sibling = bin.join("../../gemm-catalog/library");
        fs::create_dir_all(&sibling).expect("sibling dir");
        assert_eq!(library_directory(&config, "gfx942"), sibling);
    }

    #[test]
    fn lazy_catalog_wins_under_default_preference() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("GemmLibrary_gfx90a.dat"));
        touch(&dir.path().join("GemmLibrary_lazy_gfx90a.dat"));
        let config = HostConfig::default().with_library_path(dir.path());

        let found = locate_catalog(&config, "gfx90a").expect("catalog present");
        assert!(found.lazy);
        assert!(found.file.ends_with("GemmLibrary_lazy_gfx90a.dat"));

        let eager = config.with_catalog_preference(CatalogPreference::Eager);
        let found = locate_catalog(&eager, "gfx90a").expect("catalog present");
        assert!(!found.lazy);
        assert!(found.file.ends_with("GemmLibrary_gfx90a.dat"));
    }

    #[test]
    fn generic_catalog_is_the_last_resort() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("GemmLibrary.dat"));
        let config = HostConfig::default().with_library_path(dir.path());
        let found = locate_catalog(&config, "gfx1100").expect("generic catalog");
        assert!(found.file.ends_with("GemmLibrary.dat"));
        assert!(!found.lazy);
    }

    #[test]
    fn missing_catalog_lists_what_is_available() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("GemmLibrary_gfx908.dat"));
        touch(&dir.path().join("notes.txt"));
        let config = HostConfig::default().with_library_path(dir.path());
        let err = locate_catalog(&config, "gfx90a").expect_err("no gfx90a catalog");
        match err {
            CatalogError::NotFound { available, .. } => {
                assert_eq!(available, "GemmLibrary_gfx908.dat");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn code_objects_skip_opposite_xnack_and_experimental() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "Kernels_gfx90a.co",
            "Kernels_gfx90a-xnack+.co",
            "Kernels_gfx90a-xnack-.co",
            "Experimental_gfx90a.co",
            "Kernels_gfx908.co",
            "Kernels_gfx90a.hsaco",
        ] {
            touch(&dir.path().join(name));
        }
        let found = discover_code_objects(dir.path(), "gfx90a", XnackMode::Disabled)
            .expect("scan directory");
        let names: Vec<_> = found
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(
            names,
            vec!["Kernels_gfx90a-xnack-.co", "Kernels_gfx90a.co", "Kernels_gfx90a.hsaco"]
        );
    }
}
