use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use lru::LruCache;

use crate::device::Hardware;
use crate::error::CatalogError;
use crate::problem::{Operation, ProblemDescriptor, ProblemKey, TypeSignature};

use super::format::{sibling_path, CatalogFile, OverrideFile, PlaceholderRecord};
use super::solution::CatalogSolution;
use super::{Solution, SolutionLibrary};

type BestFit = Option<(Arc<CatalogSolution>, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OverrideKey {
    types: TypeSignature,
    trans_a: Operation,
    trans_b: Operation,
    m: usize,
    n: usize,
    k: usize,
    batch: usize,
}

impl OverrideKey {
    fn of(key: &ProblemKey) -> Self {
        Self {
            types: key.types,
            trans_a: key.trans_a,
            trans_b: key.trans_b,
            m: key.m,
            n: key.n,
            k: key.k,
            batch: key.batch,
        }
    }
}

struct PlaceholderGroup {
    record: PlaceholderRecord,
    path: PathBuf,
    loaded: OnceLock<Result<Vec<Arc<CatalogSolution>>, String>>,
}

impl PlaceholderGroup {
    fn matches(&self, key: &ProblemKey) -> bool {
        self.record.types == key.types
            && self.record.trans_a == key.trans_a
            && self.record.trans_b == key.trans_b
    }
}

/// Counters describing how much of a catalog has been touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub groups_total: usize,
    pub groups_loaded: usize,
    pub solutions_loaded: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Solution library read from a catalog file.
///
/// Solutions listed in the file are available immediately. Placeholder groups of
/// a lazy catalog are read the first time a problem of their type is searched,
/// or all at once through [`SolutionCatalog::preload_all`]; until then their
/// solutions are invisible to [`SolutionLibrary::solution_by_index`].
pub struct SolutionCatalog {
    architecture: String,
    source: PathBuf,
    resident: Vec<Arc<CatalogSolution>>,
    groups: Vec<PlaceholderGroup>,
    by_index: RwLock<BTreeMap<i32, Arc<CatalogSolution>>>,
    overrides: RwLock<HashMap<OverrideKey, i32>>,
    best_fit: Option<Mutex<LruCache<(ProblemKey, Hardware), BestFit>>>,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

impl SolutionCatalog {
    pub fn load(path: &Path, cache_capacity: usize) -> Result<Self, CatalogError> {
        let file = CatalogFile::load(path)?;
        Ok(Self::from_file(file, path.to_path_buf(), cache_capacity))
    }

    pub fn from_file(file: CatalogFile, source: PathBuf, cache_capacity: usize) -> Self {
        let resident: Vec<Arc<CatalogSolution>> = file
            .solutions
            .into_iter()
            .map(|record| Arc::new(CatalogSolution::new(record)))
            .collect();
        let by_index = resident
            .iter()
            .map(|solution| (solution.index(), Arc::clone(solution)))
            .collect();
        let groups = file
            .placeholders
            .into_iter()
            .map(|record| PlaceholderGroup {
                path: sibling_path(&source, &record.group),
                record,
                loaded: OnceLock::new(),
            })
            .collect();
        let best_fit =
            NonZeroUsize::new(cache_capacity).map(|capacity| Mutex::new(LruCache::new(capacity)));

        Self {
            architecture: file.architecture,
            source,
            resident,
            groups,
            by_index: RwLock::new(by_index),
            overrides: RwLock::new(HashMap::new()),
            best_fit,
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_lazy(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Reads every placeholder group now. Returns the number of loaded solutions.
    pub fn preload_all(&self) -> usize {
        for group in &self.groups {
            self.materialize(group);
        }
        self.loaded_solution_count()
    }

    pub fn loaded_solution_count(&self) -> usize {
        self.by_index.read().expect("catalog index poisoned").len()
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            groups_total: self.groups.len(),
            groups_loaded: self
                .groups
                .iter()
                .filter(|group| group.loaded.get().is_some())
                .count(),
            solutions_loaded: self.loaded_solution_count(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Installs problem overrides from a JSON override file.
    ///
    /// Returns how many entries were accepted; entries with a non-positive
    /// solution index are dropped.
    pub fn set_overrides_from_file(&self, path: &Path) -> Result<OverrideSummary, CatalogError> {
        let file = OverrideFile::load(path)?;
        let mut summary = OverrideSummary::default();
        let mut overrides = self.overrides.write().expect("catalog overrides poisoned");
        for entry in file.overrides {
            if entry.solution <= 0 {
                summary.rejected += 1;
                continue;
            }
            let key = OverrideKey {
                types: entry.types,
                trans_a: entry.trans_a,
                trans_b: entry.trans_b,
                m: entry.m,
                n: entry.n,
                k: entry.k,
                batch: entry.batch,
            };
            overrides.insert(key, entry.solution);
            summary.applied += 1;
        }
        drop(overrides);
        if let Some(cache) = &self.best_fit {
            cache.lock().expect("best-fit cache poisoned").clear();
        }
        Ok(summary)
    }

    fn materialize(&self, group: &PlaceholderGroup) -> Vec<Arc<CatalogSolution>> {
        let loaded = group.loaded.get_or_init(|| {
            let file = CatalogFile::load(&group.path).map_err(|err| {
                tracing::error!(group = %group.record.group, error = %err, "failed to load solution group");
                err.to_string()
            })?;
            let solutions: Vec<Arc<CatalogSolution>> = file
                .solutions
                .into_iter()
                .map(|record| Arc::new(CatalogSolution::new(record)))
                .collect();
            let mut index = self.by_index.write().expect("catalog index poisoned");
            for solution in &solutions {
                if index.contains_key(&solution.index()) {
                    tracing::warn!(
                        group = %group.record.group,
                        index = solution.index(),
                        "solution index already defined; keeping the first definition"
                    );
                    continue;
                }
                index.insert(solution.index(), Arc::clone(solution));
            }
            tracing::debug!(
                group = %group.record.group,
                solutions = solutions.len(),
                "materialized solution group"
            );
            Ok(solutions)
        });
        match loaded {
            Ok(solutions) => solutions.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Solutions of the key's type, in index order, loading groups as needed.
    fn candidates(&self, key: &ProblemKey) -> Vec<Arc<CatalogSolution>> {
        let mut out: Vec<Arc<CatalogSolution>> = self
            .resident
            .iter()
            .filter(|solution| solution.matches_key_type(key))
            .cloned()
            .collect();
        for group in self.groups.iter().filter(|group| group.matches(key)) {
            out.extend(self.materialize(group));
        }
        out.sort_by_key(|solution| solution.index());
        out.dedup_by_key(|solution| solution.index());
        out
    }

    fn overridden(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> BestFit {
        let key = problem.key();
        let index = *self
            .overrides
            .read()
            .expect("catalog overrides poisoned")
            .get(&OverrideKey::of(key))?;
        let solution = self
            .candidates(key)
            .into_iter()
            .find(|solution| solution.index() == index - 1)?;
        if !solution.can_solve(problem, hardware) {
            tracing::debug!(index, "override cannot solve problem; using best fit");
            return None;
        }
        let score = solution.predicted_performance(problem, hardware);
        Some((solution, score))
    }

    fn best_fit(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> BestFit {
        if let Some(found) = self.overridden(problem, hardware) {
            return Some(found);
        }

        let cache_key = (problem.key().clone(), hardware.clone());
        if let Some(cache) = &self.best_fit {
            if let Some(hit) = cache
                .lock()
                .expect("best-fit cache poisoned")
                .get(&cache_key)
                .cloned()
            {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return hit;
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let mut best: BestFit = None;
        for solution in self.candidates(problem.key()) {
            if !solution.can_solve(problem, hardware) {
                continue;
            }
            let score = solution.predicted_performance(problem, hardware);
            // Candidates arrive in index order, so ties keep the lowest index.
            if best.as_ref().map_or(true, |(_, top)| score > *top) {
                best = Some((solution, score));
            }
        }

        if let Some(cache) = &self.best_fit {
            cache
                .lock()
                .expect("best-fit cache poisoned")
                .put(cache_key, best.clone());
        }
        best
    }
}

/// Outcome of [`SolutionCatalog::set_overrides_from_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideSummary {
    pub applied: usize,
    pub rejected: usize,
}

impl SolutionLibrary for SolutionCatalog {
    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn solution_by_index(&self, index: i32) -> Option<Arc<dyn Solution>> {
        let found = self
            .by_index
            .read()
            .expect("catalog index poisoned")
            .get(&index)
            .cloned()?;
        Some(found as Arc<dyn Solution>)
    }

    fn find_best_solution(
        &self,
        problem: &ProblemDescriptor,
        hardware: &Hardware,
        fitness: Option<&mut f64>,
    ) -> Option<Arc<dyn Solution>> {
        let (solution, score) = self.best_fit(problem, hardware)?;
        if let Some(slot) = fitness {
            *slot = score;
        }
        Some(solution as Arc<dyn Solution>)
    }

    fn find_all_solutions(
        &self,
        problem: &ProblemDescriptor,
        hardware: &Hardware,
    ) -> Vec<Arc<dyn Solution>> {
        self.candidates(problem.key())
            .into_iter()
            .filter(|solution| solution.can_solve(problem, hardware))
            .map(|solution| solution as Arc<dyn Solution>)
            .collect()
    }

    fn find_all_solutions_matching_type(
        &self,
        problem: &ProblemDescriptor,
        _hardware: &Hardware,
    ) -> Vec<Arc<dyn Solution>> {
        self.candidates(problem.key())
            .into_iter()
            .map(|solution| solution as Arc<dyn Solution>)
            .collect()
    }
}
