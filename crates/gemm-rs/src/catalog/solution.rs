use std::fmt;

use crate::device::{Hardware, KernelArgs, KernelInvocation};
use crate::handle::round_up_workspace;
use crate::problem::{
    ArithmeticUnit, DevicePtr, PerformanceMetric, ProblemDescriptor, ProblemKey,
    TensorDescriptor,
};

use super::format::{PerformancePoint, SolutionRecord};
use super::{ContractionInputs, Solution};

/// A solution backed by a persisted [`SolutionRecord`].
pub struct CatalogSolution {
    record: SolutionRecord,
}

impl CatalogSolution {
    pub fn new(record: SolutionRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &SolutionRecord {
        &self.record
    }

    pub(crate) fn matches_key_type(&self, key: &ProblemKey) -> bool {
        self.record.types == key.types
            && self.record.trans_a == key.trans_a
            && self.record.trans_b == key.trans_b
    }

    fn satisfies_predicates(&self, key: &ProblemKey, hardware: &Hardware) -> bool {
        let p = &self.record.predicates;
        p.m.contains(key.m)
            && p.n.contains(key.n)
            && p.k.contains(key.k)
            && p.batch.contains(key.batch)
            && divisible(key.m, p.m_multiple)
            && divisible(key.n, p.n_multiple)
            && divisible(key.k, p.k_multiple)
            && (!key.deterministic || p.deterministic)
            && p.strided_batched.map_or(true, |v| v == key.strided_batched)
            && p.c_equals_d.map_or(true, |v| v == key.c_equals_d)
            && p.alpha.admits(key.alpha)
            && p.beta.admits(key.beta)
            && p
                .high_precision_accumulate
                .map_or(true, |v| v == key.high_precision_accumulate)
            && (key.arithmetic_unit == ArithmeticUnit::Any
                || p.arithmetic_unit == key.arithmetic_unit)
            && p.fp16_alt_impl.map_or(true, |v| v == key.fp16_alt_impl)
            && p
                .fp16_alt_impl_round
                .map_or(true, |v| v == key.fp16_alt_impl_round)
            && p
                .architecture
                .as_deref()
                .map_or(true, |arch| arch == hardware.architecture)
            && hardware.compute_units >= p.min_compute_units
    }

    fn nearest_point(&self, key: &ProblemKey) -> Option<&PerformancePoint> {
        self.record.performance.iter().min_by(|lhs, rhs| {
            log_distance(lhs, key)
                .partial_cmp(&log_distance(rhs, key))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    fn tile_counts(&self, key: &ProblemKey) -> [u32; 3] {
        let [tile_m, tile_n] = self.record.launch.macro_tile;
        [
            tiles(key.m, tile_m),
            tiles(key.n, tile_n),
            u32::try_from(key.batch.max(1)).unwrap_or(u32::MAX),
        ]
    }

    fn global_split_u(&self) -> u32 {
        self.record.workspace.global_split_u.max(1)
    }
}

impl fmt::Debug for CatalogSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogSolution")
            .field("index", &self.record.index)
            .field("name", &self.record.name)
            .finish()
    }
}

impl Solution for CatalogSolution {
    fn index(&self) -> i32 {
        self.record.index
    }

    fn name(&self) -> &str {
        &self.record.name
    }

    fn matches_type(&self, problem: &ProblemDescriptor) -> bool {
        self.matches_key_type(problem.key())
    }

    fn can_solve(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> bool {
        self.matches_type(problem)
            && self.satisfies_predicates(problem.key(), hardware)
            && round_up_workspace(self.required_workspace_size(problem))
                .is_some_and(|bytes| bytes <= problem.workspace_limit())
    }

    fn required_workspace_size(&self, problem: &ProblemDescriptor) -> usize {
        let key = problem.key();
        let gsu = self.global_split_u();
        let partials = if gsu > 1 {
            key.m
                .saturating_mul(key.n)
                .saturating_mul(key.batch)
                .saturating_mul(key.types.compute.size_in_bytes())
                .saturating_mul(gsu as usize)
        } else {
            0
        };
        partials.saturating_add(self.record.workspace.fixed_bytes)
    }

    fn predicted_performance(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> f64 {
        let key = problem.key();
        let Some(point) = self.nearest_point(key) else {
            return 0.0;
        };
        let base = match key.performance_metric {
            PerformanceMetric::CuEfficiency => point.cu_gflops.unwrap_or_else(|| {
                point.device_gflops / f64::from(hardware.compute_units.max(1))
            }),
            PerformanceMetric::Default | PerformanceMetric::DeviceEfficiency => {
                point.device_gflops
            }
        };
        let [tile_m, tile_n] = self.record.launch.macro_tile;
        base * tile_utilization(key.m, tile_m) * tile_utilization(key.n, tile_n)
    }

    fn solve(
        &self,
        problem: &ProblemDescriptor,
        inputs: &ContractionInputs,
        _hardware: &Hardware,
    ) -> Vec<KernelInvocation> {
        let key = problem.key();
        let mut args = KernelArgs::new();
        args.push_ptr("d", element_ptr(problem.d()));
        args.push_ptr("c", element_ptr(problem.c()));
        args.push_ptr("a", element_ptr(problem.a()));
        args.push_ptr("b", element_ptr(problem.b()));
        args.push_ptr("workspace", inputs.workspace);
        let alpha = problem.alpha();
        args.push_bytes("alpha", &alpha.to_le_bytes(), alpha.alignment());
        let beta = problem.beta();
        args.push_bytes("beta", &beta.to_le_bytes(), beta.alignment());
        for (col, batch, tensor) in [
            ("stride_d", "batch_stride_d", problem.d()),
            ("stride_c", "batch_stride_c", problem.c()),
            ("stride_a", "batch_stride_a", problem.a()),
            ("stride_b", "batch_stride_b", problem.b()),
        ] {
            args.push_u64(col, tensor.strides[1] as u64);
            args.push_u64(batch, tensor.strides[2] as u64);
        }
        args.push_u32("size_m", saturating_u32(key.m));
        args.push_u32("size_n", saturating_u32(key.n));
        args.push_u32("size_batch", saturating_u32(key.batch));
        args.push_u32("size_k", saturating_u32(key.k));

        let launch = &self.record.launch;
        let gsu = self.global_split_u();
        let [tiles_m, tiles_n, batch] = self.tile_counts(key);
        let mut kernels = vec![KernelInvocation {
            kernel_name: self.record.kernel.clone(),
            code_object: self.record.code_object.clone(),
            grid: [tiles_m.saturating_mul(gsu), tiles_n, batch],
            workgroup: launch.workgroup,
            shared_mem_bytes: launch.lds_bytes,
            args: args.clone(),
        }];
        if gsu > 1 {
            // Partial sums land in workspace; a second pass reduces them into D.
            kernels.push(KernelInvocation {
                kernel_name: format!("{}_PostGSU{gsu}", self.record.kernel),
                code_object: self.record.code_object.clone(),
                grid: [tiles_m, tiles_n, batch],
                workgroup: [256, 1, 1],
                shared_mem_bytes: 0,
                args,
            });
        }
        kernels
    }
}

fn divisible(value: usize, multiple: usize) -> bool {
    multiple <= 1 || value % multiple == 0
}

fn tiles(size: usize, tile: u32) -> u32 {
    let tile = tile.max(1) as usize;
    u32::try_from(size.div_ceil(tile).max(1)).unwrap_or(u32::MAX)
}

fn tile_utilization(size: usize, tile: u32) -> f64 {
    if size == 0 || tile == 0 {
        return 1.0;
    }
    let padded = size.div_ceil(tile as usize) * tile as usize;
    size as f64 / padded as f64
}

fn log_distance(point: &PerformancePoint, key: &ProblemKey) -> f64 {
    [
        (point.m, key.m),
        (point.n, key.n),
        (point.k, key.k),
        (point.batch, key.batch),
    ]
    .into_iter()
    .map(|(lhs, rhs)| {
        let delta = (lhs as f64).ln_1p() - (rhs as f64).ln_1p();
        delta * delta
    })
    .sum()
}

fn element_ptr(tensor: &TensorDescriptor) -> DevicePtr {
    let bytes = tensor.offset.saturating_mul(tensor.data_type.size_in_bytes());
    tensor.ptr.offset(bytes as u64)
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
