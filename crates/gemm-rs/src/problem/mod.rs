//! Canonical description of a contraction problem.
//!
//! [`ContractionArgs`] is the raw, caller-facing form. [`ProblemDescriptor::new`]
//! validates it, normalizes the degenerate `K == 0` / `alpha == 0` case, attaches
//! the handle state that takes part in selection and produces an immutable
//! descriptor together with its [`ProblemKey`].

mod args;
mod types;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

pub use args::{ContractionArgs, DevicePtr, GemmFlags, OperandArgs};
pub use types::{
    ArithmeticUnit, DataType, Operation, PerformanceMetric, ScalarClass, ScalarValue,
    TypeSignature, SUPPORTED_SIGNATURES,
};

use crate::config::HostConfig;
use crate::error::ProblemError;

/// Handle state that takes part in solution selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProblemContext {
    /// Only solutions with a reproducible reduction order are eligible.
    pub deterministic: bool,
    pub performance_metric: PerformanceMetric,
    /// Largest workspace a solution may ask for, in bytes.
    pub workspace_limit: usize,
}

impl Default for ProblemContext {
    fn default() -> Self {
        Self {
            deterministic: false,
            performance_metric: PerformanceMetric::Default,
            workspace_limit: usize::MAX,
        }
    }
}

/// Shape, strides and element type of one tensor operand.
///
/// Sizes and strides are `[rows, cols, batch]` in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub data_type: DataType,
    pub sizes: [usize; 3],
    pub strides: [usize; 3],
    pub offset: usize,
    pub ptr: DevicePtr,
    /// Elements are conjugated as they are read.
    pub conjugate: bool,
}

impl TensorDescriptor {
    fn new(data_type: DataType, sizes: [usize; 3], operand: &OperandArgs) -> Self {
        Self {
            data_type,
            sizes,
            strides: [operand.row_stride, operand.col_stride, operand.batch_stride],
            offset: operand.offset,
            ptr: operand.ptr,
            conjugate: false,
        }
    }

    pub fn total_logical_elements(&self) -> usize {
        self.sizes.iter().product()
    }
}

/// Free index: appears in exactly one of A and B and in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeIndex {
    pub is_a: bool,
    /// Position in the input operand.
    pub i: usize,
    pub c: usize,
    pub d: usize,
}

/// Index shared by every operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchIndex {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

/// Contracted (summation) index, present in A and B only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundIndex {
    pub a: usize,
    pub b: usize,
}

/// Everything best-fit selection depends on.
///
/// Pointers, offsets and exact scalar values are left out so that two calls that
/// differ only in data share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProblemKey {
    pub types: TypeSignature,
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batch: usize,
    /// `[col, batch]` strides of A, B, C and D. A and B are zeroed when `k == 0`
    /// since neither operand is read.
    pub strides: [[usize; 2]; 4],
    pub alpha: ScalarClass,
    pub beta: ScalarClass,
    pub high_precision_accumulate: bool,
    pub strided_batched: bool,
    pub c_equals_d: bool,
    pub deterministic: bool,
    pub arithmetic_unit: ArithmeticUnit,
    pub performance_metric: PerformanceMetric,
    pub fp16_alt_impl: bool,
    pub fp16_alt_impl_round: bool,
    pub workspace_limit: usize,
}

impl ProblemKey {
    /// 64-bit digest of the key. Only comparable within one process: the
    /// hasher may change between Rust releases.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Immutable, validated contraction problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemDescriptor {
    key: ProblemKey,
    requested_k: usize,
    alpha: ScalarValue,
    beta: ScalarValue,
    a: TensorDescriptor,
    b: TensorDescriptor,
    c: TensorDescriptor,
    d: TensorDescriptor,
    free_indices: [FreeIndex; 2],
    batch_index: BatchIndex,
    bound_index: BoundIndex,
}

impl ProblemDescriptor {
    pub fn new(
        args: &ContractionArgs,
        context: &ProblemContext,
        config: &HostConfig,
    ) -> Result<Self, ProblemError> {
        let types = args.types;
        if !types.is_supported() {
            return Err(ProblemError::UnsupportedTypes {
                input: types.input,
                output: types.output,
                compute: types.compute,
            });
        }
        for (name, scalar) in [("alpha", &args.alpha), ("beta", &args.beta)] {
            if scalar.data_type() != types.compute {
                return Err(ProblemError::ScalarType {
                    name,
                    found: scalar.data_type(),
                    expected: types.compute,
                });
            }
        }

        // Conjugation only means something for complex inputs; real operands
        // treat a conjugate transpose as a plain transpose.
        let trans_a = real_transpose(args.trans_a, types.input);
        let trans_b = real_transpose(args.trans_b, types.input);

        // A zero alpha makes the product term vanish, which is the same problem
        // as an empty summation.
        let k = if args.k != 0 && !args.alpha.is_zero() {
            args.k
        } else {
            0
        };
        let alpha = if k != 0 {
            args.alpha
        } else {
            ScalarValue::zero(types.compute).unwrap_or(args.alpha)
        };
        let batch = args.batch_count;

        let a_sizes = if trans_a.is_transposed() {
            [k, args.m, batch]
        } else {
            [args.m, k, batch]
        };
        let b_sizes = if trans_b.is_transposed() {
            [args.n, k, batch]
        } else {
            [k, args.n, batch]
        };
        let mut a = TensorDescriptor::new(types.input, a_sizes, &args.a);
        let mut b = TensorDescriptor::new(types.input, b_sizes, &args.b);
        a.conjugate = trans_a == Operation::ConjugateTranspose;
        b.conjugate = trans_b == Operation::ConjugateTranspose;
        let c = TensorDescriptor::new(types.output, [args.m, args.n, batch], &args.c);
        let d = TensorDescriptor::new(types.output, [args.m, args.n, batch], &args.d);

        let free_indices = [
            FreeIndex {
                is_a: true,
                i: usize::from(trans_a.is_transposed()),
                c: 0,
                d: 0,
            },
            FreeIndex {
                is_a: false,
                i: usize::from(!trans_b.is_transposed()),
                c: 1,
                d: 1,
            },
        ];
        let batch_index = BatchIndex {
            a: 2,
            b: 2,
            c: 2,
            d: 2,
        };
        let bound_index = BoundIndex {
            a: usize::from(!trans_a.is_transposed()),
            b: usize::from(trans_b.is_transposed()),
        };

        let arithmetic_unit =
            if config.force_valu_for_dgemm && types == TypeSignature::uniform(DataType::Double) {
                ArithmeticUnit::Valu
            } else {
                ArithmeticUnit::Any
            };
        let performance_metric = if args.flags.use_cu_efficiency {
            PerformanceMetric::CuEfficiency
        } else {
            context.performance_metric
        };

        let operand_strides = |t: &TensorDescriptor, read: bool| {
            if read {
                [t.strides[1], t.strides[2]]
            } else {
                [0, 0]
            }
        };
        let key = ProblemKey {
            types,
            trans_a,
            trans_b,
            m: args.m,
            n: args.n,
            k,
            batch,
            strides: [
                operand_strides(&a, k != 0),
                operand_strides(&b, k != 0),
                operand_strides(&c, true),
                operand_strides(&d, true),
            ],
            alpha: alpha.class(),
            beta: args.beta.class(),
            high_precision_accumulate: types.high_precision_accumulate(),
            strided_batched: args.strided_batch,
            c_equals_d: args.c.ptr == args.d.ptr,
            deterministic: context.deterministic,
            arithmetic_unit,
            performance_metric,
            fp16_alt_impl: config.fp16_alt_impl.unwrap_or(args.flags.fp16_alt_impl),
            fp16_alt_impl_round: config
                .fp16_alt_impl_round
                .unwrap_or(args.flags.fp16_alt_impl_rnz),
            workspace_limit: context.workspace_limit,
        };

        Ok(Self {
            key,
            requested_k: args.k,
            alpha,
            beta: args.beta,
            a,
            b,
            c,
            d,
            free_indices,
            batch_index,
            bound_index,
        })
    }

    pub fn key(&self) -> &ProblemKey {
        &self.key
    }

    pub fn types(&self) -> TypeSignature {
        self.key.types
    }

    pub fn m(&self) -> usize {
        self.key.m
    }

    pub fn n(&self) -> usize {
        self.key.n
    }

    /// Effective summation length; zero when alpha is zero.
    pub fn k(&self) -> usize {
        self.key.k
    }

    /// K as the caller passed it.
    pub fn requested_k(&self) -> usize {
        self.requested_k
    }

    pub fn batch_count(&self) -> usize {
        self.key.batch
    }

    pub fn alpha(&self) -> ScalarValue {
        self.alpha
    }

    pub fn beta(&self) -> ScalarValue {
        self.beta
    }

    pub fn a(&self) -> &TensorDescriptor {
        &self.a
    }

    pub fn b(&self) -> &TensorDescriptor {
        &self.b
    }

    pub fn c(&self) -> &TensorDescriptor {
        &self.c
    }

    pub fn d(&self) -> &TensorDescriptor {
        &self.d
    }

    pub fn free_indices(&self) -> &[FreeIndex; 2] {
        &self.free_indices
    }

    pub fn batch_index(&self) -> BatchIndex {
        self.batch_index
    }

    pub fn bound_index(&self) -> BoundIndex {
        self.bound_index
    }

    pub fn workspace_limit(&self) -> usize {
        self.key.workspace_limit
    }

    pub fn is_deterministic(&self) -> bool {
        self.key.deterministic
    }
}

fn real_transpose(op: Operation, input: DataType) -> Operation {
    if op == Operation::ConjugateTranspose && !input.is_complex() {
        Operation::Transpose
    } else {
        op
    }
}

impl fmt::Display for ProblemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = &self.key;
        write!(
            f,
            "{{ types: {}, transA: {}, transB: {}, M: {}, N: {}, K: {}, batch: {}, \
             alpha: {}, beta: {}, lda: {}, ldb: {}, ldc: {}, ldd: {}, \
             strided_batched: {}, c_equals_d: {}, deterministic: {} }}",
            key.types,
            key.trans_a.as_char(),
            key.trans_b.as_char(),
            key.m,
            key.n,
            key.k,
            key.batch,
            self.alpha,
            self.beta,
            self.a.strides[1],
            self.b.strides[1],
            self.c.strides[1],
            self.d.strides[1],
            key.strided_batched,
            key.c_equals_d,
            key.deterministic,
        )
    }
}
