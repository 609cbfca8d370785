use std::fmt;

use super::types::{Operation, ScalarValue, TypeSignature};

/// Raw device address. Zero is the null pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: u64) -> DevicePtr {
        DevicePtr(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Layout of one matrix operand as handed over by the calling routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandArgs {
    pub ptr: DevicePtr,
    pub row_stride: usize,
    pub col_stride: usize,
    pub batch_stride: usize,
    /// Element offset applied to `ptr` before the kernel reads the operand.
    pub offset: usize,
}

impl OperandArgs {
    /// Column-major operand with leading dimension `ld`.
    pub fn column_major(ptr: DevicePtr, ld: usize, batch_stride: usize) -> Self {
        Self {
            ptr,
            row_stride: 1,
            col_stride: ld,
            batch_stride,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Per-call behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GemmFlags {
    /// Rank solutions by per-CU efficiency instead of the handle's metric.
    pub use_cu_efficiency: bool,
    /// Prefer the alternate reduced-precision kernel family.
    pub fp16_alt_impl: bool,
    /// Round-to-nearest-zero variant of the alternate family.
    pub fp16_alt_impl_rnz: bool,
    /// Resolve and validate the selected solution without launching it.
    pub check_solution_index: bool,
}

/// Raw description of one contraction, before normalization.
///
/// Wrapper routines fill this in; [`super::ProblemDescriptor::new`] turns it into
/// the immutable form used for solution lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractionArgs {
    pub types: TypeSignature,
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batch_count: usize,
    pub strided_batch: bool,
    pub alpha: ScalarValue,
    pub beta: ScalarValue,
    pub a: OperandArgs,
    pub b: OperandArgs,
    pub c: OperandArgs,
    pub d: OperandArgs,
    pub flags: GemmFlags,
}

impl ContractionArgs {
    /// Single, in-place GEMM `D = C = alpha * op(A) * op(B) + beta * C` with
    /// packed column-major operands, `alpha = 1` and `beta = 0`.
    ///
    /// Returns `None` when the compute type cannot carry scalars.
    pub fn gemm(
        types: TypeSignature,
        trans_a: Operation,
        trans_b: Operation,
        m: usize,
        n: usize,
        k: usize,
    ) -> Option<Self> {
        let alpha = ScalarValue::one(types.compute)?;
        let beta = ScalarValue::zero(types.compute)?;
        let (a_rows, b_rows) = (
            if trans_a.is_transposed() { k } else { m },
            if trans_b.is_transposed() { n } else { k },
        );
        let a_cols = if trans_a.is_transposed() { m } else { k };
        let b_cols = if trans_b.is_transposed() { k } else { n };
        let c = OperandArgs::column_major(DevicePtr::NULL, m.max(1), m * n);
        Some(Self {
            types,
            trans_a,
            trans_b,
            m,
            n,
            k,
            batch_count: 1,
            strided_batch: true,
            alpha,
            beta,
            a: OperandArgs::column_major(DevicePtr::NULL, a_rows.max(1), a_rows * a_cols),
            b: OperandArgs::column_major(DevicePtr::NULL, b_rows.max(1), b_rows * b_cols),
            c,
            d: c,
            flags: GemmFlags::default(),
        })
    }

    pub fn with_alpha(mut self, alpha: ScalarValue) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_beta(mut self, beta: ScalarValue) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_batch(mut self, batch_count: usize, strided_batch: bool) -> Self {
        self.batch_count = batch_count;
        self.strided_batch = strided_batch;
        self
    }

    pub fn with_pointers(mut self, a: DevicePtr, b: DevicePtr, c: DevicePtr, d: DevicePtr) -> Self {
        self.a.ptr = a;
        self.b.ptr = b;
        self.c.ptr = c;
        self.d.ptr = d;
        self
    }

    /// Writes the result into a separate D operand with the layout of C.
    pub fn out_of_place(mut self, d: DevicePtr) -> Self {
        self.d = OperandArgs { ptr: d, ..self.c };
        self
    }

    pub fn with_flags(mut self, flags: GemmFlags) -> Self {
        self.flags = flags;
        self
    }
}
