use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

/// Element types understood by the contraction kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    /// Signed 8-bit integer.
    #[serde(rename = "i8")]
    Int8,
    /// Signed 32-bit integer.
    #[serde(rename = "i32")]
    Int32,
    /// IEEE 754 half precision.
    #[serde(rename = "h")]
    Half,
    /// Brain floating point, 8-bit exponent and 7-bit mantissa.
    #[serde(rename = "b")]
    BFloat16,
    /// IEEE 754 single precision.
    #[serde(rename = "s")]
    Float,
    /// IEEE 754 double precision.
    #[serde(rename = "d")]
    Double,
    /// Pair of single precision values.
    #[serde(rename = "c")]
    ComplexFloat,
    /// Pair of double precision values.
    #[serde(rename = "z")]
    ComplexDouble,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Int8,
        DataType::Int32,
        DataType::Half,
        DataType::BFloat16,
        DataType::Float,
        DataType::Double,
        DataType::ComplexFloat,
        DataType::ComplexDouble,
    ];

    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Int8 => 1,
            DataType::Half | DataType::BFloat16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Double | DataType::ComplexFloat => 8,
            DataType::ComplexDouble => 16,
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::ComplexFloat | DataType::ComplexDouble)
    }

    /// Short BLAS-style tag: `s` for single, `z` for double complex, ...
    pub fn abbrev(self) -> &'static str {
        match self {
            DataType::Int8 => "i8",
            DataType::Int32 => "i32",
            DataType::Half => "h",
            DataType::BFloat16 => "b",
            DataType::Float => "s",
            DataType::Double => "d",
            DataType::ComplexFloat => "c",
            DataType::ComplexDouble => "z",
        }
    }

    pub fn from_abbrev(tag: &str) -> Option<Self> {
        DataType::ALL.into_iter().find(|ty| ty.abbrev() == tag)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

/// Storage and accumulation types of one contraction.
///
/// A and B share the input type, C and D share the output type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeSignature {
    pub input: DataType,
    pub output: DataType,
    pub compute: DataType,
}

impl TypeSignature {
    pub const fn new(input: DataType, output: DataType, compute: DataType) -> Self {
        Self {
            input,
            output,
            compute,
        }
    }

    /// Signature where every operand and the accumulator share one type.
    pub const fn uniform(ty: DataType) -> Self {
        Self::new(ty, ty, ty)
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_SIGNATURES.contains(self)
    }

    /// High precision accumulation: the accumulator is wider than the inputs.
    pub fn high_precision_accumulate(&self) -> bool {
        self.compute.size_in_bytes() > self.input.size_in_bytes()
    }

    /// Compact tag such as `hss` or `i8i32i32`, used in file names.
    pub fn tag(&self) -> String {
        format!("{}{}{}", self.input, self.output, self.compute)
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Every (input, output, compute) combination the runtime dispatches.
pub const SUPPORTED_SIGNATURES: [TypeSignature; 10] = [
    TypeSignature::uniform(DataType::Half),
    TypeSignature::uniform(DataType::Float),
    TypeSignature::uniform(DataType::Double),
    TypeSignature::uniform(DataType::ComplexFloat),
    TypeSignature::uniform(DataType::ComplexDouble),
    TypeSignature::new(DataType::Half, DataType::Half, DataType::Float),
    TypeSignature::new(DataType::Half, DataType::Float, DataType::Float),
    TypeSignature::new(DataType::BFloat16, DataType::BFloat16, DataType::Float),
    TypeSignature::new(DataType::BFloat16, DataType::Float, DataType::Float),
    TypeSignature::new(DataType::Int8, DataType::Int32, DataType::Int32),
];

/// Operand transformation requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "T")]
    Transpose,
    #[serde(rename = "C")]
    ConjugateTranspose,
}

impl Operation {
    pub fn is_transposed(self) -> bool {
        !matches!(self, Operation::None)
    }

    pub fn as_char(self) -> char {
        match self {
            Operation::None => 'N',
            Operation::Transpose => 'T',
            Operation::ConjugateTranspose => 'C',
        }
    }
}

/// Restriction class of a scalar, used to pick kernels specialised for
/// `alpha == 1`, `beta == 0` and similar cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarClass {
    Zero,
    One,
    NegativeOne,
    #[default]
    Any,
}

impl ScalarClass {
    /// Whether a kernel restricted to `self` accepts a scalar of class `actual`.
    pub fn admits(self, actual: ScalarClass) -> bool {
        self == ScalarClass::Any || self == actual
    }
}

/// Hardware arithmetic unit a kernel is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticUnit {
    #[default]
    Any,
    Mfma,
    Valu,
}

/// Ranking metric used by best-fit selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    #[default]
    Default,
    DeviceEfficiency,
    CuEfficiency,
}

/// Alpha or beta, copied by value in the compute type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int32(i32),
    Half(f16),
    Float(f32),
    Double(f64),
    ComplexFloat { re: f32, im: f32 },
    ComplexDouble { re: f64, im: f64 },
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Half(_) => DataType::Half,
            ScalarValue::Float(_) => DataType::Float,
            ScalarValue::Double(_) => DataType::Double,
            ScalarValue::ComplexFloat { .. } => DataType::ComplexFloat,
            ScalarValue::ComplexDouble { .. } => DataType::ComplexDouble,
        }
    }

    /// Additive identity of `ty`, if `ty` can be a compute type.
    pub fn zero(ty: DataType) -> Option<Self> {
        Self::from_f64(ty, 0.0)
    }

    /// Multiplicative identity of `ty`, if `ty` can be a compute type.
    pub fn one(ty: DataType) -> Option<Self> {
        Self::from_f64(ty, 1.0)
    }

    /// Real value converted to `ty`.
    pub fn from_f64(ty: DataType, value: f64) -> Option<Self> {
        match ty {
            DataType::Int32 => Some(ScalarValue::Int32(value as i32)),
            DataType::Half => Some(ScalarValue::Half(f16::from_f64(value))),
            DataType::Float => Some(ScalarValue::Float(value as f32)),
            DataType::Double => Some(ScalarValue::Double(value)),
            DataType::ComplexFloat => Some(ScalarValue::ComplexFloat {
                re: value as f32,
                im: 0.0,
            }),
            DataType::ComplexDouble => Some(ScalarValue::ComplexDouble { re: value, im: 0.0 }),
            DataType::Int8 | DataType::BFloat16 => None,
        }
    }

    fn parts(&self) -> (f64, f64) {
        match *self {
            ScalarValue::Int32(v) => (f64::from(v), 0.0),
            ScalarValue::Half(v) => (v.to_f64(), 0.0),
            ScalarValue::Float(v) => (f64::from(v), 0.0),
            ScalarValue::Double(v) => (v, 0.0),
            ScalarValue::ComplexFloat { re, im } => (f64::from(re), f64::from(im)),
            ScalarValue::ComplexDouble { re, im } => (re, im),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.parts() == (0.0, 0.0)
    }

    pub fn class(&self) -> ScalarClass {
        match self.parts() {
            (re, im) if re == 0.0 && im == 0.0 => ScalarClass::Zero,
            (re, im) if re == 1.0 && im == 0.0 => ScalarClass::One,
            (re, im) if re == -1.0 && im == 0.0 => ScalarClass::NegativeOne,
            _ => ScalarClass::Any,
        }
    }

    /// Little-endian bytes as the kernel argument block expects them.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            ScalarValue::Int32(v) => v.to_le_bytes().to_vec(),
            ScalarValue::Half(v) => v.to_le_bytes().to_vec(),
            ScalarValue::Float(v) => v.to_le_bytes().to_vec(),
            ScalarValue::Double(v) => v.to_le_bytes().to_vec(),
            ScalarValue::ComplexFloat { re, im } => {
                let mut bytes = re.to_le_bytes().to_vec();
                bytes.extend_from_slice(&im.to_le_bytes());
                bytes
            }
            ScalarValue::ComplexDouble { re, im } => {
                let mut bytes = re.to_le_bytes().to_vec();
                bytes.extend_from_slice(&im.to_le_bytes());
                bytes
            }
        }
    }

    /// Alignment of the scalar inside the kernel argument block.
    pub fn alignment(&self) -> usize {
        match self {
            ScalarValue::ComplexFloat { .. } => 4,
            ScalarValue::ComplexDouble { .. } => 8,
            other => other.data_type().size_in_bytes(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parts() {
            (re, im) if self.data_type().is_complex() => write!(f, "({re}, {im})"),
            (re, _) => write!(f, "{re}"),
        }
    }
}
