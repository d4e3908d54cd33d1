use smallvec::SmallVec;

use super::context::InstId;

/// A single operand attached to an instruction: either a reference to
/// another (result-producing) instruction, or an immediate scalar.
///
/// This is the Rust shape of `shader::Operand`'s
/// `variant<nullptr_t, ValueImpl*, int64_t, int32_t, double, float, bool,
/// string>` — the `ValueImpl*` case becomes `Operand::Value(InstId)` now
/// that values and instructions share one arena.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Null,
    Value(InstId),
    Int64(i64),
    Int32(i32),
    Float64(f64),
    Float32(f32),
    Bool(bool),
    String(String),
}

impl Operand {
    pub fn is_null(&self) -> bool {
        matches!(self, Operand::Null)
    }

    pub fn as_value(&self) -> Option<InstId> {
        match self {
            Operand::Value(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Operand::Int64(v) => Some(v),
            Operand::Int32(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Operand::Float64(v) => Some(v),
            Operand::Float32(v) => Some(v as f64),
            _ => None,
        }
    }
}

impl From<InstId> for Operand {
    fn from(id: InstId) -> Self {
        Operand::Value(id)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Int32(v)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Int64(v)
    }
}

impl From<f32> for Operand {
    fn from(v: f32) -> Self {
        Operand::Float32(v)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Float64(v)
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Bool(v)
    }
}

/// A total order over `Operand`, used by the evaluator's constant-folding
/// lookup tables and by instruction deduplication (common-subexpression
/// elimination keys on an instruction's opcode + operand list).
///
/// Float comparisons are bit-pattern based so `NaN` sorts and
/// deduplicates consistently instead of comparing unequal to itself.
impl Eq for Operand {}

impl PartialOrd for Operand {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Operand {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(op: &Operand) -> u8 {
            match op {
                Operand::Null => 0,
                Operand::Value(_) => 1,
                Operand::Int64(_) => 2,
                Operand::Int32(_) => 3,
                Operand::Float64(_) => 4,
                Operand::Float32(_) => 5,
                Operand::Bool(_) => 6,
                Operand::String(_) => 7,
            }
        }
        use std::cmp::Ordering;
        match (self, other) {
            (Operand::Null, Operand::Null) => Ordering::Equal,
            (Operand::Value(a), Operand::Value(b)) => a.cmp(b),
            (Operand::Int64(a), Operand::Int64(b)) => a.cmp(b),
            (Operand::Int32(a), Operand::Int32(b)) => a.cmp(b),
            (Operand::Float64(a), Operand::Float64(b)) => a.to_bits().cmp(&b.to_bits()),
            (Operand::Float32(a), Operand::Float32(b)) => a.to_bits().cmp(&b.to_bits()),
            (Operand::Bool(a), Operand::Bool(b)) => a.cmp(b),
            (Operand::String(a), Operand::String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// Inline-first operand storage: most GCN instructions carry 0-4 operands.
pub type OperandList = SmallVec<[Operand; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_compares_stably() {
        let a = Operand::Float32(f32::NAN);
        let b = Operand::Float32(f32::NAN);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn widening_accessors() {
        assert_eq!(Operand::Int32(7).as_i64(), Some(7));
        assert_eq!(Operand::Float32(1.5).as_f64(), Some(1.5));
    }
}
