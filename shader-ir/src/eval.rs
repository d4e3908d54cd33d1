//! Constant folding over scalar and small-vector values.
//!
//! Grounded on `original_source/.../gcn-shader/src/eval.cpp`'s `eval::Value`,
//! a variant holding every scalar/vector/array shape the IR's constant
//! operands can take. The C++ original dispatches through a compile-time
//! `visit` over a `std::variant` of ~60 alternatives; here the alternatives
//! are a plain Rust enum and dispatch is a `match`. The evaluator never
//! panics: an operation applied to a combination of shapes it doesn't
//! support returns `Value::Null`, which callers read as "not a constant".

use gpu_types::{BVec2, BVec3, BVec4, F32Vec2, F32Vec3, F32Vec4, I32Vec2, I32Vec3, I32Vec4};

use crate::dialect::builtin;
use crate::ir::Operand;

/// A folded constant. Mirrors `eval::Value::Storage`, narrowed to the shapes
/// actually produced by `builtin` dialect constant ops: scalar bool/i32/f32
/// and their 2/3/4-lane vectors, plus fixed-size dword arrays for the
/// composite constants the translator builds for user-SGPR tables.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    F32(f32),
    BVec2(BVec2),
    BVec3(BVec3),
    BVec4(BVec4),
    IVec2(I32Vec2),
    IVec3(I32Vec3),
    IVec4(I32Vec4),
    FVec2(F32Vec2),
    FVec3(F32Vec3),
    FVec4(F32Vec4),
    /// A fixed 8- or 16-dword array, the two sizes the translator needs for
    /// user-SGPR and extended-user-data tables.
    Array8([i32; 8]),
    Array16([i32; 16]),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Widens any scalar integer to `u64`, matching `zExtScalar`.
    pub fn zext_scalar(&self) -> Option<u64> {
        match *self {
            Value::I32(v) => Some(v as u32 as u64),
            _ => None,
        }
    }

    /// Widens any scalar integer to `i64` with sign extension, matching
    /// `sExtScalar`.
    pub fn sext_scalar(&self) -> Option<i64> {
        match *self {
            Value::I32(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn from_operand(operand: &Operand) -> Value {
        match operand {
            Operand::Bool(b) => Value::Bool(*b),
            Operand::Int32(v) => Value::I32(*v),
            Operand::Float32(v) => Value::F32(*v),
            _ => Value::Null,
        }
    }

    /// Extracts lane `index` of a vector value, matching `compositeExtract`.
    /// Scalars and arrays are not extractable this way and fold to `Null`.
    pub fn composite_extract(&self, index: &Value) -> Value {
        let Some(index) = index.zext_scalar() else {
            return Value::Null;
        };
        let index = index as usize;
        match self {
            Value::IVec2(v) => v.as_slice().get(index).copied().map(Value::I32),
            Value::IVec3(v) => v.as_slice().get(index).copied().map(Value::I32),
            Value::IVec4(v) => v.as_slice().get(index).copied().map(Value::I32),
            Value::FVec2(v) => v.as_slice().get(index).copied().map(Value::F32),
            Value::FVec3(v) => v.as_slice().get(index).copied().map(Value::F32),
            Value::FVec4(v) => v.as_slice().get(index).copied().map(Value::F32),
            Value::BVec2(v) => v.as_slice().get(index).copied().map(Value::Bool),
            Value::BVec3(v) => v.as_slice().get(index).copied().map(Value::Bool),
            Value::BVec4(v) => v.as_slice().get(index).copied().map(Value::Bool),
            _ => None,
        }
        .unwrap_or(Value::Null)
    }

    /// NaN-safe `isNan` over floating-point scalars.
    pub fn is_nan(&self) -> Value {
        match *self {
            Value::F32(v) => Value::Bool(v.is_nan()),
            _ => Value::Null,
        }
    }

    pub fn is_inf(&self) -> Value {
        match *self {
            Value::F32(v) => Value::Bool(v.is_infinite()),
            _ => Value::Null,
        }
    }

    pub fn is_finite(&self) -> Value {
        match *self {
            Value::F32(v) => Value::Bool(v.is_finite()),
            _ => Value::Null,
        }
    }

    /// Reinterprets an integer's bit pattern as signed/unsigned, matching
    /// `makeSigned`/`makeUnsigned` (a no-op for this crate's `i32`-only
    /// integer storage, kept for symmetry with the original's type lattice).
    pub fn make_unsigned(&self) -> Value {
        match *self {
            Value::I32(v) => Value::I32(v),
            _ => Value::Null,
        }
    }

    pub fn make_signed(&self) -> Value {
        match *self {
            Value::I32(v) => Value::I32(v),
            _ => Value::Null,
        }
    }

    /// Boolean-vector reductions.
    pub fn all(&self) -> Value {
        match self {
            Value::BVec2(v) => Value::Bool(v.as_slice().iter().all(|b| *b)),
            Value::BVec3(v) => Value::Bool(v.as_slice().iter().all(|b| *b)),
            Value::BVec4(v) => Value::Bool(v.as_slice().iter().all(|b| *b)),
            _ => Value::Null,
        }
    }

    pub fn any(&self) -> Value {
        match self {
            Value::BVec2(v) => Value::Bool(v.as_slice().iter().any(|b| *b)),
            Value::BVec3(v) => Value::Bool(v.as_slice().iter().any(|b| *b)),
            Value::BVec4(v) => Value::Bool(v.as_slice().iter().any(|b| *b)),
            _ => Value::Null,
        }
    }

    /// Lane-parallel `select(cond, true_value, false_value)`. Returns
    /// `Null` unless `cond`'s lane count matches both value operands and
    /// the two values share a scalar element type.
    pub fn select(&self, true_value: &Value, false_value: &Value) -> Value {
        match (self, true_value, false_value) {
            (Value::Bool(c), Value::I32(t), Value::I32(f)) => Value::I32(if *c { *t } else { *f }),
            (Value::Bool(c), Value::F32(t), Value::F32(f)) => Value::F32(if *c { *t } else { *f }),
            (Value::Bool(c), Value::Bool(t), Value::Bool(f)) => Value::Bool(if *c { *t } else { *f }),
            (Value::BVec2(c), Value::IVec2(t), Value::IVec2(f)) => {
                Value::IVec2(I32Vec2::from_array([
                    if c.as_slice()[0] { t.as_slice()[0] } else { f.as_slice()[0] },
                    if c.as_slice()[1] { t.as_slice()[1] } else { f.as_slice()[1] },
                ]))
            }
            (Value::BVec4(c), Value::FVec4(t), Value::FVec4(f)) => {
                let mut out = [0.0f32; 4];
                for i in 0..4 {
                    out[i] = if c.as_slice()[i] { t.as_slice()[i] } else { f.as_slice()[i] };
                }
                Value::FVec4(F32Vec4::from_array(out))
            }
            _ => Value::Null,
        }
    }

    /// `iConvert`: scalar integer truncation/extension, `signed` selecting
    /// whether the source is sign- or zero-extended before narrowing. This
    /// crate only models 32-bit integer storage, so the only non-trivial
    /// case is a no-op identity convert; kept as a named operation because
    /// the translator calls it uniformly regardless of source width.
    pub fn iconvert(&self, signed: bool) -> Value {
        match *self {
            Value::I32(v) => {
                if signed {
                    Value::I32(v)
                } else {
                    Value::I32(v)
                }
            }
            _ => Value::Null,
        }
    }

    pub fn fconvert(&self) -> Value {
        match *self {
            Value::F32(v) => Value::F32(v),
            _ => Value::Null,
        }
    }

    /// Bit-exact reinterpretation, requiring equal byte widths just like
    /// the original's `std::bit_cast` path.
    pub fn bitcast_to_i32(&self) -> Value {
        match *self {
            Value::F32(v) => Value::I32(v.to_bits() as i32),
            Value::I32(v) => Value::I32(v),
            _ => Value::Null,
        }
    }

    pub fn bitcast_to_f32(&self) -> Value {
        match *self {
            Value::I32(v) => Value::F32(f32::from_bits(v as u32)),
            Value::F32(v) => Value::F32(v),
            _ => Value::Null,
        }
    }
}

/// Integer promotion rules: both operands must already agree on shape
/// (scalar vs a given vector width) for a binary op to fold; no implicit
/// widening across shapes, matching the original's `PairCond` checks.
fn binary_i32(lhs: &Value, rhs: &Value, f: impl Fn(i32, i32) -> i32) -> Value {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => Value::I32(f(*a, *b)),
        _ => Value::Null,
    }
}

fn binary_f32(lhs: &Value, rhs: &Value, f: impl Fn(f32, f32) -> f32) -> Value {
    match (lhs, rhs) {
        (Value::F32(a), Value::F32(b)) => Value::F32(f(*a, *b)),
        _ => Value::Null,
    }
}

fn cmp_i32(lhs: &Value, rhs: &Value, f: impl Fn(i32, i32) -> bool) -> Value {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => Value::Bool(f(*a, *b)),
        _ => Value::Null,
    }
}

fn cmp_u32(lhs: &Value, rhs: &Value, f: impl Fn(u32, u32) -> bool) -> Value {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => Value::Bool(f(*a as u32, *b as u32)),
        _ => Value::Null,
    }
}

/// NaN-safe float comparison: any NaN operand makes every ordered
/// comparison false, matching IEEE-754 `FOrd*` semantics.
fn cmp_f32(lhs: &Value, rhs: &Value, f: impl Fn(f32, f32) -> bool) -> Value {
    match (lhs, rhs) {
        (Value::F32(a), Value::F32(b)) => Value::Bool(!a.is_nan() && !b.is_nan() && f(*a, *b)),
        _ => Value::Null,
    }
}

/// Folds a `builtin` dialect binary/unary operator over already-evaluated
/// operand values. Returns `Value::Null` for operators this evaluator
/// doesn't constant-fold (e.g. anything with side effects) or for operand
/// shapes that don't match what the operator expects.
pub fn eval_builtin(op: builtin::Op, operands: &[Value]) -> Value {
    use builtin::Op;
    match (op, operands) {
        (Op::IAdd, [a, b]) => binary_i32(a, b, |a, b| a.wrapping_add(b)),
        (Op::ISub, [a, b]) => binary_i32(a, b, |a, b| a.wrapping_sub(b)),
        (Op::IMul, [a, b]) => binary_i32(a, b, |a, b| a.wrapping_mul(b)),
        (Op::IDiv, [a, b]) => {
            if b.as_i32() == Some(0) {
                Value::Null
            } else {
                binary_i32(a, b, |a, b| a.wrapping_div(b))
            }
        }
        (Op::UDiv, [a, b]) => match (a.as_i32(), b.as_i32()) {
            (Some(a), Some(0)) => {
                let _ = a;
                Value::Null
            }
            (Some(a), Some(b)) => Value::I32(((a as u32) / (b as u32)) as i32),
            _ => Value::Null,
        },
        (Op::FAdd, [a, b]) => binary_f32(a, b, |a, b| a + b),
        (Op::FSub, [a, b]) => binary_f32(a, b, |a, b| a - b),
        (Op::FMul, [a, b]) => binary_f32(a, b, |a, b| a * b),
        (Op::FDiv, [a, b]) => binary_f32(a, b, |a, b| a / b),
        (Op::FNeg, [a]) => match a {
            Value::F32(v) => Value::F32(-v),
            _ => Value::Null,
        },
        (Op::BitAnd, [a, b]) => binary_i32(a, b, |a, b| a & b),
        (Op::BitOr, [a, b]) => binary_i32(a, b, |a, b| a | b),
        (Op::BitXor, [a, b]) => binary_i32(a, b, |a, b| a ^ b),
        (Op::ShiftLeft, [a, b]) => binary_i32(a, b, |a, b| a.wrapping_shl(b as u32)),
        (Op::ShiftRight, [a, b]) => binary_i32(a, b, |a, b| a.wrapping_shr(b as u32)),
        (Op::LogicalAnd, [a, b]) => match (a.as_bool(), b.as_bool()) {
            (Some(a), Some(b)) => Value::Bool(a && b),
            _ => Value::Null,
        },
        (Op::LogicalOr, [a, b]) => match (a.as_bool(), b.as_bool()) {
            (Some(a), Some(b)) => Value::Bool(a || b),
            _ => Value::Null,
        },
        (Op::LogicalNot, [a]) => a.as_bool().map(|b| Value::Bool(!b)).unwrap_or(Value::Null),
        (Op::IEqual, [a, b]) => cmp_i32(a, b, |a, b| a == b),
        (Op::INotEqual, [a, b]) => cmp_i32(a, b, |a, b| a != b),
        (Op::SLessThan, [a, b]) => cmp_i32(a, b, |a, b| a < b),
        (Op::ULessThan, [a, b]) => cmp_u32(a, b, |a, b| a < b),
        (Op::FOrdLessThan, [a, b]) => cmp_f32(a, b, |a, b| a < b),
        (Op::FOrdEqual, [a, b]) => cmp_f32(a, b, |a, b| a == b),
        (Op::IConvert, [a]) => a.iconvert(true),
        (Op::FConvert, [a]) => a.fconvert(),
        (Op::Bitcast, [a]) => match a {
            Value::F32(_) => a.bitcast_to_i32(),
            Value::I32(_) => a.bitcast_to_i32(),
            _ => Value::Null,
        },
        (Op::Select, [c, t, f]) => c.select(t, f),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iadd_folds_wrapping() {
        let v = eval_builtin(builtin::Op::IAdd, &[Value::I32(i32::MAX), Value::I32(1)]);
        assert_eq!(v, Value::I32(i32::MIN));
    }

    #[test]
    fn idiv_by_zero_is_null() {
        let v = eval_builtin(builtin::Op::IDiv, &[Value::I32(1), Value::I32(0)]);
        assert!(v.is_null());
    }

    #[test]
    fn fcmp_nan_is_never_less_than() {
        let v = eval_builtin(builtin::Op::FOrdLessThan, &[Value::F32(f32::NAN), Value::F32(1.0)]);
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn mismatched_shapes_fold_to_null() {
        let v = eval_builtin(builtin::Op::IAdd, &[Value::I32(1), Value::F32(1.0)]);
        assert!(v.is_null());
    }

    #[test]
    fn select_picks_lane() {
        let v = Value::Bool(true).select(&Value::I32(10), &Value::I32(20));
        assert_eq!(v, Value::I32(10));
    }

    #[test]
    fn bitcast_round_trips() {
        let bits = Value::F32(1.5).bitcast_to_i32();
        let back = bits.bitcast_to_f32();
        assert_eq!(back, Value::F32(1.5));
    }

    #[test]
    fn composite_extract_out_of_range_is_null() {
        let v = Value::IVec2(I32Vec2::from_array([1, 2]));
        assert!(v.composite_extract(&Value::I32(5)).is_null());
    }
}
