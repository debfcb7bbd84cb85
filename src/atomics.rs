//! Element-wise atomic arithmetic applied by the target during
//! delivery of atomic-class operations.

/// Atomic operations understood by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AtomicOp {
    Min = 0,
    Max = 1,
    Sum = 2,
    Prod = 3,
    Lor = 4,
    Land = 5,
    Bor = 6,
    Band = 7,
    Lxor = 8,
    Bxor = 9,
    Swap = 10,
    Cswap = 11,
    Mswap = 12,
}

impl AtomicOp {
    pub(crate) fn from_wire(raw: u8) -> Option<AtomicOp> {
        Some(match raw {
            0 => AtomicOp::Min,
            1 => AtomicOp::Max,
            2 => AtomicOp::Sum,
            3 => AtomicOp::Prod,
            4 => AtomicOp::Lor,
            5 => AtomicOp::Land,
            6 => AtomicOp::Bor,
            7 => AtomicOp::Band,
            8 => AtomicOp::Lxor,
            9 => AtomicOp::Bxor,
            10 => AtomicOp::Swap,
            11 => AtomicOp::Cswap,
            12 => AtomicOp::Mswap,
            _ => return None,
        })
    }

    /// Swap-family operations are only legal on the swap entry point.
    pub fn is_swap_family(self) -> bool {
        matches!(self, AtomicOp::Swap | AtomicOp::Cswap | AtomicOp::Mswap)
    }

    /// Whether the operation is defined for the given datatype.
    /// Logical and bitwise operations reject floats; conditional and
    /// masked swaps compare raw bits and are integer-only.
    pub fn accepts(self, ty: AtomicType) -> bool {
        match self {
            AtomicOp::Min | AtomicOp::Max | AtomicOp::Sum | AtomicOp::Prod | AtomicOp::Swap => true,
            AtomicOp::Lor
            | AtomicOp::Land
            | AtomicOp::Bor
            | AtomicOp::Band
            | AtomicOp::Lxor
            | AtomicOp::Bxor
            | AtomicOp::Cswap
            | AtomicOp::Mswap => !ty.is_float(),
        }
    }
}

/// Element datatypes for atomic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AtomicType {
    I8 = 0,
    U8 = 1,
    I16 = 2,
    U16 = 3,
    I32 = 4,
    U32 = 5,
    I64 = 6,
    U64 = 7,
    F32 = 8,
    F64 = 9,
}

impl AtomicType {
    pub(crate) fn from_wire(raw: u8) -> Option<AtomicType> {
        Some(match raw {
            0 => AtomicType::I8,
            1 => AtomicType::U8,
            2 => AtomicType::I16,
            3 => AtomicType::U16,
            4 => AtomicType::I32,
            5 => AtomicType::U32,
            6 => AtomicType::I64,
            7 => AtomicType::U64,
            8 => AtomicType::F32,
            9 => AtomicType::F64,
            _ => return None,
        })
    }

    /// Element width in bytes.
    pub fn width(self) -> usize {
        match self {
            AtomicType::I8 | AtomicType::U8 => 1,
            AtomicType::I16 | AtomicType::U16 => 2,
            AtomicType::I32 | AtomicType::U32 | AtomicType::F32 => 4,
            AtomicType::I64 | AtomicType::U64 | AtomicType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, AtomicType::F32 | AtomicType::F64)
    }
}

macro_rules! int_element {
    ($t:ty, $op:expr, $tgt:expr, $src:expr) => {{
        let a = <$t>::from_le_bytes($tgt.try_into().unwrap());
        let b = <$t>::from_le_bytes($src.try_into().unwrap());
        let r: $t = match $op {
            AtomicOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            AtomicOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            AtomicOp::Sum => a.wrapping_add(b),
            AtomicOp::Prod => a.wrapping_mul(b),
            AtomicOp::Lor => ((a != 0) || (b != 0)) as $t,
            AtomicOp::Land => ((a != 0) && (b != 0)) as $t,
            AtomicOp::Bor => a | b,
            AtomicOp::Band => a & b,
            AtomicOp::Lxor => ((a != 0) ^ (b != 0)) as $t,
            AtomicOp::Bxor => a ^ b,
            AtomicOp::Swap => b,
            AtomicOp::Cswap | AtomicOp::Mswap => unreachable!(),
        };
        $tgt.copy_from_slice(&r.to_le_bytes());
    }};
}

macro_rules! float_element {
    ($t:ty, $op:expr, $tgt:expr, $src:expr) => {{
        let a = <$t>::from_le_bytes($tgt.try_into().unwrap());
        let b = <$t>::from_le_bytes($src.try_into().unwrap());
        let r: $t = match $op {
            AtomicOp::Min => a.min(b),
            AtomicOp::Max => a.max(b),
            AtomicOp::Sum => a + b,
            AtomicOp::Prod => a * b,
            AtomicOp::Swap => b,
            // Rejected at validation.
            _ => unreachable!(),
        };
        $tgt.copy_from_slice(&r.to_le_bytes());
    }};
}

/// Applies `op` element-wise over `target`, reading operands from
/// `source`. Lengths must already be validated as equal and a multiple
/// of the element width.
pub(crate) fn perform(op: AtomicOp, ty: AtomicType, target: &mut [u8], source: &[u8]) {
    debug_assert_eq!(target.len(), source.len());
    debug_assert_eq!(target.len() % ty.width(), 0);
    debug_assert!(!op.is_swap_family() || op == AtomicOp::Swap);
    let w = ty.width();
    for (tgt, src) in target.chunks_exact_mut(w).zip(source.chunks_exact(w)) {
        match ty {
            AtomicType::I8 => int_element!(i8, op, tgt, src),
            AtomicType::U8 => int_element!(u8, op, tgt, src),
            AtomicType::I16 => int_element!(i16, op, tgt, src),
            AtomicType::U16 => int_element!(u16, op, tgt, src),
            AtomicType::I32 => int_element!(i32, op, tgt, src),
            AtomicType::U32 => int_element!(u32, op, tgt, src),
            AtomicType::I64 => int_element!(i64, op, tgt, src),
            AtomicType::U64 => int_element!(u64, op, tgt, src),
            AtomicType::F32 => float_element!(f32, op, tgt, src),
            AtomicType::F64 => float_element!(f64, op, tgt, src),
        }
    }
}

/// Applies a swap-family operation. `Swap` replaces every element;
/// `Cswap` and `Mswap` act on a single element using `operand` as the
/// compare value or merge mask respectively.
pub(crate) fn perform_swap(
    op: AtomicOp,
    ty: AtomicType,
    target: &mut [u8],
    source: &[u8],
    operand: u64,
) {
    debug_assert!(op.is_swap_family());
    match op {
        AtomicOp::Swap => perform(AtomicOp::Swap, ty, target, source),
        AtomicOp::Cswap => {
            let w = ty.width();
            let mut cur = [0u8; 8];
            cur[..w].copy_from_slice(&target[..w]);
            if u64::from_le_bytes(cur) == mask_to_width(operand, w) {
                target[..w].copy_from_slice(&source[..w]);
            }
        }
        AtomicOp::Mswap => {
            let w = ty.width();
            let mut cur = [0u8; 8];
            cur[..w].copy_from_slice(&target[..w]);
            let mut new = [0u8; 8];
            new[..w].copy_from_slice(&source[..w]);
            let mask = mask_to_width(operand, w);
            let merged =
                (u64::from_le_bytes(cur) & !mask) | (u64::from_le_bytes(new) & mask);
            target[..w].copy_from_slice(&merged.to_le_bytes()[..w]);
        }
        _ => unreachable!(),
    }
}

fn mask_to_width(value: u64, width: usize) -> u64 {
    if width == 8 {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_wraps() {
        let mut tgt = 250u8.to_le_bytes().to_vec();
        let src = 10u8.to_le_bytes().to_vec();
        perform(AtomicOp::Sum, AtomicType::U8, &mut tgt, &src);
        assert_eq!(tgt[0], 4);
    }

    #[test]
    fn min_signed() {
        let mut tgt = (-5i32).to_le_bytes().to_vec();
        let src = 3i32.to_le_bytes().to_vec();
        perform(AtomicOp::Min, AtomicType::I32, &mut tgt, &src);
        assert_eq!(i32::from_le_bytes(tgt.try_into().unwrap()), -5);
    }

    #[test]
    fn band_elementwise() {
        let mut tgt = vec![0xffu8, 0x0f];
        let src = vec![0xaau8, 0xff];
        perform(AtomicOp::Band, AtomicType::U8, &mut tgt, &src);
        assert_eq!(tgt, vec![0xaa, 0x0f]);
    }

    #[test]
    fn float_prod() {
        let mut tgt = 2.5f64.to_le_bytes().to_vec();
        let src = 4.0f64.to_le_bytes().to_vec();
        perform(AtomicOp::Prod, AtomicType::F64, &mut tgt, &src);
        assert_eq!(f64::from_le_bytes(tgt.try_into().unwrap()), 10.0);
    }

    #[test]
    fn cswap_only_on_match() {
        let mut tgt = 7u64.to_le_bytes().to_vec();
        let src = 9u64.to_le_bytes().to_vec();
        perform_swap(AtomicOp::Cswap, AtomicType::U64, &mut tgt, &src, 8);
        assert_eq!(u64::from_le_bytes(tgt.clone().try_into().unwrap()), 7);
        perform_swap(AtomicOp::Cswap, AtomicType::U64, &mut tgt, &src, 7);
        assert_eq!(u64::from_le_bytes(tgt.try_into().unwrap()), 9);
    }

    #[test]
    fn mswap_merges_masked_bits() {
        let mut tgt = 0b1100u32.to_le_bytes().to_vec();
        let src = 0b0011u32.to_le_bytes().to_vec();
        perform_swap(AtomicOp::Mswap, AtomicType::U32, &mut tgt, &src, 0b0110);
        assert_eq!(u32::from_le_bytes(tgt.try_into().unwrap()), 0b1010);
    }

    #[test]
    fn legality() {
        assert!(!AtomicOp::Bor.accepts(AtomicType::F32));
        assert!(AtomicOp::Sum.accepts(AtomicType::F64));
        assert!(!AtomicOp::Cswap.accepts(AtomicType::F64));
        assert!(AtomicOp::Swap.is_swap_family());
        assert!(!AtomicOp::Sum.is_swap_family());
    }
}
