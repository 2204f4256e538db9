// 2.0: fixed-point helpers. every monetary intermediate in the engine goes through
// these, in big-int or big-rat form. no floats anywhere.

use num_bigint::BigInt;
use num_integer::Roots;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use thiserror::Error;

/// Scale for parts-per-million ratios.
pub const ONE_MILLION: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("value {0} out of range for u32")]
    OutOfRange(usize),
}

pub fn abs_diff(a: u64, b: u64) -> u64 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

pub fn max_u32(a: u32, b: u32) -> u32 {
    if a > b {
        a
    } else {
        b
    }
}

pub fn min_u32(a: u32, b: u32) -> u32 {
    if a < b {
        a
    } else {
        b
    }
}

/// Fails rather than wrapping when a collection length leaves u32 range.
pub fn checked_usize_to_u32(value: usize) -> Result<u32, MathError> {
    u32::try_from(value).map_err(|_| MathError::OutOfRange(value))
}

/// `x * ppm / 1_000_000`, rounded toward zero. Signed so that maker rebates
/// (negative fee ppm) flow through the same path.
pub fn big_int_mul_ppm(x: &BigInt, ppm: i64) -> BigInt {
    (x * BigInt::from(ppm)) / BigInt::from(ONE_MILLION)
}

/// `x * ppm / 1_000_000`, rounded toward positive infinity. Margin
/// requirements use this so rounding never favors the account.
pub fn big_int_mul_ppm_ceil(x: &BigInt, ppm: u32) -> BigInt {
    let product = x * BigInt::from(ppm);
    let million = BigInt::from(ONE_MILLION);
    num_integer::Integer::div_ceil(&product, &million)
}

/// `x * 10^exp` as an exact rational. Negative exponents divide.
pub fn big_mul_pow10(x: &BigInt, exp: i32) -> BigRational {
    let pow = BigInt::from(10u32).pow(exp.unsigned_abs());
    if exp >= 0 {
        BigRational::from_integer(x * pow)
    } else {
        BigRational::new(x.clone(), pow)
    }
}

/// Nearest integer, ties toward positive infinity.
pub fn big_rat_round_half_up(r: &BigRational) -> BigInt {
    let half = BigRational::new(BigInt::one(), BigInt::from(2u32));
    (r + half).floor().to_integer()
}

pub fn big_rat_ceil(r: &BigRational) -> BigInt {
    r.ceil().to_integer()
}

pub fn big_rat_floor(r: &BigRational) -> BigInt {
    r.floor().to_integer()
}

/// Integer square root of a non-negative big integer.
///
/// Panics on negative input; callers only pass notional magnitudes.
pub fn big_int_sqrt(x: &BigInt) -> BigInt {
    assert!(!x.is_negative(), "big_int_sqrt: negative input");
    x.sqrt()
}

/// Clamps a signed big integer into i128, panicking when persisted state
/// would exceed the bounded magnitude. Exceeding it means the block is invalid.
pub fn big_int_to_i128(x: &BigInt) -> i128 {
    i128::try_from(x).unwrap_or_else(|_| {
        panic!("state write exceeds bounded magnitude: {x}");
    })
}
