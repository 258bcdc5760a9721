//! Модульная арифметика без переполнения
//!
//! Все операции работают с 32-битными операндами и 32-битным модулем.
//! Промежуточные значения никогда не выходят за пределы `u32`:
//! - сложение сравнивает с дополнением до модуля вместо `a + b`
//! - умножение раскладывается на удвоения (shift-and-add)
//! - возведение в степень: бинарное (square-and-multiply)
//!
//! Модуль, равный нулю, отклоняется с [`ArithError::ModulusZero`].

use std::num::NonZeroU32;

use crate::error::ArithError;

fn checked_modulus(modulus: u32) -> Result<NonZeroU32, ArithError> {
    NonZeroU32::new(modulus).ok_or(ArithError::ModulusZero)
}

/// `(a + b) mod m` без переполнения
pub fn add_mod(a: u32, b: u32, modulus: u32) -> Result<u32, ArithError> {
    Ok(add_mod_nz(a, b, checked_modulus(modulus)?))
}

/// `(a * b) mod m` без переполнения
pub fn mul_mod(a: u32, b: u32, modulus: u32) -> Result<u32, ArithError> {
    Ok(mul_mod_nz(a, b, checked_modulus(modulus)?))
}

/// `base^exp mod m` бинарным возведением в степень
pub fn pow_mod(base: u32, exp: u32, modulus: u32) -> Result<u32, ArithError> {
    let m = checked_modulus(modulus)?;

    let mut result = 1 % m.get();
    // factor = base^(2^i) mod m
    let mut factor = base % m.get();
    let mut exp = exp;

    while exp != 0 {
        if exp & 1 == 1 {
            result = mul_mod_nz(result, factor, m);
        }
        exp >>= 1;
        if exp != 0 {
            factor = mul_mod_nz(factor, factor, m);
        }
    }

    Ok(result)
}

fn add_mod_nz(a: u32, b: u32, m: NonZeroU32) -> u32 {
    let m = m.get();
    let a = a % m;
    let b = b % m;

    // a + b >= m  <=>  a >= m - b
    let gap = m - b;
    if a >= gap {
        a - gap
    } else {
        a + b
    }
}

fn mul_mod_nz(a: u32, b: u32, m: NonZeroU32) -> u32 {
    let mut result = 0;
    let mut addend = a % m.get();
    let mut b = b;

    while b != 0 {
        if b & 1 == 1 {
            result = add_mod_nz(result, addend, m);
        }
        b >>= 1;
        if b != 0 {
            addend = add_mod_nz(addend, addend, m);
        }
    }

    result
}
