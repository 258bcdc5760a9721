//! Детерминированный генератор ключевого потока
//!
//! Генератор семейства Mersenne Twister (MT19937): 624 слова состояния и
//! индекс. Одинаковый seed даёт одинаковую бесконечную последовательность на
//! любой платформе: на этом держится синхронность шифрования двух сторон.
//!
//! Для шифрования используется только младший байт каждого слова
//! (см. [`Keystream::next_mask`]).

use rand_core::{impls, Error as RngError, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Размер состояния (слов)
pub const STATE_SIZE: usize = 624;

/// Смещение второго слова в рекомбинации
const SHIFT_SIZE: usize = 397;

/// Множитель инициализации состояния
const INIT_MULTIPLIER: u32 = 0x6C07_8965;

/// Матрица twist
const MATRIX_A: u32 = 0x9908_B0DF;

const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7FFF_FFFF;

/// Константы tempering
const TEMPER_B: u32 = 0x9D2C_5680;
const TEMPER_C: u32 = 0xEFC6_0000;

/// Seed по умолчанию для только что созданного генератора
pub const DEFAULT_SEED: u32 = 0xDEAD_B08F;

/// Генератор ключевого потока (автоматически зануляется)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keystream {
    state: [u32; STATE_SIZE],
    index: usize,
}

impl Keystream {
    /// Создать генератор с seed по умолчанию
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Создать генератор с заданным seed
    pub fn with_seed(seed: u32) -> Self {
        let mut keystream = Self {
            state: [0; STATE_SIZE],
            index: 0,
        };
        keystream.seed(seed);
        keystream
    }

    /// Переинициализировать состояние
    ///
    /// Индекс сбрасывается в 0, поэтому первый `next_u32` после seed всегда
    /// выполняет полный twist.
    pub fn seed(&mut self, seed: u32) {
        self.index = 0;
        self.state[0] = seed;
        for i in 1..STATE_SIZE {
            let prev = self.state[i - 1];
            self.state[i] = INIT_MULTIPLIER
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
    }

    /// Следующее 32-битное слово последовательности
    pub fn next_u32(&mut self) -> u32 {
        if self.index == 0 {
            self.twist();
        }

        let mut y = self.state[self.index];
        y ^= y >> 11;
        y ^= (y << 7) & TEMPER_B;
        y ^= (y << 15) & TEMPER_C;
        y ^= y >> 18;

        self.index = (self.index + 1) % STATE_SIZE;
        y
    }

    /// Маска для одного байта шифротекста (младший байт слова)
    pub fn next_mask(&mut self) -> u8 {
        (self.next_u32() & 0xFF) as u8
    }

    /// Зашифровать или расшифровать один байт
    pub fn apply(&mut self, byte: u8) -> u8 {
        byte ^ self.next_mask()
    }

    /// Применить ключевой поток к буферу на месте
    pub fn apply_in_place(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.apply(*byte);
        }
    }

    fn twist(&mut self) {
        for i in 0..STATE_SIZE {
            let y = (self.state[i] & UPPER_MASK)
                | (self.state[(i + 1) % STATE_SIZE] & LOWER_MASK);
            let mut next = self.state[(i + SHIFT_SIZE) % STATE_SIZE] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
    }
}

impl Default for Keystream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystream")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RngCore for Keystream {
    fn next_u32(&mut self) -> u32 {
        Keystream::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RngError> {
        self.fill_bytes(dest);
        Ok(())
    }
}
