//! Разбиение исходящего текста на зашифрованные блоки
//!
//! Текст произвольной длины режется на блоки по [`BLOCK_SIZE`] байт,
//! последний блок дополняется нулями. Каждый блок шифруется целиком
//! (вместе с дополнением), так что обе стороны расходуют ровно
//! `BLOCK_SIZE` байт ключевого потока на кадр независимо от содержимого.
//!
//! Между кадрами выдерживается пауза ([`Pacing`]), чтобы не переполнить
//! приёмный буфер собеседника: подтверждений в протоколе нет.

use bytes::Bytes;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{HandshakeError, Result};
use crate::frame::{encode_msg, MessageKind, BLOCK_SIZE};
use crate::session::SessionState;

/// Бит на байт при кадрировании 8N1 (старт + 8 данных + стоп)
const BITS_PER_BYTE: u64 = 10;

/// Скорость линии по умолчанию
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Пауза между исходящими блоками
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    block_delay: Duration,
}

impl Pacing {
    /// Фиксированная пауза
    pub fn fixed(block_delay: Duration) -> Self {
        Self { block_delay }
    }

    /// Пауза, равная времени передачи одного кадра MSG на заданной скорости
    pub fn for_baud_rate(baud_rate: NonZeroU32) -> Self {
        let bits = MessageKind::Msg.frame_len() as u64 * BITS_PER_BYTE;
        let micros = bits * 1_000_000 / u64::from(baud_rate.get());
        Self::fixed(Duration::from_micros(micros))
    }

    /// Пауза после каждого блока
    pub fn block_delay(&self) -> Duration {
        self.block_delay
    }
}

impl Default for Pacing {
    fn default() -> Self {
        match NonZeroU32::new(DEFAULT_BAUD_RATE) {
            Some(baud) => Self::for_baud_rate(baud),
            None => Self::fixed(Duration::ZERO),
        }
    }
}

/// Исполнитель паузы между блоками
pub trait Pacer {
    /// Выдержать паузу
    fn pause(&mut self, delay: Duration);
}

/// Пауза через `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Исходящее сообщение: ленивая последовательность кадров MSG
///
/// Блок шифруется в момент выдачи кадра, поэтому порядок отправки
/// совпадает с порядком расхода ключевого потока.
pub struct OutgoingMessage<'a> {
    session: &'a mut SessionState,
    chunks: std::slice::Chunks<'a, u8>,
}

impl<'a> OutgoingMessage<'a> {
    /// Подготовить сообщение; сессия должна быть в `Ready`
    pub fn new(session: &'a mut SessionState, text: &'a [u8]) -> Result<Self> {
        // Проверка готовности до расхода ключевого потока
        session
            .shared_secret()
            .ok_or_else(|| HandshakeError::NotReady(session.status()))?;

        Ok(Self {
            session,
            chunks: text.chunks(BLOCK_SIZE),
        })
    }

    /// Количество ещё не выданных блоков
    pub fn remaining_blocks(&self) -> usize {
        self.chunks.len()
    }
}

impl Iterator for OutgoingMessage<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;

        let mut block = [0u8; BLOCK_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);

        Some(
            self.session
                .encrypt_block(&mut block)
                .map(|()| encode_msg(&block)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

/// Количество блоков для текста заданной длины
pub fn block_count(text_len: usize) -> usize {
    text_len.div_ceil(BLOCK_SIZE)
}
