//! # SecureSerialLink Core (scl-core)
//!
//! Ядро защищённого последовательного канала: обмен ключами Диффи-Хеллмана
//! на 32-битных числах и потоковое шифрование XOR с ключевым потоком
//! Mersenne Twister поверх байтового транспорта (UART, TCP, pipe).
//!
//! Библиотека не выполняет ввод-вывод: входящие байты передаются по одному,
//! исходящие кадры записываются в [`link::ByteSink`].
//!
//! ## Возможности
//!
//! - **Арифметика**: сложение, умножение и возведение в степень по модулю без переполнения
//! - **Ключевой поток**: MT19937, маской служит младший байт каждого слова
//! - **Кадры**: теги `KEY`/`RSP`/`MSG`, payload 12/4/32 байта, терминатор `0x00`
//! - **Handshake**: KEY → RSP, самовосстановление при рассинхронизации
//! - **Безопасность**: Zeroize для ключей и состояния генераторов
//!
//! ## Структура
//!
//! - [`modarith`]: Модульная арифметика
//! - [`keystream`]: Генератор ключевого потока
//! - [`ring_buffer`]: Кольцевой буфер входящих байтов
//! - [`frame`]: Формат кадров и инкрементальный парсер
//! - [`session`]: Состояние сессии и handshake
//! - [`outgoing`]: Разбиение сообщений на блоки и пауза между кадрами
//! - [`link`]: Канал целиком: парсер + сессия + обработчики
//! - [`entropy`]: Источники энтропии для ключей
//! - [`error`]: Типы ошибок
//!
//! ## Пример использования
//!
//! ```rust
//! use scl_core::{
//!     entropy::ScriptedEntropy,
//!     link::{LinkEvent, SecureLink},
//!     outgoing::{Pacing, ThreadPacer},
//!     session::{DhParameters, SessionStatus},
//! };
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pacing = Pacing::fixed(Duration::ZERO);
//! let mut alice = SecureLink::new(DhParameters::default(), ScriptedEntropy::new([0x1234u16]), pacing);
//! let mut bob = SecureLink::new(DhParameters::default(), ScriptedEntropy::new([0x4321u16]), pacing);
//!
//! // Alice начинает handshake
//! let mut to_bob = Vec::new();
//! alice.begin_handshake(&mut to_bob)?;
//!
//! // Bob отвечает RSP
//! let mut to_alice = Vec::new();
//! for byte in to_bob.drain(..) {
//!     bob.feed_byte(byte, &mut to_alice)?;
//! }
//! for byte in to_alice.drain(..) {
//!     alice.feed_byte(byte, &mut Vec::new())?;
//! }
//! assert_eq!(alice.status(), SessionStatus::Ready);
//!
//! // Зашифрованное сообщение
//! alice.encrypt_and_send(b"hello", &mut to_bob, &mut ThreadPacer)?;
//! let mut received = Vec::new();
//! for byte in to_bob.drain(..) {
//!     if let Some(LinkEvent::Plaintext(text)) = bob.feed_byte(byte, &mut Vec::new())? {
//!         received.extend_from_slice(&text);
//!     }
//! }
//! assert_eq!(received, b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entropy;
pub mod error;
pub mod frame;
pub mod keystream;
pub mod link;
pub mod modarith;
pub mod outgoing;
pub mod ring_buffer;
pub mod session;

// Re-экспорт основных типов для удобства
pub use entropy::{EntropySource, RngEntropy};
pub use error::{LinkError, Result};
pub use frame::MessageKind;
pub use link::{ByteSink, LinkEvent, SecureLink};
pub use outgoing::{Pacer, Pacing};
pub use session::{DhParameters, SessionState, SessionStatus};

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
