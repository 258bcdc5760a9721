//! Типы ошибок для SecureSerialLink
//!
//! Этот модуль содержит все возможные типы ошибок, которые могут возникнуть
//! при работе защищённого последовательного канала.

use thiserror::Error;

use crate::frame::MessageKind;
use crate::session::SessionStatus;

/// Основной тип ошибок канала
///
/// Ядро не выполняет ввод-вывод, поэтому ошибки транспорта сюда не попадают.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Ошибка модульной арифметики
    #[error("Арифметическая ошибка: {0}")]
    ArithError(#[from] ArithError),

    /// Ошибка разбора кадра
    #[error("Ошибка кадра: {0}")]
    FrameError(#[from] FrameError),

    /// Ошибка обмена ключами (handshake)
    #[error("Ошибка handshake: {0}")]
    HandshakeError(#[from] HandshakeError),

    /// Общая ошибка
    #[error("Общая ошибка: {0}")]
    Other(String),
}

/// Ошибки модульной арифметики
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithError {
    /// Модуль равен нулю (деление на ноль)
    #[error("Модуль не может быть равен нулю")]
    ModulusZero,
}

/// Ошибки разбора кадров
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Кадр не прошёл проверку и был отброшен
    #[error("Некорректный кадр {kind}: {reason}")]
    MalformedFrame {
        /// Тип кадра
        kind: MessageKind,
        /// Причина отказа
        reason: String,
    },

    /// На месте терминатора оказался другой байт
    #[error("Кадр {kind}: ожидался терминатор 0x00, получено 0x{found:02X}")]
    TerminatorMismatch {
        /// Тип кадра
        kind: MessageKind,
        /// Байт на месте терминатора
        found: u8,
    },

    /// Payload не помещается в кольцевой буфер
    #[error("Payload {kind} ({len} байт) не помещается в буфер ёмкостью {capacity}")]
    PayloadTooLarge {
        /// Тип кадра
        kind: MessageKind,
        /// Длина payload
        len: usize,
        /// Ёмкость буфера
        capacity: usize,
    },
}

/// Ошибки процесса handshake
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Сообщение пришло в неподходящем состоянии сессии
    #[error("Сообщение {kind} не ожидается в состоянии {status:?}")]
    OutOfOrder {
        /// Тип сообщения
        kind: MessageKind,
        /// Состояние сессии в момент приёма
        status: SessionStatus,
    },

    /// Некорректные параметры Диффи-Хеллмана
    #[error("Некорректные параметры DH: p={prime_modulus}, g={generator}")]
    InvalidParameters {
        /// Модуль p
        prime_modulus: u32,
        /// Генератор g
        generator: u32,
    },

    /// Сессия ещё не готова к шифрованию
    #[error("Сессия не готова к передаче данных (состояние {0:?})")]
    NotReady(SessionStatus),
}

impl LinkError {
    /// Ошибка, после которой сессия переходит в `Failed`
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            LinkError::FrameError(FrameError::TerminatorMismatch { .. })
        )
    }
}

/// Псевдоним для Result с ошибкой канала
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}
