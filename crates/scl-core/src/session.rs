//! Состояние защищённой сессии
//!
//! Этот модуль отвечает за:
//! - Параметры Диффи-Хеллмана и ключевой материал обеих сторон
//! - Машину состояний `NeedInit → SentKey → Ready` (и `Failed` из любого)
//! - Пару генераторов ключевого потока (по одному на направление)
//! - Счётчики блоков по направлениям
//!
//! Генераторы шифрования существуют только в состоянии `Ready`: до вычисления
//! общего секрета ни один байт не может быть зашифрован или расшифрован.

use bytes::Bytes;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::entropy::EntropySource;
use crate::error::{HandshakeError, Result};
use crate::frame::{KeyMessage, MessageKind, ResponseMessage, BLOCK_SIZE};
use crate::keystream::Keystream;
use crate::modarith::pow_mod;

/// Сколько слов генератора перебирается, чтобы новый публичный ключ
/// отличался от предыдущего
const KEYGEN_ATTEMPTS: usize = 8;

/// Простой модуль по умолчанию (2^31 - 1)
pub const DEFAULT_PRIME_MODULUS: u32 = 0x7FFF_FFFF;

/// Генератор по умолчанию (первообразный корень по модулю 2^31 - 1)
pub const DEFAULT_GENERATOR: u32 = 16807;

/// Параметры обмена ключами Диффи-Хеллмана
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhParameters {
    /// Простой модуль
    pub prime_modulus: u32,
    /// Генератор группы
    pub generator: u32,
}

impl DhParameters {
    /// Создать параметры с проверкой `generator < prime_modulus`
    pub fn new(prime_modulus: u32, generator: u32) -> std::result::Result<Self, HandshakeError> {
        if prime_modulus < 2 || generator >= prime_modulus {
            return Err(HandshakeError::InvalidParameters {
                prime_modulus,
                generator,
            });
        }
        Ok(Self {
            prime_modulus,
            generator,
        })
    }
}

impl Default for DhParameters {
    fn default() -> Self {
        Self {
            prime_modulus: DEFAULT_PRIME_MODULUS,
            generator: DEFAULT_GENERATOR,
        }
    }
}

/// Состояние сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Обмен ключами ещё не начинался
    NeedInit,
    /// Отправлен KEY, ожидается RSP
    SentKey,
    /// Общий секрет вычислен, генераторы засеяны
    Ready,
    /// Нарушена целостность кадра, нужен новый handshake
    Failed,
}

impl SessionStatus {
    /// Допустим ли кадр данного типа в этом состоянии
    ///
    /// KEY принимается всегда. RSP только в ответ на свой KEY (или как
    /// запоздалый дубликат в `Ready`). MSG только в `Ready`.
    pub fn admits(self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Key => true,
            MessageKind::Rsp => matches!(self, SessionStatus::SentKey | SessionStatus::Ready),
            MessageKind::Msg => self == SessionStatus::Ready,
        }
    }
}

/// Генераторы ключевого потока по направлениям
#[derive(Clone)]
struct SessionCiphers {
    /// Исходящее направление
    mine: Keystream,
    /// Входящее направление
    other: Keystream,
    /// Отправлено блоков с начала сессии
    sent_blocks: u32,
    /// Принято блоков с начала сессии
    received_blocks: u32,
}

/// Состояние сессии одной стороны
pub struct SessionState {
    params: DhParameters,
    status: SessionStatus,
    my_private_key: u32,
    my_public_key: u32,
    other_public_key: u32,
    shared_secret: u32,
    /// Генератор приватных ключей (засевается энтропией)
    keygen: Keystream,
    ciphers: Option<SessionCiphers>,
    /// Отправленный KEY, на который ещё не пришёл RSP
    sent_key: Option<Bytes>,
    /// Последний принятый KEY и RSP, которым на него ответили
    answered_key: Option<(KeyMessage, Bytes)>,
}

impl SessionState {
    /// Создать сессию в состоянии `NeedInit`
    pub fn new(params: DhParameters) -> Self {
        Self {
            params,
            status: SessionStatus::NeedInit,
            my_private_key: 0,
            my_public_key: 0,
            other_public_key: 0,
            shared_secret: 0,
            keygen: Keystream::new(),
            ciphers: None,
            sent_key: None,
            answered_key: None,
        }
    }

    /// Текущее состояние
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Текущие параметры DH
    pub fn params(&self) -> DhParameters {
        self.params
    }

    /// Свой публичный ключ
    pub fn my_public_key(&self) -> u32 {
        self.my_public_key
    }

    /// Публичный ключ собеседника
    pub fn other_public_key(&self) -> u32 {
        self.other_public_key
    }

    /// Общий секрет (доступен только в `Ready`)
    pub fn shared_secret(&self) -> Option<u32> {
        self.ciphers.as_ref().map(|_| self.shared_secret)
    }

    /// Количество отправленных блоков с начала сессии
    pub fn my_message_index(&self) -> u32 {
        self.ciphers.as_ref().map_or(0, |c| c.sent_blocks)
    }

    /// Количество принятых блоков с начала сессии
    pub fn other_message_index(&self) -> u32 {
        self.ciphers.as_ref().map_or(0, |c| c.received_blocks)
    }

    /// Кадр KEY, отправленный в `SentKey` и ещё не подтверждённый RSP
    ///
    /// Повторная отправка этого кадра не меняет ключевую пару.
    pub fn outstanding_key(&self) -> Option<Bytes> {
        match self.status {
            SessionStatus::SentKey => self.sent_key.clone(),
            _ => None,
        }
    }

    /// Является ли KEY повтором того, на который сессия уже ответила
    pub fn is_answered_key(&self, message: &KeyMessage) -> bool {
        self.status == SessionStatus::Ready
            && matches!(&self.answered_key, Some((key, _)) if key == message)
    }

    /// Начать handshake: сгенерировать ключи и подготовить кадр KEY
    ///
    /// Допустимо из любого состояния; текущая сессия (если была) сбрасывается.
    pub fn begin_handshake<E: EntropySource>(&mut self, entropy: &mut E) -> Result<Bytes> {
        self.ciphers = None;
        self.answered_key = None;
        self.generate_keypair(entropy)?;
        self.status = SessionStatus::SentKey;

        info!(
            public_key = format_args!("{:08X}", self.my_public_key),
            "→ отправка KEY"
        );

        let frame = KeyMessage {
            params: self.params,
            public_key: self.my_public_key,
        }
        .encode();
        self.sent_key = Some(frame.clone());
        Ok(frame)
    }

    /// Обработать KEY собеседника
    ///
    /// Возвращает кадр RSP и переводит сессию в `Ready`. Если обе стороны
    /// одновременно отправили KEY, сторона с большим публичным ключом
    /// игнорирует встречный KEY и ждёт RSP, тогда возвращается `None`.
    ///
    /// Повтор уже принятого KEY получает тот же RSP, сессия не меняется.
    pub fn on_key_received<E: EntropySource>(
        &mut self,
        message: &KeyMessage,
        entropy: &mut E,
    ) -> Result<Option<Bytes>> {
        if self.is_answered_key(message) {
            debug!(
                theirs = format_args!("{:08X}", message.public_key),
                "← повтор KEY, повторная отправка RSP"
            );
            return Ok(self.answered_key.as_ref().map(|(_, rsp)| rsp.clone()));
        }

        if self.status == SessionStatus::SentKey && self.my_public_key > message.public_key {
            debug!(
                mine = format_args!("{:08X}", self.my_public_key),
                theirs = format_args!("{:08X}", message.public_key),
                "встречный KEY проигнорирован"
            );
            return Ok(None);
        }

        self.ciphers = None;
        self.params = message.params;
        self.other_public_key = message.public_key;

        self.generate_keypair(entropy)?;
        self.compute_shared_secret()?;

        info!(
            other_key = format_args!("{:08X}", self.other_public_key),
            "← получен KEY, отправка RSP"
        );

        let response = ResponseMessage {
            public_key: self.my_public_key,
        }
        .encode();

        self.sent_key = None;
        self.answered_key = Some((*message, response.clone()));
        self.start_session();
        Ok(Some(response))
    }

    /// Обработать RSP собеседника (допустимо только в `SentKey`)
    pub fn on_response_received(&mut self, peer_public: u32) -> Result<()> {
        if self.status != SessionStatus::SentKey {
            return Err(HandshakeError::OutOfOrder {
                kind: MessageKind::Rsp,
                status: self.status,
            }
            .into());
        }

        self.other_public_key = peer_public;
        self.compute_shared_secret()?;
        self.sent_key = None;

        info!(
            other_key = format_args!("{:08X}", self.other_public_key),
            "← получен RSP"
        );

        self.start_session();
        Ok(())
    }

    /// Перевести сессию в `Failed`, уничтожив генераторы
    pub fn fail(&mut self) {
        if self.status != SessionStatus::Failed {
            warn!(previous = ?self.status, "сессия переведена в Failed");
        }
        self.ciphers = None;
        self.sent_key = None;
        self.answered_key = None;
        self.shared_secret.zeroize();
        self.status = SessionStatus::Failed;
    }

    /// Зашифровать один байт исходящим генератором
    pub fn encrypt_byte(&mut self, byte: u8) -> Result<u8> {
        Ok(self.ciphers_mut()?.mine.apply(byte))
    }

    /// Расшифровать один байт входящим генератором
    pub fn decrypt_byte(&mut self, byte: u8) -> Result<u8> {
        Ok(self.ciphers_mut()?.other.apply(byte))
    }

    /// Зашифровать блок исходящим генератором
    pub fn encrypt_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let ciphers = self.ciphers_mut()?;
        ciphers.mine.apply_in_place(block);
        ciphers.sent_blocks = ciphers.sent_blocks.wrapping_add(1);
        Ok(())
    }

    /// Расшифровать блок входящим генератором
    pub fn decrypt_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        let ciphers = self.ciphers_mut()?;
        ciphers.other.apply_in_place(block);
        ciphers.received_blocks = ciphers.received_blocks.wrapping_add(1);
        Ok(())
    }

    /// Засеять оба генератора общим секретом и перейти в `Ready`
    pub(crate) fn start_session(&mut self) {
        self.ciphers = Some(SessionCiphers {
            mine: Keystream::with_seed(self.shared_secret),
            other: Keystream::with_seed(self.shared_secret),
            sent_blocks: 0,
            received_blocks: 0,
        });
        self.status = SessionStatus::Ready;
        info!("✓ сессия установлена");
    }

    fn ciphers_mut(&mut self) -> Result<&mut SessionCiphers> {
        let status = self.status;
        self.ciphers
            .as_mut()
            .ok_or_else(|| HandshakeError::NotReady(status).into())
    }

    /// Новая ключевая пара; публичный ключ отличается от предыдущего,
    /// иначе собеседник принял бы новый KEY за повтор старого
    fn generate_keypair<E: EntropySource>(&mut self, entropy: &mut E) -> Result<()> {
        let previous = self.my_public_key;
        self.keygen.seed(entropy.seed_word());

        for _ in 0..KEYGEN_ATTEMPTS {
            self.my_private_key = self.keygen.next_u32();
            self.my_public_key = pow_mod(
                self.params.generator,
                self.my_private_key,
                self.params.prime_modulus,
            )?;
            if self.my_public_key != previous {
                break;
            }
        }
        Ok(())
    }

    fn compute_shared_secret(&mut self) -> Result<()> {
        self.shared_secret = pow_mod(
            self.other_public_key,
            self.my_private_key,
            self.params.prime_modulus,
        )?;
        Ok(())
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.my_private_key.zeroize();
        self.shared_secret.zeroize();
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("params", &self.params)
            .field("status", &self.status)
            .field("my_public_key", &self.my_public_key)
            .field("other_public_key", &self.other_public_key)
            .finish_non_exhaustive()
    }
}
