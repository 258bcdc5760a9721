//! Формат кадров и инкрементальный парсер
//!
//! Кадр на проводе:
//! ```text
//! ┌───────────────┬──────────────────────────────┬──────────────┐
//! │  Tag (3, ASCII)│  Payload (фиксированная длина) │ Terminator 0x00│
//! └───────────────┴──────────────────────────────┴──────────────┘
//!
//! KEY: prime_modulus (u32 BE) | generator (u32 BE) | public_key (u32 BE)
//! RSP: public_key (u32 BE)
//! MSG: 32 байта шифротекста (последний блок дополнен нулями)
//! ```
//!
//! Пакетизации и подтверждений нет: парсер получает поток по одному байту и
//! собирает кадры в кольцевом буфере, никогда не ожидая следующего байта.
//!
//! Известное ограничение: пока парсер ищет тег, любые три подряд идущих
//! байта, совпавшие с тегом, начинают кадр. Мусор на линии (или тело кадра,
//! отброшенного при самовосстановлении) может дать ложное срабатывание;
//! такой кадр затем отбрасывается проверкой терминатора.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::{debug, trace, warn};

use crate::error::FrameError;
use crate::ring_buffer::RingBuffer;
use crate::session::{DhParameters, SessionStatus};

/// Длина тега
pub const TAG_LEN: usize = 3;

/// Байт-терминатор кадра
pub const TERMINATOR: u8 = 0x00;

/// Размер блока сообщения (payload кадра MSG)
pub const BLOCK_SIZE: usize = 32;

/// Максимальная длина payload среди всех типов сообщений
pub const MAX_PAYLOAD_LEN: usize = BLOCK_SIZE;

/// Ёмкость кольцевого буфера приёма
pub const RING_CAPACITY: usize = 131;

// Payload вместе с терминатором обязан помещаться в окно буфера
const _: () = assert!(MAX_PAYLOAD_LEN + TAG_LEN + 1 < RING_CAPACITY);

/// Тип сообщения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Параметры DH и публичный ключ инициатора
    Key,
    /// Ответный публичный ключ
    Rsp,
    /// Зашифрованный блок данных
    Msg,
}

impl MessageKind {
    /// Все типы в порядке сопоставления тегов
    pub const ALL: [MessageKind; 3] = [MessageKind::Key, MessageKind::Rsp, MessageKind::Msg];

    /// ASCII тег
    pub fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            MessageKind::Key => b"KEY",
            MessageKind::Rsp => b"RSP",
            MessageKind::Msg => b"MSG",
        }
    }

    /// Длина payload
    pub fn payload_len(self) -> usize {
        match self {
            MessageKind::Key => 12,
            MessageKind::Rsp => 4,
            MessageKind::Msg => BLOCK_SIZE,
        }
    }

    /// Полная длина кадра на проводе
    pub fn frame_len(self) -> usize {
        TAG_LEN + self.payload_len() + 1
    }

    /// Найти тип по тегу
    pub fn from_tag(tag: &[u8; TAG_LEN]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Key => write!(f, "KEY"),
            MessageKind::Rsp => write!(f, "RSP"),
            MessageKind::Msg => write!(f, "MSG"),
        }
    }
}

/// Payload принятого кадра во фиксированном буфере на стеке
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    bytes: [u8; MAX_PAYLOAD_LEN],
    len: usize,
}

impl Payload {
    fn zeroed(len: usize) -> Self {
        debug_assert!(len <= MAX_PAYLOAD_LEN);
        Self {
            bytes: [0; MAX_PAYLOAD_LEN],
            len,
        }
    }

    /// Байты payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// Длина payload
    pub fn len(&self) -> usize {
        self.len
    }

    /// Пустой ли payload
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.as_bytes()).finish()
    }
}

/// Собранный кадр
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Тип сообщения
    pub kind: MessageKind,
    /// Payload без тега и терминатора
    pub payload: Payload,
}

/// Сообщение KEY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMessage {
    /// Параметры обмена ключами
    pub params: DhParameters,
    /// Публичный ключ отправителя
    pub public_key: u32,
}

impl KeyMessage {
    /// Сериализовать в кадр
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MessageKind::Key.frame_len());
        buf.put_slice(MessageKind::Key.tag());
        buf.put_u32(self.params.prime_modulus);
        buf.put_u32(self.params.generator);
        buf.put_u32(self.public_key);
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }

    /// Десериализовать из payload
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        check_len(MessageKind::Key, payload)?;

        let mut cursor = payload;
        let prime_modulus = cursor.get_u32();
        let generator = cursor.get_u32();
        let public_key = cursor.get_u32();

        let params =
            DhParameters::new(prime_modulus, generator).map_err(|e| FrameError::MalformedFrame {
                kind: MessageKind::Key,
                reason: e.to_string(),
            })?;

        Ok(Self { params, public_key })
    }
}

/// Сообщение RSP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMessage {
    /// Публичный ключ отвечающей стороны
    pub public_key: u32,
}

impl ResponseMessage {
    /// Сериализовать в кадр
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MessageKind::Rsp.frame_len());
        buf.put_slice(MessageKind::Rsp.tag());
        buf.put_u32(self.public_key);
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }

    /// Десериализовать из payload
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        check_len(MessageKind::Rsp, payload)?;
        let mut cursor = payload;
        Ok(Self {
            public_key: cursor.get_u32(),
        })
    }
}

/// Сериализовать зашифрованный блок в кадр MSG
pub fn encode_msg(block: &[u8; BLOCK_SIZE]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MessageKind::Msg.frame_len());
    buf.put_slice(MessageKind::Msg.tag());
    buf.put_slice(block);
    buf.put_u8(TERMINATOR);
    buf.freeze()
}

/// Проверить, что каждый кадр помещается в кольцевой буфер
///
/// Вызывается при запуске узла: payload вместе с тегом и терминатором
/// должен целиком находиться в окне буфера.
pub fn validate_handler_table() -> Result<(), FrameError> {
    for kind in MessageKind::ALL {
        if kind.frame_len() >= RING_CAPACITY {
            return Err(FrameError::PayloadTooLarge {
                kind,
                len: kind.payload_len(),
                capacity: RING_CAPACITY,
            });
        }
    }
    Ok(())
}

fn check_len(kind: MessageKind, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() != kind.payload_len() {
        return Err(FrameError::MalformedFrame {
            kind,
            reason: format!(
                "длина payload {} вместо {}",
                payload.len(),
                kind.payload_len()
            ),
        });
    }
    Ok(())
}

/// Состояние чтения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Ожидание начала кадра
    Idle,
    /// Поиск тега в последних трёх байтах
    ReceivingTag,
    /// Накопление payload распознанного кадра
    ReceivingBody,
}

/// Результат обработки байта
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Кадр собран и готов к обработке
    Frame(Frame),
    /// Тег не допустим в текущем состоянии сессии: требуется повторный handshake
    SelfHeal(MessageKind),
}

/// Инкрементальный парсер кадров
#[derive(Debug, Clone)]
pub struct FrameParser {
    ring: RingBuffer<RING_CAPACITY>,
    read_state: ReadState,
    current_tag: [u8; TAG_LEN],
    bytes_received: u16,
    active: Option<MessageKind>,
}

impl FrameParser {
    /// Создать парсер
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            read_state: ReadState::Idle,
            current_tag: [0; TAG_LEN],
            bytes_received: 0,
            active: None,
        }
    }

    /// Текущее состояние чтения
    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    /// Обработать один входящий байт
    ///
    /// `status`: состояние сессии, по которому решается, допустим ли
    /// распознанный тег. Ошибка `TerminatorMismatch` означает, что кадр
    /// отброшен, а парсер уже вернулся в `Idle`.
    pub fn feed_byte(
        &mut self,
        byte: u8,
        status: SessionStatus,
    ) -> Result<Option<ParseEvent>, FrameError> {
        self.ring.push(byte);

        match self.read_state {
            ReadState::Idle | ReadState::ReceivingTag => Ok(self.match_tag(status)),
            ReadState::ReceivingBody => self.accumulate_body(byte),
        }
    }

    fn match_tag(&mut self, status: SessionStatus) -> Option<ParseEvent> {
        self.read_state = ReadState::ReceivingTag;
        self.ring.copy_window(0, &mut self.current_tag);

        let kind = MessageKind::from_tag(&self.current_tag)?;
        trace!(tag = %kind, "тег распознан");

        if !status.admits(kind) {
            debug!(tag = %kind, ?status, "тег недопустим в текущем состоянии");
            self.reset();
            return Some(ParseEvent::SelfHeal(kind));
        }

        self.read_state = ReadState::ReceivingBody;
        self.active = Some(kind);
        self.bytes_received = 0;
        None
    }

    fn accumulate_body(&mut self, byte: u8) -> Result<Option<ParseEvent>, FrameError> {
        let Some(kind) = self.active else {
            self.reset();
            return Ok(None);
        };

        self.bytes_received = self.bytes_received.saturating_add(1);
        if usize::from(self.bytes_received) <= kind.payload_len() {
            return Ok(None);
        }

        // Байт на позиции терминатора
        self.reset();

        if byte != TERMINATOR {
            warn!(tag = %kind, found = byte, "кадр без терминатора отброшен");
            return Err(FrameError::TerminatorMismatch { kind, found: byte });
        }

        let mut payload = Payload::zeroed(kind.payload_len());
        self.ring.copy_window(-1, payload.as_mut_bytes());

        debug!(tag = %kind, len = payload.len(), "← кадр принят");
        Ok(Some(ParseEvent::Frame(Frame { kind, payload })))
    }

    fn reset(&mut self) {
        self.read_state = ReadState::Idle;
        self.active = None;
        self.bytes_received = 0;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(
        parser: &mut FrameParser,
        bytes: &[u8],
        status: SessionStatus,
    ) -> Vec<Result<Option<ParseEvent>, FrameError>> {
        bytes
            .iter()
            .map(|&byte| parser.feed_byte(byte, status))
            .filter(|result| !matches!(result, Ok(None)))
            .collect()
    }

    #[test]
    fn test_handler_table_fits_ring() {
        assert_eq!(validate_handler_table(), Ok(()));
    }

    #[test]
    fn test_tags_and_lengths() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
            assert!(kind.payload_len() <= MAX_PAYLOAD_LEN);
        }
        assert_eq!(MessageKind::from_tag(b"FOO"), None);
        assert_eq!(MessageKind::Key.frame_len(), 16);
        assert_eq!(MessageKind::Rsp.frame_len(), 8);
        assert_eq!(MessageKind::Msg.frame_len(), 36);
    }

    #[test]
    fn test_key_wire_format() {
        let message = KeyMessage {
            params: DhParameters::new(0x7FFF_FFFF, 16807).unwrap(),
            public_key: 0x0102_0304,
        };
        let encoded = message.encode();

        let expected = hex::decode("4b45597fffffff000041a70102030400").unwrap();
        assert_eq!(&encoded[..], &expected[..]);

        let decoded = KeyMessage::decode(&encoded[TAG_LEN..encoded.len() - 1]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_rsp_wire_format() {
        let encoded = ResponseMessage { public_key: 0xDEAD_BEEF }.encode();
        assert_eq!(&encoded[..], &hex::decode("525350deadbeef00").unwrap()[..]);
    }

    #[test]
    fn test_key_with_bad_generator_is_malformed() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&23u32.to_be_bytes());
        payload.extend_from_slice(&23u32.to_be_bytes());
        payload.extend_from_slice(&5u32.to_be_bytes());

        assert!(matches!(
            KeyMessage::decode(&payload),
            Err(FrameError::MalformedFrame { kind: MessageKind::Key, .. })
        ));
        assert!(matches!(
            ResponseMessage::decode(&payload),
            Err(FrameError::MalformedFrame { kind: MessageKind::Rsp, .. })
        ));
    }

    #[test]
    fn test_msg_frame_one_byte_at_a_time() {
        let mut block = [0u8; BLOCK_SIZE];
        for (i, byte) in block.iter_mut().enumerate() {
            // Нули внутри payload не должны завершать кадр
            *byte = if i % 5 == 0 { 0 } else { i as u8 };
        }

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &encode_msg(&block), SessionStatus::Ready);

        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(Some(ParseEvent::Frame(frame))) => {
                assert_eq!(frame.kind, MessageKind::Msg);
                assert_eq!(frame.payload.as_bytes(), &block[..]);
            }
            other => panic!("ожидался кадр, получено {:?}", other),
        }
        assert_eq!(parser.read_state(), ReadState::Idle);
    }

    #[test]
    fn test_bad_terminator_discards_frame() {
        let block = [0x41u8; BLOCK_SIZE];

        for bad in 1..=255u8 {
            let mut wire = encode_msg(&block).to_vec();
            *wire.last_mut().unwrap() = bad;

            let mut parser = FrameParser::new();
            let events = feed_all(&mut parser, &wire, SessionStatus::Ready);

            assert_eq!(
                events,
                vec![Err(FrameError::TerminatorMismatch {
                    kind: MessageKind::Msg,
                    found: bad
                })]
            );
            assert_eq!(parser.read_state(), ReadState::Idle);
        }
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut wire = b"noise\x07\x00ZZ".to_vec();
        wire.extend_from_slice(&ResponseMessage { public_key: 42 }.encode());

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire, SessionStatus::SentKey);

        assert_eq!(events.len(), 1);
        let Ok(Some(ParseEvent::Frame(frame))) = &events[0] else {
            panic!("ожидался кадр RSP");
        };
        assert_eq!(ResponseMessage::decode(frame.payload.as_bytes()).unwrap().public_key, 42);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = encode_msg(&[1u8; BLOCK_SIZE]).to_vec();
        wire.extend_from_slice(&encode_msg(&[2u8; BLOCK_SIZE]));

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire, SessionStatus::Ready);

        let payloads: Vec<Vec<u8>> = events
            .into_iter()
            .map(|event| match event {
                Ok(Some(ParseEvent::Frame(frame))) => frame.payload.as_bytes().to_vec(),
                other => panic!("неожиданное событие {:?}", other),
            })
            .collect();
        assert_eq!(payloads, vec![vec![1u8; BLOCK_SIZE], vec![2u8; BLOCK_SIZE]]);
    }

    #[test]
    fn test_tag_inside_payload_does_not_retrigger() {
        let mut block = [0xEEu8; BLOCK_SIZE];
        block[4..7].copy_from_slice(b"KEY");
        block[20..23].copy_from_slice(b"MSG");

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &encode_msg(&block), SessionStatus::Ready);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(Some(ParseEvent::Frame(f))) if f.payload.as_bytes() == &block[..]));
    }

    #[test]
    fn test_msg_before_ready_requests_self_heal() {
        for status in [SessionStatus::NeedInit, SessionStatus::SentKey, SessionStatus::Failed] {
            let mut parser = FrameParser::new();
            let events = feed_all(&mut parser, b"MSG", status);
            assert_eq!(events, vec![Ok(Some(ParseEvent::SelfHeal(MessageKind::Msg)))]);
            assert_eq!(parser.read_state(), ReadState::Idle);
        }
    }

    #[test]
    fn test_rsp_admitted_only_after_key_sent() {
        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, b"RSP", SessionStatus::NeedInit);
        assert_eq!(events, vec![Ok(Some(ParseEvent::SelfHeal(MessageKind::Rsp)))]);

        let mut parser = FrameParser::new();
        assert!(feed_all(&mut parser, b"RSP", SessionStatus::SentKey).is_empty());
        assert_eq!(parser.read_state(), ReadState::ReceivingBody);
    }

    #[test]
    fn test_key_admitted_in_every_state() {
        for status in [
            SessionStatus::NeedInit,
            SessionStatus::SentKey,
            SessionStatus::Ready,
            SessionStatus::Failed,
        ] {
            let mut parser = FrameParser::new();
            assert!(feed_all(&mut parser, b"KEY", status).is_empty());
            assert_eq!(parser.read_state(), ReadState::ReceivingBody);
        }
    }
}
