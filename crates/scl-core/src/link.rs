//! Защищённый канал: парсер + сессия + обработчики сообщений
//!
//! [`SecureLink`] не выполняет ввод-вывод сам. Входящие байты передаются в
//! [`SecureLink::feed_byte`] по одному, исходящие кадры записываются в
//! переданный [`ByteSink`]. Владельцем канала является единственный цикл управления,
//! поэтому никакой синхронизации внутри нет.

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, warn};

use crate::entropy::EntropySource;
use crate::error::{LinkError, Result};
use crate::frame::{
    Frame, FrameParser, KeyMessage, MessageKind, ParseEvent, ResponseMessage, BLOCK_SIZE,
};
use crate::outgoing::{OutgoingMessage, Pacer, Pacing};
use crate::session::{DhParameters, SessionState, SessionStatus};

/// Приёмник исходящих байтов (запись в транспорт)
pub trait ByteSink {
    /// Передать байты в транспорт
    fn send(&mut self, bytes: &[u8]);
}

impl ByteSink for Vec<u8> {
    fn send(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl ByteSink for BytesMut {
    fn send(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Событие, о котором нужно сообщить владельцу канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Сессия установлена
    SessionEstablished {
        /// Свой публичный ключ
        my_public_key: u32,
        /// Публичный ключ собеседника
        other_public_key: u32,
    },
    /// Расшифрованный текст из одного блока
    Plaintext(Bytes),
    /// Получен кадр до установления сессии: отправлен KEY
    ///
    /// Если handshake уже идёт, повторяется ранее отправленный KEY.
    Rehandshake(MessageKind),
}

/// Защищённый канал одной стороны
pub struct SecureLink<E> {
    session: SessionState,
    parser: FrameParser,
    entropy: E,
    pacing: Pacing,
}

impl<E: EntropySource> SecureLink<E> {
    /// Создать канал в состоянии `NeedInit`
    pub fn new(params: DhParameters, entropy: E, pacing: Pacing) -> Self {
        Self {
            session: SessionState::new(params),
            parser: FrameParser::new(),
            entropy,
            pacing,
        }
    }

    /// Состояние сессии
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Доступ к сессии (только чтение)
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Пауза между исходящими блоками
    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Начать handshake и отправить KEY
    pub fn begin_handshake<S: ByteSink>(&mut self, sink: &mut S) -> Result<()> {
        let key = self.session.begin_handshake(&mut self.entropy)?;
        sink.send(&key);
        Ok(())
    }

    /// Обработать один входящий байт
    ///
    /// Ошибки описывают отброшенные кадры; канал остаётся работоспособным и
    /// готов к следующему байту. После `TerminatorMismatch` сессия уже
    /// находится в `Failed`.
    pub fn feed_byte<S: ByteSink>(&mut self, byte: u8, sink: &mut S) -> Result<Option<LinkEvent>> {
        let event = match self.parser.feed_byte(byte, self.session.status()) {
            Ok(event) => event,
            Err(e) => {
                self.session.fail();
                error!("Целостность кадра нарушена: {}", e);
                return Err(e.into());
            }
        };

        match event {
            None => Ok(None),
            Some(ParseEvent::SelfHeal(kind)) => {
                match self.session.outstanding_key() {
                    Some(key) => {
                        debug!(tag = %kind, "кадр до установления сессии, KEY отправлен повторно");
                        sink.send(&key);
                    }
                    None => {
                        warn!(
                            tag = %kind,
                            status = ?self.session.status(),
                            "кадр до установления сессии, повторный handshake"
                        );
                        self.begin_handshake(sink)?;
                    }
                }
                Ok(Some(LinkEvent::Rehandshake(kind)))
            }
            Some(ParseEvent::Frame(frame)) => self.dispatch(frame, sink),
        }
    }

    /// Обработать все доступные байты
    ///
    /// Ошибки отдельных кадров не прерывают обработку: они возвращаются
    /// вместе с событиями в порядке возникновения.
    pub fn feed<S: ByteSink>(&mut self, bytes: &[u8], sink: &mut S) -> Vec<Result<LinkEvent>> {
        bytes
            .iter()
            .filter_map(|&byte| self.feed_byte(byte, sink).transpose())
            .collect()
    }

    /// Подготовить исходящее сообщение для отправки с внешней паузой
    pub fn outgoing<'a>(&'a mut self, text: &'a [u8]) -> Result<OutgoingMessage<'a>> {
        OutgoingMessage::new(&mut self.session, text)
    }

    /// Зашифровать текст и отправить его блоками с паузой между кадрами
    ///
    /// Возвращает количество отправленных блоков.
    pub fn encrypt_and_send<S: ByteSink, P: Pacer>(
        &mut self,
        text: &[u8],
        sink: &mut S,
        pacer: &mut P,
    ) -> Result<usize> {
        let delay = self.pacing.block_delay();
        let mut sent = 0;

        for frame in OutgoingMessage::new(&mut self.session, text)? {
            sink.send(&frame?);
            pacer.pause(delay);
            sent += 1;
        }

        debug!(blocks = sent, bytes = text.len(), "→ сообщение отправлено");
        Ok(sent)
    }

    fn dispatch<S: ByteSink>(&mut self, frame: Frame, sink: &mut S) -> Result<Option<LinkEvent>> {
        match frame.kind {
            MessageKind::Key => self.handle_key(frame.payload.as_bytes(), sink),
            MessageKind::Rsp => self.handle_response(frame.payload.as_bytes()),
            MessageKind::Msg => self.handle_message(frame.payload.as_bytes()),
        }
    }

    fn handle_key<S: ByteSink>(&mut self, payload: &[u8], sink: &mut S) -> Result<Option<LinkEvent>> {
        let message = KeyMessage::decode(payload)?;
        let repeated = self.session.is_answered_key(&message);

        match self.session.on_key_received(&message, &mut self.entropy)? {
            Some(response) => {
                sink.send(&response);
                if repeated {
                    return Ok(None);
                }
                Ok(Some(self.established()))
            }
            None => Ok(None),
        }
    }

    fn handle_response(&mut self, payload: &[u8]) -> Result<Option<LinkEvent>> {
        let message = ResponseMessage::decode(payload)?;
        self.session.on_response_received(message.public_key)?;
        Ok(Some(self.established()))
    }

    fn handle_message(&mut self, payload: &[u8]) -> Result<Option<LinkEvent>> {
        let mut block = [0u8; BLOCK_SIZE];
        if payload.len() != BLOCK_SIZE {
            return Err(LinkError::Other(format!(
                "блок MSG длиной {} вместо {}",
                payload.len(),
                BLOCK_SIZE
            )));
        }
        block.copy_from_slice(payload);

        self.session.decrypt_block(&mut block)?;

        // Дополнение нулями отрезается по первому нулевому байту
        let end = block.iter().position(|&b| b == 0).unwrap_or(BLOCK_SIZE);
        Ok(Some(LinkEvent::Plaintext(Bytes::copy_from_slice(&block[..end]))))
    }

    fn established(&self) -> LinkEvent {
        info!(
            my_key = format_args!("{:08X}", self.session.my_public_key()),
            other_key = format_args!("{:08X}", self.session.other_public_key()),
            "канал готов к передаче"
        );
        LinkEvent::SessionEstablished {
            my_public_key: self.session.my_public_key(),
            other_public_key: self.session.other_public_key(),
        }
    }
}

impl<E> std::fmt::Debug for SecureLink<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureLink")
            .field("session", &self.session)
            .field("read_state", &self.parser.read_state())
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::ScriptedEntropy;
    use crate::error::{FrameError, HandshakeError};
    use crate::frame::encode_msg;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingPacer {
        pauses: Vec<Duration>,
    }

    impl Pacer for CountingPacer {
        fn pause(&mut self, delay: Duration) {
            self.pauses.push(delay);
        }
    }

    fn link(noise: u16) -> SecureLink<ScriptedEntropy> {
        SecureLink::new(
            DhParameters::default(),
            ScriptedEntropy::new([noise]),
            Pacing::fixed(Duration::from_millis(5)),
        )
    }

    fn ok_events(results: Vec<Result<LinkEvent>>) -> Vec<LinkEvent> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    fn connected_pair() -> (SecureLink<ScriptedEntropy>, SecureLink<ScriptedEntropy>) {
        let mut alice = link(0xA11C);
        let mut bob = link(0x0B0B);

        let mut to_bob = Vec::new();
        alice.begin_handshake(&mut to_bob).unwrap();

        let mut to_alice = Vec::new();
        bob.feed(&to_bob, &mut to_alice);
        alice.feed(&to_alice, &mut Vec::new());

        assert_eq!(alice.status(), SessionStatus::Ready);
        assert_eq!(bob.status(), SessionStatus::Ready);
        (alice, bob)
    }

    #[test]
    fn test_handshake_over_bytes() {
        let mut alice = link(0xA11C);
        let mut bob = link(0x0B0B);

        let mut to_bob = Vec::new();
        alice.begin_handshake(&mut to_bob).unwrap();
        assert_eq!(alice.status(), SessionStatus::SentKey);
        assert_eq!(to_bob.len(), MessageKind::Key.frame_len());

        let mut to_alice = Vec::new();
        let bob_events = ok_events(bob.feed(&to_bob, &mut to_alice));
        assert_eq!(
            bob_events,
            vec![LinkEvent::SessionEstablished {
                my_public_key: bob.session().my_public_key(),
                other_public_key: alice.session().my_public_key(),
            }]
        );
        assert_eq!(to_alice.len(), MessageKind::Rsp.frame_len());

        let alice_events = ok_events(alice.feed(&to_alice, &mut Vec::new()));
        assert_eq!(alice_events.len(), 1);

        assert_eq!(alice.session().shared_secret(), bob.session().shared_secret());
    }

    #[test]
    fn test_message_round_trip_with_pacing() {
        let (mut alice, mut bob) = connected_pair();

        let text = b"Hello from the other side of the serial line!";
        let mut wire = Vec::new();
        let mut pacer = CountingPacer::default();
        let sent = alice.encrypt_and_send(text, &mut wire, &mut pacer).unwrap();

        assert_eq!(sent, 2);
        assert_eq!(pacer.pauses, vec![Duration::from_millis(5); 2]);
        assert_eq!(wire.len(), 2 * MessageKind::Msg.frame_len());

        let received: Vec<u8> = ok_events(bob.feed(&wire, &mut Vec::new()))
            .into_iter()
            .flat_map(|event| match event {
                LinkEvent::Plaintext(bytes) => bytes.to_vec(),
                other => panic!("неожиданное событие {:?}", other),
            })
            .collect();
        assert_eq!(&received[..], &text[..]);
        assert_eq!(bob.session().other_message_index(), 2);
    }

    #[test]
    fn test_both_directions_stay_in_lock_step() {
        let (mut alice, mut bob) = connected_pair();
        let mut pacer = CountingPacer::default();

        for round in 0..5u8 {
            let mut wire = Vec::new();
            let text = vec![b'a' + round; 10 + round as usize * 20];
            alice.encrypt_and_send(&text, &mut wire, &mut pacer).unwrap();
            let got: Vec<u8> = ok_events(bob.feed(&wire, &mut Vec::new()))
                .into_iter()
                .flat_map(|e| match e {
                    LinkEvent::Plaintext(b) => b.to_vec(),
                    _ => Vec::new(),
                })
                .collect();
            assert_eq!(got, text);

            let mut wire = Vec::new();
            bob.encrypt_and_send(b"ack", &mut wire, &mut pacer).unwrap();
            let events = ok_events(alice.feed(&wire, &mut Vec::new()));
            assert_eq!(events, vec![LinkEvent::Plaintext(Bytes::from_static(b"ack"))]);
        }
    }

    #[test]
    fn test_send_before_ready_fails() {
        let mut alice = link(1);
        let mut wire = Vec::new();
        let result = alice.encrypt_and_send(b"hi", &mut wire, &mut CountingPacer::default());
        assert!(matches!(
            result,
            Err(LinkError::HandshakeError(HandshakeError::NotReady(SessionStatus::NeedInit)))
        ));
        assert!(wire.is_empty());
    }

    #[test]
    fn test_msg_before_ready_triggers_rehandshake() {
        let mut bob = link(0x0B0B);
        let mut reply = Vec::new();

        let events = ok_events(bob.feed(&encode_msg(&[0x55; BLOCK_SIZE]), &mut reply));

        assert_eq!(events[0], LinkEvent::Rehandshake(MessageKind::Msg));
        assert_eq!(bob.status(), SessionStatus::SentKey);
        assert_eq!(&reply[..3], b"KEY");
        assert_eq!(reply.len(), MessageKind::Key.frame_len());
    }

    #[test]
    fn test_repeated_self_heal_resends_same_key() {
        let mut alice = link(0xA11C);
        let mut bob = link(0x0B0B);

        let mut wire = encode_msg(&[0x55; BLOCK_SIZE]).to_vec();
        wire.extend_from_slice(&encode_msg(&[0x66; BLOCK_SIZE]));

        let mut keys = Vec::new();
        let events = ok_events(bob.feed(&wire, &mut keys));
        assert_eq!(
            events,
            vec![
                LinkEvent::Rehandshake(MessageKind::Msg),
                LinkEvent::Rehandshake(MessageKind::Msg)
            ]
        );
        let key_len = MessageKind::Key.frame_len();
        assert_eq!(keys.len(), 2 * key_len);
        assert_eq!(keys[..key_len], keys[key_len..]);

        // Повтор KEY получает тот же RSP и не открывает новую сессию
        let mut responses = Vec::new();
        let events = ok_events(alice.feed(&keys, &mut responses));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LinkEvent::SessionEstablished { .. }));
        let rsp_len = MessageKind::Rsp.frame_len();
        assert_eq!(responses.len(), 2 * rsp_len);
        assert_eq!(responses[..rsp_len], responses[rsp_len..]);

        let results = bob.feed(&responses, &mut Vec::new());
        assert!(matches!(results[0], Ok(LinkEvent::SessionEstablished { .. })));
        assert!(matches!(
            results[1],
            Err(LinkError::HandshakeError(HandshakeError::OutOfOrder { .. }))
        ));
        assert_eq!(alice.session().shared_secret(), bob.session().shared_secret());
    }

    #[test]
    fn test_corrupted_terminator_fails_session() {
        let (mut alice, mut bob) = connected_pair();

        let mut wire = Vec::new();
        alice
            .encrypt_and_send(b"tamper", &mut wire, &mut CountingPacer::default())
            .unwrap();
        *wire.last_mut().unwrap() = 0x7E;

        let results = bob.feed(&wire, &mut Vec::new());
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(LinkError::FrameError(FrameError::TerminatorMismatch {
                kind: MessageKind::Msg,
                found: 0x7E
            }))
        ));
        assert_eq!(bob.status(), SessionStatus::Failed);
        assert_eq!(bob.session().shared_secret(), None);

        // Следующий MSG запускает восстановление
        let mut wire = Vec::new();
        alice
            .encrypt_and_send(b"again", &mut wire, &mut CountingPacer::default())
            .unwrap();
        let mut reply = Vec::new();
        let events = bob.feed(&wire, &mut reply);
        assert!(matches!(
            events.first(),
            Some(Ok(LinkEvent::Rehandshake(MessageKind::Msg)))
        ));
        assert_eq!(&reply[..3], b"KEY");

        // Alice отвечает на KEY, и сессия восстановлена
        let mut back = Vec::new();
        alice.feed(&reply, &mut back);
        bob.feed(&back, &mut Vec::new());
        assert_eq!(bob.status(), SessionStatus::Ready);
        assert_eq!(alice.session().shared_secret(), bob.session().shared_secret());
    }

    #[test]
    fn test_late_rsp_does_not_break_session() {
        let (mut alice, _bob) = connected_pair();

        let stray = ResponseMessage { public_key: 99 }.encode();
        let results = alice.feed(&stray, &mut Vec::new());

        assert!(matches!(
            &results[..],
            [Err(LinkError::HandshakeError(HandshakeError::OutOfOrder {
                kind: MessageKind::Rsp,
                status: SessionStatus::Ready
            }))]
        ));
        assert_eq!(alice.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_key_with_invalid_parameters_is_discarded() {
        let mut bob = link(3);
        let bogus = KeyMessage {
            params: DhParameters {
                prime_modulus: 10,
                generator: 50,
            },
            public_key: 7,
        }
        .encode();

        let mut reply = Vec::new();
        let results = bob.feed(&bogus, &mut reply);

        assert!(matches!(
            &results[..],
            [Err(LinkError::FrameError(FrameError::MalformedFrame {
                kind: MessageKind::Key,
                ..
            }))]
        ));
        assert!(reply.is_empty());
        assert_eq!(bob.status(), SessionStatus::NeedInit);
    }

    #[test]
    fn test_outgoing_for_external_pacing() {
        let (mut alice, mut bob) = connected_pair();

        let frames: Vec<Bytes> = alice
            .outgoing(b"paced by the caller")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 1);

        let events = ok_events(bob.feed(&frames[0], &mut Vec::new()));
        assert_eq!(
            events,
            vec![LinkEvent::Plaintext(Bytes::from_static(b"paced by the caller"))]
        );
    }
}
