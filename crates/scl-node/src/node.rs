//! Узел защищённого канала
//!
//! Этот модуль отвечает за:
//! - Буферизацию исходящих кадров с паузой между блоками
//! - Политику консоли (очередь строк до установления сессии, команды)
//! - Кооперативный цикл управления поверх TCP соединения

use bytes::Bytes;
use scl_core::{ByteSink, EntropySource, LinkEvent, Pacer, SecureLink, SessionStatus};
use std::collections::VecDeque;
use std::io::BufRead;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Команда консоли: начать handshake заново
pub const REKEY_COMMAND: &str = "/rekey";

/// Команда консоли: показать состояние сессии
pub const STATUS_COMMAND: &str = "/status";

/// Ёмкость очереди строк консоли
pub const CONSOLE_QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
struct Segment {
    bytes: Bytes,
    delay: Duration,
}

/// Исходящий буфер: кадры и паузы после них
///
/// Реализует [`ByteSink`] и [`Pacer`] ядра: пауза привязывается к последнему
/// записанному кадру и выдерживается при [`PacedOutbox::flush`].
#[derive(Debug, Default)]
pub struct PacedOutbox {
    segments: VecDeque<Segment>,
}

impl PacedOutbox {
    /// Создать пустой буфер
    pub fn new() -> Self {
        Self::default()
    }

    /// Буфер пуст
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Количество байт в буфере
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.bytes.len()).sum()
    }

    /// Суммарная пауза, которая будет выдержана при отправке
    pub fn pending_delay(&self) -> Duration {
        self.segments.iter().map(|s| s.delay).sum()
    }

    /// Записать все кадры, выдерживая паузу после каждого
    pub async fn flush<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> std::io::Result<usize> {
        let mut written = 0;

        while let Some(segment) = self.segments.pop_front() {
            writer.write_all(&segment.bytes).await?;
            written += segment.bytes.len();

            if !segment.delay.is_zero() {
                writer.flush().await?;
                tokio::time::sleep(segment.delay).await;
            }
        }

        writer.flush().await?;
        Ok(written)
    }
}

impl ByteSink for PacedOutbox {
    fn send(&mut self, bytes: &[u8]) {
        self.segments.push_back(Segment {
            bytes: Bytes::copy_from_slice(bytes),
            delay: Duration::ZERO,
        });
    }
}

impl Pacer for PacedOutbox {
    fn pause(&mut self, delay: Duration) {
        if let Some(last) = self.segments.back_mut() {
            last.delay += delay;
        }
    }
}

/// Результат обработки строки консоли
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    /// Строка зашифрована и поставлена в буфер отправки
    Sent {
        /// Количество блоков
        blocks: usize,
    },
    /// Строка ожидает установления сессии
    Queued {
        /// Размер очереди
        pending: usize,
    },
    /// Сессия разорвана, строка отброшена
    Rejected(SessionStatus),
    /// Начат новый handshake
    Rekeyed,
    /// Текст состояния для вывода оператору
    Status(String),
    /// Пустая строка
    Ignored,
}

/// Узел: канал, исходящий буфер и очередь строк
pub struct Node<E> {
    link: SecureLink<E>,
    outbox: PacedOutbox,
    pending: VecDeque<Vec<u8>>,
}

impl<E: EntropySource> Node<E> {
    /// Создать узел поверх канала
    pub fn new(link: SecureLink<E>) -> Self {
        Self {
            link,
            outbox: PacedOutbox::new(),
            pending: VecDeque::new(),
        }
    }

    /// Канал узла
    pub fn link(&self) -> &SecureLink<E> {
        &self.link
    }

    /// Исходящий буфер
    pub fn outbox_mut(&mut self) -> &mut PacedOutbox {
        &mut self.outbox
    }

    /// Количество строк в очереди
    pub fn pending_lines(&self) -> usize {
        self.pending.len()
    }

    /// Обработать строку, введённую оператором
    pub fn handle_line(&mut self, line: &str) -> scl_core::Result<ConsoleReply> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);

        match line.trim() {
            "" => return Ok(ConsoleReply::Ignored),
            REKEY_COMMAND => {
                info!("Повторный handshake по команде оператора");
                self.link.begin_handshake(&mut self.outbox)?;
                return Ok(ConsoleReply::Rekeyed);
            }
            STATUS_COMMAND => return Ok(ConsoleReply::Status(self.status_line())),
            _ => {}
        }

        // Перевод строки передаётся вместе с текстом
        let mut text = Vec::with_capacity(line.len() + 1);
        text.extend_from_slice(line.as_bytes());
        text.push(b'\n');

        match self.link.status() {
            SessionStatus::NeedInit => {
                self.link.begin_handshake(&mut self.outbox)?;
                self.pending.push_back(text);
                Ok(ConsoleReply::Queued {
                    pending: self.pending.len(),
                })
            }
            SessionStatus::SentKey => {
                self.pending.push_back(text);
                Ok(ConsoleReply::Queued {
                    pending: self.pending.len(),
                })
            }
            SessionStatus::Ready => {
                let blocks = self.send_text(&text)?;
                Ok(ConsoleReply::Sent { blocks })
            }
            SessionStatus::Failed => {
                warn!("Сессия разорвана, строка отброшена");
                Ok(ConsoleReply::Rejected(SessionStatus::Failed))
            }
        }
    }

    /// Обработать байты, прочитанные из транспорта
    ///
    /// Возвращает расшифрованный текст в порядке поступления блоков.
    pub fn handle_inbound(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        let mut plaintext = Vec::new();

        for result in self.link.feed(bytes, &mut self.outbox) {
            match result {
                Ok(LinkEvent::Plaintext(text)) => plaintext.push(text),
                Ok(LinkEvent::SessionEstablished { .. }) => {
                    if let Err(e) = self.flush_pending() {
                        warn!("Не удалось отправить очередь: {}", e);
                    }
                }
                Ok(LinkEvent::Rehandshake(kind)) => {
                    debug!(tag = %kind, "→ отправлен KEY");
                }
                Err(e) if e.is_session_failure() => {
                    error!("Сессия разорвана: {}", e);
                }
                Err(e) => {
                    warn!("Кадр отброшен: {}", e);
                }
            }
        }

        plaintext
    }

    /// Строка состояния для команды `/status`
    pub fn status_line(&self) -> String {
        let session = self.link.session();
        format!(
            "состояние: {:?}, отправлено блоков: {}, принято блоков: {}, в очереди: {}",
            session.status(),
            session.my_message_index(),
            session.other_message_index(),
            self.pending.len()
        )
    }

    fn send_text(&mut self, text: &[u8]) -> scl_core::Result<usize> {
        let delay = self.link.pacing().block_delay();
        let mut blocks = 0;

        for frame in self.link.outgoing(text)? {
            self.outbox.send(&frame?);
            self.outbox.pause(delay);
            blocks += 1;
        }

        debug!(blocks, bytes = text.len(), "→ строка поставлена в очередь отправки");
        Ok(blocks)
    }

    fn flush_pending(&mut self) -> scl_core::Result<usize> {
        let mut sent = 0;
        while let Some(text) = self.pending.pop_front() {
            self.send_text(&text)?;
            sent += 1;
        }
        if sent > 0 {
            info!("→ отправлено строк из очереди: {}", sent);
        }
        Ok(sent)
    }
}

/// Запустить поток чтения консоли
///
/// Строки stdin передаются в канал; поток завершается при закрытии stdin
/// или получателя.
pub fn spawn_console_reader(tx: async_channel::Sender<String>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send_blocking(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}
