//! # SCL Node Library
//!
//! Хостовый узел SecureSerialLink.
//!
//! Предоставляет API для:
//! - Установления транспортного соединения (TCP вместо UART)
//! - Обмена ключами и шифрованного чата через консоль
//! - Соблюдения паузы между блоками

pub mod config;
pub mod node;

pub use config::{NodeConfig, TransportMode};
pub use node::{ConsoleReply, Node, PacedOutbox};

use node::{spawn_console_reader, CONSOLE_QUEUE_CAPACITY};
use rand::rngs::OsRng;
use scl_core::{RngEntropy, SecureLink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Размер буфера чтения транспорта
const READ_BUFFER_SIZE: usize = 256;

/// Установить транспортное соединение согласно конфигурации
pub async fn open_transport(config: &NodeConfig) -> Result<TcpStream> {
    let address = &config.transport.address;

    let stream = match config.transport.mode {
        TransportMode::Listen => {
            let listener = TcpListener::bind(address).await?;
            info!("Ожидание собеседника на {}", listener.local_addr()?);

            let (stream, peer) = listener.accept().await?;
            info!("✓ Собеседник подключился: {}", peer);
            stream
        }
        TransportMode::Connect => {
            info!("Подключение к собеседнику: {}", address);

            let stream =
                tokio::time::timeout(config.connect_timeout(), TcpStream::connect(address))
                    .await??;

            info!("✓ TCP подключение установлено");
            stream
        }
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Запустить узел: транспорт, консоль и цикл управления
pub async fn run(config: NodeConfig) -> Result<()> {
    scl_core::frame::validate_handler_table()?;

    let link = SecureLink::new(config.dh_parameters()?, RngEntropy(OsRng), config.pacing());
    let mut node = Node::new(link);

    let mut stream = open_transport(&config).await?;

    let (lines_tx, lines_rx) = async_channel::bounded(CONSOLE_QUEUE_CAPACITY);
    spawn_console_reader(lines_tx)?;

    info!("Введите сообщение (команды: /rekey, /status)");

    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            // Байты из транспорта → парсер
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    info!("Соединение закрыто собеседником");
                    break;
                }

                for text in node.handle_inbound(&buf[..n]) {
                    stdout.write_all(&text).await?;
                }
                stdout.flush().await?;
            }

            // Строки консоли → политика отправки
            line = lines_rx.recv() => {
                let Ok(line) = line else {
                    info!("Консоль закрыта");
                    break;
                };

                match node.handle_line(&line) {
                    Ok(ConsoleReply::Status(status)) => println!("{}", status),
                    Ok(ConsoleReply::Rejected(status)) => {
                        eprintln!("✗ Сообщение не отправлено: сессия в состоянии {:?}, используйте /rekey", status);
                    }
                    Ok(reply) => debug!(?reply, "строка консоли обработана"),
                    Err(e) => error!("Ошибка отправки: {}", e),
                }
            }
        }

        node.outbox_mut().flush(&mut stream).await?;
    }

    // Дописать то, что уже поставлено в очередь
    node.outbox_mut().flush(&mut stream).await?;
    Ok(())
}
