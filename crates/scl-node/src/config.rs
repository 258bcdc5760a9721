//! Конфигурация узла SecureSerialLink
//!
//! Этот модуль отвечает за загрузку и валидацию конфигурации узла.

use scl_core::outgoing::{Pacing, DEFAULT_BAUD_RATE};
use scl_core::session::{DhParameters, DEFAULT_GENERATOR, DEFAULT_PRIME_MODULUS};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

/// Конфигурация узла
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Настройки транспорта
    #[serde(default)]
    pub transport: TransportConfig,

    /// Параметры сессии (Диффи-Хеллман)
    #[serde(default)]
    pub session: SessionConfig,

    /// Пауза между блоками
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Настройки логирования
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Режим установления транспортного соединения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Ждать входящее соединение
    Listen,
    /// Подключиться к собеседнику
    Connect,
}

/// Настройки транспорта (TCP вместо последовательной линии)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Режим: listen или connect
    #[serde(default = "default_mode")]
    pub mode: TransportMode,

    /// Адрес для прослушивания или подключения
    #[serde(default = "default_address")]
    pub address: String,

    /// Таймаут подключения (секунды)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Параметры Диффи-Хеллмана, предлагаемые в KEY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Простой модуль p
    #[serde(default = "default_prime_modulus")]
    pub prime_modulus: u32,

    /// Генератор g
    #[serde(default = "default_generator")]
    pub generator: u32,
}

/// Настройки паузы между исходящими блоками
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Скорость линии (бод), по которой вычисляется пауза
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Явная пауза между блоками (мс), заменяет вычисленную
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_delay_ms: Option<u64>,
}

/// Настройки логирования
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Уровень логирования (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Значения по умолчанию
fn default_mode() -> TransportMode {
    TransportMode::Listen
}

fn default_address() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_prime_modulus() -> u32 {
    DEFAULT_PRIME_MODULUS
}

fn default_generator() -> u32 {
    DEFAULT_GENERATOR
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            address: default_address(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prime_modulus: default_prime_modulus(),
            generator: default_generator(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            block_delay_ms: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Загрузить конфигурацию из TOML файла
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Сохранить конфигурацию в TOML файл
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Валидация конфигурации
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        // Проверка адреса
        if self.transport.address.is_empty() {
            anyhow::bail!("Адрес транспорта не может быть пустым");
        }

        // Проверка параметров DH
        if self.session.generator <= 1 {
            anyhow::bail!("Генератор должен быть больше 1");
        }
        self.dh_parameters()?;

        // Проверка скорости линии
        if self.pacing.baud_rate == 0 {
            anyhow::bail!("Скорость линии не может быть 0");
        }

        // Проверка уровня логирования
        self.logging
            .level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("Неизвестный уровень логирования: {}", self.logging.level))?;

        Ok(())
    }

    /// Параметры Диффи-Хеллмана
    pub fn dh_parameters(&self) -> Result<DhParameters, anyhow::Error> {
        Ok(DhParameters::new(
            self.session.prime_modulus,
            self.session.generator,
        )?)
    }

    /// Пауза между исходящими блоками
    pub fn pacing(&self) -> Pacing {
        if let Some(ms) = self.pacing.block_delay_ms {
            return Pacing::fixed(Duration::from_millis(ms));
        }
        match NonZeroU32::new(self.pacing.baud_rate) {
            Some(baud) => Pacing::for_baud_rate(baud),
            None => Pacing::default(),
        }
    }

    /// Получить таймаут подключения
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.connect_timeout_secs)
    }

    /// Директива фильтра логов: `--log-level`, затем `RUST_LOG`, затем конфигурация
    pub fn log_directive(&self, cli: Option<&str>, env: Option<&str>) -> String {
        cli.or(env.filter(|value| !value.trim().is_empty()))
            .unwrap_or(&self.logging.level)
            .to_string()
    }
}
