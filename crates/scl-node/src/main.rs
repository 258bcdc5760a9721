//! SecureSerialLink Node CLI
//!
//! Узел защищённого канала с консольным чатом.

use clap::{Parser, Subcommand};
use scl_node::NodeConfig;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(name = "scl-node")]
#[command(about = "SecureSerialLink Node", long_about = None)]
struct Args {
    /// Путь к конфигурационному файлу
    #[arg(short, long, default_value = "scl-node.toml")]
    config: PathBuf,

    /// Уровень логирования (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Подкоманды
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Запустить узел
    Run,

    /// Генерация примера конфигурации
    GenerateConfig {
        /// Путь для сохранения
        #[arg(short, long, default_value = "scl-node.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Обработка подкоманд
    match args.command {
        Some(Commands::GenerateConfig { output }) => {
            if let Err(e) = generate_config(&output) {
                eprintln!("Ошибка генерации конфигурации: {}", e);
                std::process::exit(1);
            }
            println!("Конфигурация сохранена в: {}", output.display());
            return;
        }
        None | Some(Commands::Run) => {
            // Продолжаем с запуском
        }
    }

    // Загрузка конфигурации
    let config = match NodeConfig::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Попытка автоматически создать конфигурацию
            if !args.config.exists() {
                println!("⚠ Конфигурационный файл не найден: {}", args.config.display());
                println!("📝 Создание конфигурации по умолчанию...");

                if let Err(gen_err) = generate_config(&args.config) {
                    eprintln!("Ошибка создания конфигурации: {}", gen_err);
                    std::process::exit(1);
                }

                println!("✓ Конфигурация создана: {}", args.config.display());
                println!();
                println!("📋 Необходимые действия:");
                println!("  1. На одной стороне оставьте mode = \"listen\"");
                println!("  2. На другой укажите mode = \"connect\" и адрес собеседника");
                println!("  3. Запустите узел снова: scl-node");
                println!();
                std::process::exit(0);
            } else {
                eprintln!("Ошибка загрузки конфигурации: {}", e);
                eprintln!("Проверьте файл: {}", args.config.display());
                std::process::exit(1);
            }
        }
    };

    // Инициализация логирования: --log-level, затем RUST_LOG, затем конфигурация
    let env_level = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = config.log_directive(args.log_level.as_deref(), env_level.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Некорректный уровень логирования {:?}: {}", directive, e);
        EnvFilter::new(&config.logging.level)
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Не удалось установить global subscriber: {}", e);
        std::process::exit(1);
    }

    info!("╔═══════════════════════════════════════════════════╗");
    info!("║      SecureSerialLink Node v{}                ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════╝");

    // Вывод конфигурации
    info!("Конфигурация:");
    info!("  • Режим: {:?}", config.transport.mode);
    info!("  • Адрес: {}", config.transport.address);
    info!(
        "  • DH: p={}, g={}",
        config.session.prime_modulus, config.session.generator
    );
    info!("  • Пауза между блоками: {:?}", config.pacing().block_delay());

    // Запуск узла, Ctrl+C для завершения
    tokio::select! {
        result = scl_node::run(config) => {
            if let Err(e) = result {
                error!("Критическая ошибка узла: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Получен сигнал Ctrl+C, завершение...");
        }
    }

    info!("Узел остановлен");
}

/// Генерация примера конфигурации
fn generate_config(path: &Path) -> Result<(), anyhow::Error> {
    let config = NodeConfig::default();
    config.to_file(path)?;
    Ok(())
}
