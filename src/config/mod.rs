use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

// Главная структура конфигурации процесса: приложение, БД, Redis, политика бронирования
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingPolicy,
}

// Настройки приложения
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// "json" включает JSON-логи
    pub log_format: String,
}

// Настройки базы данных; без DATABASE_URL движок работает на хранилище в памяти
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

// Настройки Redis; без REDIS_URL события quick-sale уходят только в процесс и в лог
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub failure_threshold: u32,
    pub breaker_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .context("PORT must be a valid number")?,
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_segment_booking=debug,tower_http=info".to_string()),
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .context("DB_POOL_SIZE must be a valid number")?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number")?,
                breaker_timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number")?,
            },
            booking: BookingPolicy::load().context("invalid booking policy")?,
        })
    }
}

/// Бизнес-правила движка: сроки холдов, возвраты, no-show, овербукинг, тарифы, частота sweep'ов.
///
/// Слои: встроенные значения → `config/booking.toml` (если есть) → переменные `BOOKING_*`,
/// секции разделяются `__`, например `BOOKING_HOLDS__TTL_SECONDS=300`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub holds: HoldPolicy,
    pub cancellation: RefundPolicy,
    pub no_show: NoShowPolicy,
    pub overbooking: OverbookingPolicy,
    pub fares: FarePolicy,
    pub quick_sale: QuickSalePolicy,
    pub sweeps: SweepPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldPolicy {
    pub ttl_seconds: i64,
    pub max_per_user: usize,
}

// Ступени возврата по времени до отправления
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundPolicy {
    pub full_refund_hours: i64,
    pub partial_refund_hours: i64,
    pub partial_refund_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoShowPolicy {
    /// Сколько минут после отправления посадка ещё считается открытой
    pub grace_minutes: i64,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverbookingPolicy {
    /// Минимальная заполненность (0..1) для запроса
    pub threshold: f64,
    pub default_multiplier: f64,
    pub max_multiplier: f64,
    pub request_ttl_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarePolicy {
    pub default_base_price: Decimal,
    pub child_max_age: i32,
    pub senior_min_age: i32,
    pub dynamic_max_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickSalePolicy {
    pub window_hours: i64,
    pub redis_channel: String,
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPolicy {
    pub hold_expiry_secs: u64,
    pub no_show_secs: u64,
    pub overbooking_secs: u64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            holds: HoldPolicy {
                ttl_seconds: 600,
                max_per_user: 4,
            },
            cancellation: RefundPolicy {
                full_refund_hours: 48,
                partial_refund_hours: 2,
                partial_refund_percent: Decimal::from(50),
            },
            no_show: NoShowPolicy {
                grace_minutes: 15,
                fee: Decimal::from(5000),
            },
            overbooking: OverbookingPolicy {
                threshold: 0.95,
                default_multiplier: 1.1,
                max_multiplier: 1.1,
                request_ttl_minutes: 30,
            },
            fares: FarePolicy {
                default_base_price: Decimal::from(50000),
                child_max_age: 12,
                senior_min_age: 60,
                dynamic_max_multiplier: 1.5,
            },
            quick_sale: QuickSalePolicy {
                window_hours: 24,
                redis_channel: "quick_sale.segments".to_string(),
                broadcast_capacity: 1024,
            },
            sweeps: SweepPolicy {
                hold_expiry_secs: 30,
                no_show_secs: 300,
                overbooking_secs: 60,
            },
        }
    }
}

impl BookingPolicy {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&BookingPolicy::default())?)
            .add_source(config::File::with_name("config/booking").required(false))
            .add_source(
                config::Environment::with_prefix("BOOKING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
