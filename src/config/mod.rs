use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub engine: EngineConfig,
    pub payment: PaymentConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки движка бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Автоматически продвигать лист ожидания при освобождении мест.
    /// При false освободившиеся места ждут явного подтверждения
    /// через confirm_waitlist.
    pub waitlist_promotion_enabled: bool,
    /// Создавать нулевой платёж со статусом success при брони
    /// бесплатного мероприятия.
    pub free_event_auto_payment: bool,
}

// Настройки платежей
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub default_currency: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "event_booking=debug,tower_http=debug".to_string()),
            },
            engine: EngineConfig {
                waitlist_promotion_enabled: env::var("WAITLIST_PROMOTION_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("WAITLIST_PROMOTION_ENABLED must be true or false"),
                free_event_auto_payment: env::var("FREE_EVENT_AUTO_PAYMENT")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("FREE_EVENT_AUTO_PAYMENT must be true or false"),
            },
            payment: PaymentConfig {
                default_currency: env::var("PAYMENT_DEFAULT_CURRENCY")
                    .unwrap_or_else(|_| "RUB".to_string()),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                environment: "development".to_string(),
                rust_log: "event_booking=debug".to_string(),
            },
            engine: EngineConfig {
                waitlist_promotion_enabled: true,
                free_event_auto_payment: true,
            },
            payment: PaymentConfig {
                default_currency: "RUB".to_string(),
            },
        }
    }
}
