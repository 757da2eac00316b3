use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Статус платежа. Переходы строго вперёд:
/// pending -> success | failed, success -> refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Yookassa,
    Free,
    Cash,
    Support,
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentProvider::Yookassa => "yookassa",
            PaymentProvider::Free => "free",
            PaymentProvider::Cash => "cash",
            PaymentProvider::Support => "support",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    /// None для платежей, не привязанных к мероприятию.
    pub event_id: Option<i64>,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    /// Корреляционный ключ внешнего провайдера, уникален если задан.
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub confirmed_by: Option<i64>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
