//! Exchange adapter contract.
//!
//! One order-lifecycle contract with two implementations: the live adapter
//! delegating to a venue client, and the per-run backtest simulator. Every
//! operation before `connect()` fails `NotConnected`; `connect()` is
//! idempotent.

pub mod live;
pub mod plugins;

pub use live::LiveAdapter;
pub use plugins::{discover_manifests, AdapterManifest, AdapterPlugins};

use crate::error::CoreResult;
use crate::models::{OrderIntent, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Submission outcome as reported by the venue or simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub success: bool,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl SubmitResult {
    pub fn accepted(exchange_order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            exchange_order_id: Some(exchange_order_id.into()),
            status: OrderStatus::Accepted,
            error_code: None,
            error_message: None,
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exchange_order_id: None,
            status: OrderStatus::Rejected,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Venue-side view of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub filled_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_avg_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Idempotent.
    async fn connect(&self) -> CoreResult<()>;
    async fn disconnect(&self) -> CoreResult<()>;
    fn is_connected(&self) -> bool;
    async fn submit_order(&self, intent: &OrderIntent) -> CoreResult<SubmitResult>;
    async fn cancel_order(&self, exchange_order_id: &str) -> CoreResult<bool>;
    async fn get_order(&self, exchange_order_id: &str) -> CoreResult<Option<ExchangeOrder>>;
}
