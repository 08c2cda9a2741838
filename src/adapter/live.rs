//! Live exchange adapter.
//!
//! Delegates order operations to an abstract venue client (concrete
//! exchange bindings live outside the core) and announces outcomes on the
//! bus: `orders.Created` on acceptance, `orders.Rejected` on failure or
//! timeout, and `orders.{Filled,PartiallyFilled,Cancelled,Rejected}` for
//! venue-side status updates.

use crate::adapter::{ExchangeAdapter, ExchangeOrder, SubmitResult};
use crate::bus::{Envelope, EventLog};
use crate::error::{CoreError, CoreResult};
use crate::models::{OrderIntent, OrderStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const PRODUCER: &str = "marvin.adapter";

/// Default per-operation venue timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Abstract venue contract. Implementations are supplied by adapter
/// plugins; only the paper client ships built in.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn open(&self) -> CoreResult<()>;
    async fn close(&self) -> CoreResult<()>;
    async fn submit(&self, intent: &OrderIntent) -> CoreResult<SubmitResult>;
    async fn cancel(&self, exchange_order_id: &str) -> CoreResult<bool>;
    async fn fetch(&self, exchange_order_id: &str) -> CoreResult<Option<ExchangeOrder>>;
}

/// Venue-side status change pushed by the adapter's polling or stream.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
}

pub struct LiveAdapter {
    run_id: Uuid,
    log: Arc<dyn EventLog>,
    venue: Box<dyn VenueClient>,
    connected: AtomicBool,
    op_timeout: Duration,
}

impl LiveAdapter {
    pub fn new(run_id: Uuid, log: Arc<dyn EventLog>, venue: Box<dyn VenueClient>) -> Arc<Self> {
        Self::with_timeout(run_id, log, venue, DEFAULT_OP_TIMEOUT)
    }

    pub fn with_timeout(
        run_id: Uuid,
        log: Arc<dyn EventLog>,
        venue: Box<dyn VenueClient>,
        op_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            log,
            venue,
            connected: AtomicBool::new(false),
            op_timeout,
        })
    }

    fn guard(&self) -> CoreResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        Ok(())
    }

    fn emit_rejected(&self, client_order_id: Option<&str>, reason: &str, code: Option<&str>, message: Option<&str>) {
        let envelope = Envelope::event(
            "orders.Rejected",
            json!({
                "order_id": client_order_id,
                "reason": reason,
                "error_code": code,
                "error_message": message,
            }),
        )
        .with_run_id(self.run_id)
        .with_producer(PRODUCER);
        if let Err(e) = self.log.append(envelope) {
            warn!(run_id = %self.run_id, error = %e, "failed to emit orders.Rejected");
        }
    }

    /// Surface one venue-side status transition on the bus.
    pub fn report_update(&self, update: &OrderUpdate) -> CoreResult<()> {
        let (event_type, payload) = match update.status {
            OrderStatus::Filled => (
                "orders.Filled",
                json!({
                    "order_id": update.exchange_order_id,
                    "client_order_id": update.client_order_id,
                    "filled_qty": update.filled_qty.to_string(),
                    "filled_avg_price": update.filled_avg_price.unwrap_or(Decimal::ZERO).to_string(),
                }),
            ),
            OrderStatus::Partial => (
                "orders.PartiallyFilled",
                json!({
                    "order_id": update.exchange_order_id,
                    "client_order_id": update.client_order_id,
                    "filled_qty": update.filled_qty.to_string(),
                    "filled_avg_price": update.filled_avg_price.unwrap_or(Decimal::ZERO).to_string(),
                }),
            ),
            OrderStatus::Cancelled => (
                "orders.Cancelled",
                json!({"order_id": update.exchange_order_id}),
            ),
            OrderStatus::Rejected => (
                "orders.Rejected",
                json!({
                    "order_id": update.exchange_order_id,
                    "reason": "venue_rejected",
                }),
            ),
            _ => return Ok(()),
        };
        self.log.append(
            Envelope::event(event_type, payload)
                .with_run_id(self.run_id)
                .with_producer(PRODUCER),
        )?;
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for LiveAdapter {
    async fn connect(&self) -> CoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.venue.open().await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(run_id = %self.run_id, "live adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> CoreResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.venue.close().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_order(&self, intent: &OrderIntent) -> CoreResult<SubmitResult> {
        if let Err(e) = self.guard() {
            self.emit_rejected(intent.client_order_id.as_deref(), "not_connected", None, None);
            return Err(e);
        }
        intent.validate()?;

        let result = match tokio::time::timeout(self.op_timeout, self.venue.submit(intent)).await {
            Err(_) => {
                warn!(run_id = %self.run_id, "venue submit timed out");
                self.emit_rejected(intent.client_order_id.as_deref(), "timeout", None, None);
                return Ok(SubmitResult::rejected("timeout", "venue submit timed out"));
            }
            Ok(Err(e)) => {
                self.emit_rejected(
                    intent.client_order_id.as_deref(),
                    "adapter_failure",
                    None,
                    Some(&e.to_string()),
                );
                return Err(e);
            }
            Ok(Ok(result)) => result,
        };

        if result.success {
            self.log.append(
                Envelope::event(
                    "orders.Created",
                    json!({
                        "order_id": result.exchange_order_id.clone().unwrap_or_default(),
                        "client_order_id": intent.client_order_id.clone().unwrap_or_default(),
                        "symbol": intent.symbol,
                        "side": intent.side.as_str(),
                        "qty": intent.qty.to_string(),
                    }),
                )
                .with_run_id(self.run_id)
                .with_producer(PRODUCER),
            )?;
        } else {
            self.emit_rejected(
                intent.client_order_id.as_deref(),
                "venue_rejected",
                result.error_code.as_deref(),
                result.error_message.as_deref(),
            );
        }
        Ok(result)
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> CoreResult<bool> {
        self.guard()?;
        let cancelled =
            match tokio::time::timeout(self.op_timeout, self.venue.cancel(exchange_order_id)).await {
                Err(_) => return Ok(false),
                Ok(result) => result?,
            };
        if cancelled {
            self.log.append(
                Envelope::event("orders.Cancelled", json!({"order_id": exchange_order_id}))
                    .with_run_id(self.run_id)
                    .with_producer(PRODUCER),
            )?;
        }
        Ok(cancelled)
    }

    async fn get_order(&self, exchange_order_id: &str) -> CoreResult<Option<ExchangeOrder>> {
        self.guard()?;
        self.venue.fetch(exchange_order_id).await
    }
}
