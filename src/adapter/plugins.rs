//! Adapter plugin discovery.
//!
//! Plugins advertise themselves with a static TOML manifest that is parsed
//! without executing any plugin code. Loading is on explicit request and
//! resolves the manifest's `class` to a venue client factory; only the
//! built-in paper client ships with the core.

use crate::adapter::live::VenueClient;
use crate::adapter::{ExchangeOrder, SubmitResult};
use crate::error::{CoreError, CoreResult};
use crate::models::{OrderIntent, OrderStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Static plugin metadata, discoverable by a parse-only scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub class: String,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Scan a directory for `*.toml` manifests. Unreadable or malformed files
/// are skipped with a warning; discovery never executes plugin code.
pub fn discover_manifests(dir: impl AsRef<Path>) -> Vec<AdapterManifest> {
    let mut manifests = Vec::new();
    let entries = match std::fs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.as_ref().display(), error = %e, "no plugin directory");
            return manifests;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable plugin manifest");
                continue;
            }
        };
        match toml::from_str::<AdapterManifest>(&text) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => warn!(path = %path.display(), error = %e, "malformed plugin manifest"),
        }
    }
    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    manifests
}

/// Discovered manifests plus on-request loading.
pub struct AdapterPlugins {
    manifests: Vec<AdapterManifest>,
}

impl AdapterPlugins {
    pub fn discover(dir: impl AsRef<Path>) -> Self {
        Self { manifests: discover_manifests(dir) }
    }

    /// A registry that only knows the built-in paper adapter.
    pub fn builtin() -> Self {
        Self {
            manifests: vec![AdapterManifest {
                id: "paper".to_string(),
                name: "Paper trading venue".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                class: "paper".to_string(),
                features: vec!["orders".to_string()],
            }],
        }
    }

    pub fn manifests(&self) -> &[AdapterManifest] {
        &self.manifests
    }

    /// Resolve a manifest id to a venue client. `kwargs` is passed to the
    /// factory; the paper client ignores it.
    pub fn load(&self, id: &str, _kwargs: &serde_json::Value) -> CoreResult<Box<dyn VenueClient>> {
        let manifest = self
            .manifests
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found(format!("adapter plugin {id}")))?;
        match manifest.class.as_str() {
            "paper" => Ok(Box::new(PaperVenueClient::default())),
            other => Err(CoreError::validation(format!(
                "no built-in factory for adapter class `{other}`"
            ))),
        }
    }
}

/// Accepts everything, fills nothing: the venue for paper runs.
#[derive(Default)]
pub struct PaperVenueClient {
    orders: Mutex<HashMap<String, ExchangeOrder>>,
}

#[async_trait]
impl VenueClient for PaperVenueClient {
    async fn open(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn submit(&self, intent: &OrderIntent) -> CoreResult<SubmitResult> {
        intent.validate()?;
        let exchange_order_id = Uuid::new_v4().to_string();
        self.orders.lock().insert(
            exchange_order_id.clone(),
            ExchangeOrder {
                exchange_order_id: exchange_order_id.clone(),
                status: OrderStatus::Accepted,
                filled_qty: Decimal::ZERO,
                filled_avg_price: None,
                updated_at: Utc::now(),
            },
        );
        Ok(SubmitResult::accepted(exchange_order_id))
    }

    async fn cancel(&self, exchange_order_id: &str) -> CoreResult<bool> {
        let mut orders = self.orders.lock();
        match orders.get_mut(exchange_order_id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fetch(&self, exchange_order_id: &str) -> CoreResult<Option<ExchangeOrder>> {
        Ok(self.orders.lock().get(exchange_order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_discovery_parses_manifests_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = std::fs::File::create(dir.path().join("alpaca.toml")).unwrap();
        writeln!(
            good,
            "id = \"alpaca\"\nname = \"Alpaca Markets\"\nversion = \"1.2.0\"\nclass = \"rest\"\nfeatures = [\"orders\", \"streaming\"]"
        )
        .unwrap();
        let mut bad = std::fs::File::create(dir.path().join("broken.toml")).unwrap();
        writeln!(bad, "this is not a manifest").unwrap();
        std::fs::File::create(dir.path().join("notes.txt")).unwrap();

        let manifests = discover_manifests(dir.path());
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].id, "alpaca");
        assert_eq!(manifests[0].features, vec!["orders", "streaming"]);
    }

    #[test]
    fn test_load_unknown_class_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("x.toml"),
            "id = \"x\"\nname = \"X\"\nversion = \"0.1\"\nclass = \"ffi\"\n",
        )
        .unwrap();
        let plugins = AdapterPlugins::discover(dir.path());
        assert!(plugins.load("x", &serde_json::Value::Null).is_err());
        assert!(plugins.load("missing", &serde_json::Value::Null).is_err());
    }

    #[tokio::test]
    async fn test_paper_client_lifecycle() {
        let plugins = AdapterPlugins::builtin();
        let venue = plugins.load("paper", &serde_json::Value::Null).unwrap();
        venue.open().await.unwrap();

        let intent = OrderIntent {
            run_id: Uuid::new_v4(),
            client_order_id: Some("k-1".to_string()),
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            qty: dec!(1),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            extended_hours: false,
        };
        let result = venue.submit(&intent).await.unwrap();
        let id = result.exchange_order_id.unwrap();

        let order = venue.fetch(&id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
        assert!(venue.cancel(&id).await.unwrap());
        assert!(!venue.cancel(&id).await.unwrap());
    }
}
