//! Schema registry: process-wide `type -> (payload schema, version)` map.
//!
//! Emit paths validate payloads against the registered schema; a failed
//! validation is fatal to the emit. Read paths pass unknown types through
//! with `headers.unknown_type=true` and let receivers choose.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Primitive payload field kinds. Decimal fields travel as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    DecimalString,
    Integer,
    Boolean,
    Timestamp,
    Object,
    Array,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::DecimalString => value
                .as_str()
                .map(|s| s.parse::<rust_decimal::Decimal>().is_ok())
                .unwrap_or(false),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Timestamp => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, required: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSchema {
    pub version: u32,
    pub fields: Vec<FieldSpec>,
}

impl PayloadSchema {
    pub fn v1(fields: Vec<FieldSpec>) -> Self {
        Self { version: 1, fields }
    }

    fn check(&self, event_type: &str, payload: &Value) -> CoreResult<()> {
        let object = match payload {
            Value::Object(map) => map,
            Value::Null if self.fields.iter().all(|f| !f.required) => return Ok(()),
            _ => {
                return Err(CoreError::InvalidPayload {
                    event_type: event_type.to_string(),
                    reason: "payload must be a JSON object".to_string(),
                })
            }
        };

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(CoreError::InvalidPayload {
                        event_type: event_type.to_string(),
                        reason: format!("missing required field `{}`", field.name),
                    })
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !field.kind.accepts(value) {
                        return Err(CoreError::InvalidPayload {
                            event_type: event_type.to_string(),
                            reason: format!("field `{}` has wrong kind", field.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, PayloadSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the full built-in event catalogue.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register_catalogue();
        registry
    }

    /// Idempotent registration. Re-registering the same `(type, version)`
    /// with a differing schema fails with `SchemaConflict`.
    pub fn register(&self, event_type: &str, schema: PayloadSchema) -> CoreResult<()> {
        let mut schemas = self.schemas.write();
        match schemas.get(event_type) {
            Some(existing) if existing.version == schema.version && *existing != schema => {
                Err(CoreError::SchemaConflict {
                    event_type: event_type.to_string(),
                    version: schema.version,
                })
            }
            Some(existing) if existing.version >= schema.version => Ok(()),
            _ => {
                schemas.insert(event_type.to_string(), schema);
                Ok(())
            }
        }
    }

    /// Validate an emit. Returns the schema version, or `None` for types
    /// with no registered schema (passed through unvalidated).
    pub fn validate(&self, event_type: &str, payload: &Value) -> CoreResult<Option<u32>> {
        let schemas = self.schemas.read();
        match schemas.get(event_type) {
            Some(schema) => {
                schema.check(event_type, payload)?;
                Ok(Some(schema.version))
            }
            None => Ok(None),
        }
    }

    pub fn is_known(&self, event_type: &str) -> bool {
        self.schemas.read().contains_key(event_type)
    }

    fn register_catalogue(&self) {
        use FieldKind::*;

        let entries: Vec<(&str, Vec<FieldSpec>)> = vec![
            // clock.*
            (
                "clock.Tick",
                vec![
                    FieldSpec::required("ts", Timestamp),
                    FieldSpec::required("bar_index", Integer),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::optional("is_backtest", Boolean),
                ],
            ),
            // strategy.*
            (
                "strategy.FetchWindow",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("from", Timestamp),
                    FieldSpec::required("to", Timestamp),
                ],
            ),
            (
                "strategy.PlaceRequest",
                vec![
                    FieldSpec::required("client_order_id", String),
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("side", String),
                    FieldSpec::required("order_type", String),
                    FieldSpec::required("qty", DecimalString),
                    FieldSpec::optional("limit_price", DecimalString),
                    FieldSpec::optional("stop_price", DecimalString),
                    FieldSpec::required("time_in_force", String),
                    FieldSpec::optional("extended_hours", Boolean),
                ],
            ),
            ("strategy.DecisionMade", vec![FieldSpec::optional("detail", Object)]),
            // data.*
            (
                "data.WindowReady",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("bars", Array),
                ],
            ),
            (
                "data.WindowChunk",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("chunk_index", Integer),
                    FieldSpec::required("bars", Array),
                ],
            ),
            (
                "data.WindowComplete",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("chunk_count", Integer),
                ],
            ),
            // market.*
            ("market.Quote", vec![FieldSpec::required("symbol", String)]),
            ("market.Trade", vec![FieldSpec::required("symbol", String)]),
            ("market.Bar", vec![FieldSpec::required("symbol", String)]),
            // orders.*
            (
                "orders.Created",
                vec![
                    FieldSpec::required("order_id", String),
                    FieldSpec::required("client_order_id", String),
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("side", String),
                    FieldSpec::required("qty", DecimalString),
                ],
            ),
            (
                "orders.PlaceRequest",
                vec![
                    FieldSpec::required("client_order_id", String),
                    FieldSpec::required("symbol", String),
                ],
            ),
            ("orders.Ack", vec![FieldSpec::required("order_id", String)]),
            ("orders.Placed", vec![FieldSpec::required("order_id", String)]),
            (
                "orders.Filled",
                vec![
                    FieldSpec::required("order_id", String),
                    FieldSpec::required("filled_qty", DecimalString),
                    FieldSpec::required("filled_avg_price", DecimalString),
                    FieldSpec::optional("commission", DecimalString),
                    FieldSpec::optional("slippage", DecimalString),
                    FieldSpec::optional("bar_index", Integer),
                ],
            ),
            (
                "orders.PartiallyFilled",
                vec![
                    FieldSpec::required("order_id", String),
                    FieldSpec::required("filled_qty", DecimalString),
                    FieldSpec::required("filled_avg_price", DecimalString),
                ],
            ),
            ("orders.Cancelled", vec![FieldSpec::required("order_id", String)]),
            (
                "orders.Rejected",
                vec![
                    FieldSpec::optional("order_id", String),
                    FieldSpec::required("reason", String),
                    FieldSpec::optional("error_code", String),
                    FieldSpec::optional("error_message", String),
                ],
            ),
            // run.*
            ("run.Created", vec![FieldSpec::required("strategy_id", String)]),
            ("run.Started", vec![FieldSpec::required("mode", String)]),
            ("run.StopRequested", vec![]),
            ("run.Stopped", vec![]),
            ("run.Completed", vec![]),
            ("run.Error", vec![FieldSpec::required("reason", String)]),
            ("run.UnknownRouted", vec![FieldSpec::required("original_type", String)]),
            // router output mirrors the strategy schemas
            (
                "live.FetchWindow",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("from", Timestamp),
                    FieldSpec::required("to", Timestamp),
                ],
            ),
            (
                "live.PlaceOrder",
                vec![
                    FieldSpec::required("client_order_id", String),
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("qty", DecimalString),
                ],
            ),
            (
                "backtest.FetchWindow",
                vec![
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("timeframe", String),
                    FieldSpec::required("from", Timestamp),
                    FieldSpec::required("to", Timestamp),
                ],
            ),
            (
                "backtest.PlaceOrder",
                vec![
                    FieldSpec::required("client_order_id", String),
                    FieldSpec::required("symbol", String),
                    FieldSpec::required("qty", DecimalString),
                ],
            ),
            ("backtest.Result", vec![FieldSpec::required("stats", Object)]),
        ];

        for (event_type, fields) in entries {
            // Built-in registration cannot conflict with itself.
            let _ = self.register(event_type, PayloadSchema::v1(fields));
        }
    }
}
