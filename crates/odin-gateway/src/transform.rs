//! Payload transforms applied before content addressing.
//!
//! The accepted content CID is computed over the transformed payload. Pairs
//! of (payload_type, target_type) without a registered transform pass the
//! payload through unchanged.

use odin_gateway_core::Value;

use crate::error::{GatewayError, Result};

/// Target type produced by [`Iso20022Invoice`].
pub const ISO20022_INVOICE: &str = "invoice.iso20022.v1";

/// A mapping from one payload shape to another.
pub trait PayloadTransform: Send + Sync {
    fn applies(&self, payload_type: &str, target_type: &str) -> bool;

    fn apply(&self, payload: &Value) -> Result<Value>;
}

/// Ordered set of transforms; the first one that applies wins.
pub struct TransformRegistry {
    transforms: Vec<Box<dyn PayloadTransform>>,
}

impl TransformRegistry {
    /// A registry with no transforms (identity for everything).
    pub fn empty() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    pub fn register(&mut self, transform: impl PayloadTransform + 'static) -> &mut Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn normalize(&self, payload: &Value, payload_type: &str, target_type: &str) -> Result<Value> {
        match self
            .transforms
            .iter()
            .find(|t| t.applies(payload_type, target_type))
        {
            Some(transform) => transform.apply(payload),
            None => Ok(payload.clone()),
        }
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Iso20022Invoice);
        registry
    }
}

/// Maps vendor and tool-use invoices onto a flat ISO 20022 style invoice.
///
/// Each output field takes the first non-null alias present in the source.
/// The source payload is kept under `raw_source`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso20022Invoice;

impl Iso20022Invoice {
    const SOURCES: [&'static str; 2] = ["openai.tooluse.invoice.v1", "invoice.vendor.v1"];
}

impl PayloadTransform for Iso20022Invoice {
    fn applies(&self, payload_type: &str, target_type: &str) -> bool {
        target_type == ISO20022_INVOICE && Self::SOURCES.contains(&payload_type)
    }

    fn apply(&self, payload: &Value) -> Result<Value> {
        if payload.as_object().is_none() {
            return Err(GatewayError::InvalidEnvelope(
                "invoice payload must be an object".into(),
            ));
        }

        let lines: Vec<Value> = first(payload, &["lines", "items"])
            .and_then(|v| match v {
                Value::Array(items) => Some(items.iter().filter_map(invoice_line).collect()),
                _ => None,
            })
            .unwrap_or_default();

        Ok(Value::object([
            ("type", Value::from(ISO20022_INVOICE)),
            ("invoice_id", field(payload, &["invoice_id", "id", "number"])),
            (
                "currency",
                first(payload, &["currency", "ccy", "iso_currency"])
                    .cloned()
                    .unwrap_or_else(|| Value::from("USD")),
            ),
            ("total", field(payload, &["total", "amount_total", "gross_amount", "amount"])),
            ("issue_date", field(payload, &["issue_date", "date", "created_at"])),
            ("supplier", field(payload, &["supplier", "vendor", "from"])),
            ("customer", field(payload, &["customer", "to", "recipient"])),
            ("lines", Value::Array(lines)),
            ("raw_source", payload.clone()),
        ]))
    }
}

fn invoice_line(line: &Value) -> Option<Value> {
    line.as_object()?;
    Some(Value::object([
        ("description", field(line, &["description", "name"])),
        (
            "quantity",
            first(line, &["quantity", "qty"])
                .cloned()
                .unwrap_or_else(|| Value::from(1i64)),
        ),
        ("unit_price", field(line, &["unit_price", "price", "unitPrice"])),
        ("total", field(line, &["total", "line_total", "amount"])),
    ]))
}

fn first<'a>(object: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|name| object.get(name))
        .find(|v| !v.is_null())
}

fn field(object: &Value, aliases: &[&str]) -> Value {
    first(object, aliases).cloned().unwrap_or_default()
}
