//! Outbound mutation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Local input rejected before any remote call is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: String,
        max: String,
    },
    #[error("{field} must be a positive number")]
    NotPositive { field: &'static str },
}

/// One replayable remote write.
///
/// Serialized with an internal `type` tag so the persisted queue stays
/// readable across versions; each case carries only the fields its endpoint
/// needs. Finance cases carry a `client_id` so the remote can deduplicate
/// at-least-once replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationKind {
    Food {
        text: String,
    },
    Water {
        amount_ml: u32,
    },
    Weight {
        kg: f64,
    },
    Mood {
        value: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        energy: Option<u8>,
    },
    Universal {
        text: String,
    },
    Expense {
        text: String,
        client_id: String,
    },
    Transaction {
        merchant: String,
        amount: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        client_id: String,
    },
    Income {
        source: String,
        amount: f64,
        category: String,
        client_id: String,
    },
}

const DEFAULT_ENERGY: u8 = 5;

impl MutationKind {
    /// Fresh idempotency key for finance mutations.
    #[must_use]
    pub fn new_client_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Short machine name, matching the serialized tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Food { .. } => "food",
            Self::Water { .. } => "water",
            Self::Weight { .. } => "weight",
            Self::Mood { .. } => "mood",
            Self::Universal { .. } => "universal",
            Self::Expense { .. } => "expense",
            Self::Transaction { .. } => "transaction",
            Self::Income { .. } => "income",
        }
    }

    /// Path of the fire-and-forget endpoint that accepts this mutation.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("/webhook/tidemark-{}", self.name())
    }

    /// Human-readable summary for queue listings and notifications.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Food { text } => format!("Food: {text}"),
            Self::Water { amount_ml } => format!("Water: {amount_ml}ml"),
            Self::Weight { kg } => format!("Weight: {kg}kg"),
            Self::Mood { value, .. } => format!("Mood: {value}"),
            Self::Universal { text } => format!("Log: {text}"),
            Self::Expense { text, .. } => format!("Expense: {text}"),
            Self::Transaction {
                merchant, amount, ..
            } => format!("Transaction: {merchant} {amount}"),
            Self::Income { source, amount, .. } => format!("Income: {source} {amount}"),
        }
    }

    /// JSON body sent to [`Self::endpoint`].
    #[must_use]
    pub fn request_body(&self) -> Value {
        match self {
            Self::Food { text } => json!({ "text": text, "source": "tidemark" }),
            Self::Water { amount_ml } => json!({ "amount_ml": amount_ml }),
            Self::Weight { kg } => json!({ "weight_kg": kg }),
            Self::Mood { value, energy } => json!({
                "mood": value,
                "energy": energy.unwrap_or(DEFAULT_ENERGY),
            }),
            Self::Universal { text } => json!({
                "text": text,
                "source": "tidemark",
                "context": "auto",
            }),
            Self::Expense { text, client_id } => json!({ "text": text, "client_id": client_id }),
            Self::Transaction {
                merchant,
                amount,
                category,
                client_id,
            } => json!({
                "merchant_name": merchant,
                "amount": amount,
                "category": category,
                "client_id": client_id,
            }),
            Self::Income {
                source,
                amount,
                category,
                client_id,
            } => json!({
                "source": source,
                "amount": amount,
                "category": category,
                "is_recurring": false,
                "client_id": client_id,
            }),
        }
    }

    /// Check the payload before a live attempt.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Food { text } | Self::Universal { text } | Self::Expense { text, .. } => {
                non_empty("text", text)
            }
            Self::Water { amount_ml } => {
                if (1..=10_000).contains(amount_ml) {
                    Ok(())
                } else {
                    Err(out_of_range("amount_ml", 1, 10_000))
                }
            }
            Self::Weight { kg } => {
                if kg.is_finite() && (20.0..=500.0).contains(kg) {
                    Ok(())
                } else {
                    Err(out_of_range("kg", 20, 500))
                }
            }
            Self::Mood { value, energy } => {
                if !(1..=10).contains(value) {
                    return Err(out_of_range("mood", 1, 10));
                }
                match energy {
                    Some(energy) if !(1..=10).contains(energy) => {
                        Err(out_of_range("energy", 1, 10))
                    }
                    _ => Ok(()),
                }
            }
            Self::Transaction {
                merchant, amount, ..
            } => {
                non_empty("merchant", merchant)?;
                positive("amount", *amount)
            }
            Self::Income {
                source,
                amount,
                category,
                ..
            } => {
                non_empty("source", source)?;
                non_empty("category", category)?;
                positive("amount", *amount)
            }
        }
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty { field })
    } else {
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive { field })
    }
}

fn out_of_range(field: &'static str, min: i64, max: i64) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        min: min.to_string(),
        max: max.to_string(),
    }
}

/// Drain order. Lower rank drains first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A durable outbound write intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    pub kind: MutationKind,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default)]
    pub priority: Priority,
}

impl QueuedMutation {
    #[must_use]
    pub fn new(kind: MutationKind, priority: Priority) -> Self {
        Self {
            id: MutationId::new(),
            kind,
            created_at: Utc::now(),
            retry_count: 0,
            priority,
        }
    }
}

/// Terminal state for a mutation that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMutation {
    pub mutation: QueuedMutation,
    pub failed_at: DateTime<Utc>,
    pub last_error: String,
}

impl FailedMutation {
    #[must_use]
    pub fn new(mutation: QueuedMutation, last_error: impl Into<String>) -> Self {
        Self {
            mutation,
            failed_at: Utc::now(),
            last_error: last_error.into(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> MutationId {
        self.mutation.id
    }
}
