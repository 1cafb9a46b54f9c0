//! Read side of the remote metrics payload.
//!
//! The payload is kept exactly as the bot sent it. Typed views are built on
//! demand and any field that is missing or has the wrong type reads as zero
//! or empty.

pub mod summary;

use serde_json::Value;

pub use summary::{DashboardSummary, HealthLevel};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Value);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Users {
    pub total: u64,
    pub active_today: u64,
    pub active_7d: u64,
    pub active_30d: u64,
    pub premium: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub total_rewrites: u64,
    pub rewrites_today: u64,
    /// Date key to count, in payload order.
    pub rewrites_by_day: Vec<(String, u64)>,
    /// Tone label to count, in payload order.
    pub tones: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentDay {
    pub count: u64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payments {
    pub total_payments: u64,
    pub new_payments_24h: u64,
    pub history_30d: Vec<(String, PaymentDay)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    pub total_errors: u64,
    pub errors_today: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct System {
    pub queue_length: u64,
    pub latency_avg_ms: f64,
    pub uptime_seconds: u64,
}

impl Snapshot {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn users(&self) -> Users {
        let users = self.group("users");
        Users {
            total: count(users.get("total")),
            active_today: count(users.get("active_today")),
            active_7d: count(users.get("active_7d")),
            active_30d: count(users.get("active_30d")),
            premium: count(users.get("premium")),
        }
    }

    pub fn usage(&self) -> Usage {
        let usage = self.group("usage");
        Usage {
            total_rewrites: count(usage.get("total_rewrites")),
            rewrites_today: count(usage.get("rewrites_today")),
            rewrites_by_day: counts_by_key(usage.get("rewrites_by_day")),
            tones: counts_by_key(usage.get("tones")),
        }
    }

    pub fn payments(&self) -> Payments {
        let payments = self.group("payments");
        let history_30d = entries(payments.get("history_30d"))
            .map(|(date, day)| {
                (
                    date.clone(),
                    PaymentDay {
                        count: count(day.get("count")),
                        total_amount: amount(day.get("totalAmount")),
                    },
                )
            })
            .collect();

        Payments {
            total_payments: count(payments.get("total_payments")),
            new_payments_24h: count(payments.get("new_payments_24h")),
            history_30d,
        }
    }

    pub fn errors(&self) -> Errors {
        let errors = self.group("errors");
        Errors {
            total_errors: count(errors.get("total_errors")),
            errors_today: count(errors.get("errors_today")),
        }
    }

    pub fn system(&self) -> System {
        let system = self.group("system");
        System {
            queue_length: count(system.get("queue_length")),
            latency_avg_ms: amount(system.get("latency_avg_ms")),
            uptime_seconds: count(system.get("uptime_seconds")),
        }
    }

    fn group(&self, name: &str) -> &Value {
        self.0.get(name).unwrap_or(&Value::Null)
    }
}

/// Non-negative integer counter. Fractions truncate; anything else is 0.
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}

fn amount(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

fn entries(value: Option<&Value>) -> impl Iterator<Item = (&String, &Value)> {
    value.and_then(Value::as_object).into_iter().flatten()
}

fn counts_by_key(value: Option<&Value>) -> Vec<(String, u64)> {
    entries(value)
        .map(|(key, v)| (key.clone(), count(Some(v))))
        .collect()
}
