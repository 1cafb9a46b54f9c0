//! Dashboard aggregates derived from a [`Snapshot`]: the headline cards,
//! the recent usage series, the payments list, tone shares and health.

use std::cmp::Ordering;

use chrono::NaiveDate;

use super::Snapshot;

const RECENT_RESTART_SECS: u64 = 300;
const LATENCY_OK_MS: f64 = 200.0;
const LATENCY_WARN_MS: f64 = 500.0;
const QUEUE_OK: u64 = 10;
const QUEUE_WARN: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cards {
    pub users_total: u64,
    pub users_active_today: u64,
    pub users_active_7d: u64,
    pub users_active_30d: u64,
    pub users_premium: u64,
    pub rewrites_today: u64,
    pub rewrites_total: u64,
    pub revenue_30d: f64,
    pub new_payments_24h: u64,
    pub errors_total: u64,
    pub errors_today: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageSeries {
    /// Oldest first.
    pub days: Vec<(String, u64)>,
    pub total: u64,
    pub average: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRow {
    pub date: String,
    pub count: u64,
    pub total_amount: f64,
    /// Whole-percent share of the listed revenue.
    pub share_pct: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentsList {
    /// Newest first.
    pub rows: Vec<PaymentRow>,
    pub total_revenue: f64,
    pub total_transactions: u64,
    pub average_per_day: f64,
    pub max_day: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneShare {
    pub label: String,
    pub count: u64,
    pub share_pct: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Health {
    pub uptime: String,
    pub uptime_level: HealthLevel,
    pub latency_ms: f64,
    pub latency_level: HealthLevel,
    pub queue_length: u64,
    pub queue_level: HealthLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub cards: Cards,
    pub usage: UsageSeries,
    pub payments: PaymentsList,
    /// Largest first.
    pub tones: Vec<ToneShare>,
    pub health: Health,
}

impl DashboardSummary {
    pub fn from_snapshot(
        snapshot: &Snapshot,
        usage_window_days: usize,
        payments_window_days: usize,
    ) -> Self {
        let users = snapshot.users();
        let usage = snapshot.usage();
        let payments = snapshot.payments();
        let errors = snapshot.errors();
        let system = snapshot.system();

        let cards = Cards {
            users_total: users.total,
            users_active_today: users.active_today,
            users_active_7d: users.active_7d,
            users_active_30d: users.active_30d,
            users_premium: users.premium,
            rewrites_today: usage.rewrites_today,
            rewrites_total: usage.total_rewrites,
            revenue_30d: payments.history_30d.iter().map(|(_, d)| d.total_amount).sum(),
            new_payments_24h: payments.new_payments_24h,
            errors_total: errors.total_errors,
            errors_today: errors.errors_today,
        };

        let mut rows = payments.history_30d;
        rows.sort_by(|(a, _), (b, _)| newest_first(a, b));
        rows.truncate(payments_window_days);

        Self {
            cards,
            usage: usage_series(usage.rewrites_by_day, usage_window_days),
            payments: payments_list(rows),
            tones: tone_shares(usage.tones),
            health: Health {
                uptime: format_uptime(system.uptime_seconds),
                uptime_level: uptime_level(system.uptime_seconds),
                latency_ms: system.latency_avg_ms,
                latency_level: latency_level(system.latency_avg_ms),
                queue_length: system.queue_length,
                queue_level: queue_level(system.queue_length),
            },
        }
    }

    /// The most used tone. On a tie the one listed last in the payload wins.
    pub fn top_tone(&self) -> Option<&ToneShare> {
        let top = self.tones.first()?;
        self.tones.iter().take_while(|t| t.count == top.count).last()
    }
}

fn usage_series(mut days: Vec<(String, u64)>, window: usize) -> UsageSeries {
    days.sort_by(|(a, _), (b, _)| oldest_first(a, b));
    let skip = days.len().saturating_sub(window);
    let days: Vec<(String, u64)> = days.into_iter().skip(skip).collect();

    let total: u64 = days.iter().map(|(_, n)| n).sum();
    UsageSeries {
        average: rounded_mean(total as f64, days.len()) as u64,
        max: days.iter().map(|(_, n)| *n).max().unwrap_or(0),
        total,
        days,
    }
}

fn payments_list(days: Vec<(String, super::PaymentDay)>) -> PaymentsList {
    let total_revenue: f64 = days.iter().map(|(_, d)| d.total_amount).sum();
    let total_transactions = days.iter().map(|(_, d)| d.count).sum();
    let max_day = days
        .iter()
        .map(|(_, d)| d.total_amount)
        .fold(0.0_f64, f64::max);

    PaymentsList {
        average_per_day: rounded_mean(total_revenue, days.len()),
        rows: days
            .into_iter()
            .map(|(date, d)| PaymentRow {
                share_pct: percent(d.total_amount, total_revenue),
                date,
                count: d.count,
                total_amount: d.total_amount,
            })
            .collect(),
        total_revenue,
        total_transactions,
        max_day,
    }
}

fn tone_shares(tones: Vec<(String, u64)>) -> Vec<ToneShare> {
    let total: u64 = tones.iter().map(|(_, n)| n).sum();
    let mut shares: Vec<ToneShare> = tones
        .into_iter()
        .map(|(label, count)| ToneShare {
            share_pct: percent(count as f64, total as f64),
            label,
            count,
        })
        .collect();
    // Stable: tied tones stay in payload order.
    shares.sort_by(|a, b| b.count.cmp(&a.count));
    shares
}

pub fn format_uptime(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{:.1}h", seconds as f64 / 3600.0)
    }
}

fn uptime_level(seconds: u64) -> HealthLevel {
    if seconds < RECENT_RESTART_SECS {
        HealthLevel::Warning
    } else {
        HealthLevel::Ok
    }
}

fn latency_level(ms: f64) -> HealthLevel {
    if ms < LATENCY_OK_MS {
        HealthLevel::Ok
    } else if ms < LATENCY_WARN_MS {
        HealthLevel::Warning
    } else {
        HealthLevel::Critical
    }
}

fn queue_level(length: u64) -> HealthLevel {
    if length < QUEUE_OK {
        HealthLevel::Ok
    } else if length < QUEUE_WARN {
        HealthLevel::Warning
    } else {
        HealthLevel::Critical
    }
}

fn rounded_mean(total: f64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        (total / n as f64).round()
    }
}

fn percent(part: f64, whole: f64) -> u32 {
    if whole <= 0.0 {
        0
    } else {
        (part / whole * 100.0).round() as u32
    }
}

fn parse_day(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

// Unparseable keys go last in both orders.
fn oldest_first(a: &str, b: &str) -> Ordering {
    match (parse_day(a), parse_day(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn newest_first(a: &str, b: &str) -> Ordering {
    match (parse_day(a), parse_day(b)) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
