use crate::fetcher::{FetchState, FetchStatus};
use crate::metrics::{DashboardSummary, HealthLevel};
use crate::storage::Settings;

const BAR_WIDTH: usize = 24;

pub fn print_state(bot_name: &str, state: &FetchState, settings: &Settings) {
    match state.status {
        FetchStatus::Idle => eprintln!("No bot selected."),
        FetchStatus::Loading => eprintln!("Loading metrics for {}...", bot_name),
        FetchStatus::Success | FetchStatus::Error => {
            if let Some(e) = &state.error {
                eprintln!(
                    "Could not reach {} [{}]: {}. Check the bot's URL and secret key; `r` retries.",
                    bot_name,
                    e.kind(),
                    e
                );
            }
            if let Some(snapshot) = &state.data {
                let summary = DashboardSummary::from_snapshot(
                    snapshot,
                    settings.usage_window_days,
                    settings.payments_window_days,
                );
                print_summary(bot_name, &summary);
                if let Some(at) = state.last_success {
                    println!("Last updated {}", at.format("%H:%M:%S"));
                }
            }
        }
    }
}

pub fn print_summary(bot_name: &str, summary: &DashboardSummary) {
    let c = &summary.cards;
    println!("== {} ==", bot_name);
    println!(
        "Users      {:>10}   active today {}, 7d {}, 30d {}, premium {}",
        c.users_total, c.users_active_today, c.users_active_7d, c.users_active_30d, c.users_premium
    );
    println!("Rewrites   {:>10}   today {}", c.rewrites_total, c.rewrites_today);
    println!(
        "Revenue30d {:>10.2}   {} payments in 24h",
        c.revenue_30d, c.new_payments_24h
    );
    println!("Errors     {:>10}   today {}", c.errors_total, c.errors_today);

    let h = &summary.health;
    println!();
    println!(
        "Health     uptime {} [{}]  latency {:.0}ms [{}]  queue {} [{}]",
        h.uptime,
        level_label(h.uptime_level, "recently restarted", "stable"),
        h.latency_ms,
        level_label(h.latency_level, "elevated", "fast"),
        h.queue_length,
        level_label(h.queue_level, "busy", "idle"),
    );

    let u = &summary.usage;
    if !u.days.is_empty() {
        println!();
        println!("Usage (avg {}/day, peak {})", u.average, u.max);
        for (day, count) in &u.days {
            println!("  {}  {:>6}  {}", day, count, bar(*count as f64, u.max as f64));
        }
    }

    let p = &summary.payments;
    if !p.rows.is_empty() {
        println!();
        println!(
            "Payments ({} transactions, {:.2} total, {:.0}/day avg)",
            p.total_transactions, p.total_revenue, p.average_per_day
        );
        for row in &p.rows {
            println!(
                "  {}  {:>4}x  {:>10.2}  {:>3}%  {}",
                row.date,
                row.count,
                row.total_amount,
                row.share_pct,
                bar(row.total_amount, p.max_day)
            );
        }
    }

    if let Some(top) = summary.top_tone() {
        println!();
        println!("Tones (top: {})", top.label);
        for tone in &summary.tones {
            println!("  {:<16} {:>6}  {:>3}%", tone.label, tone.count, tone.share_pct);
        }
    }
}

fn level_label(level: HealthLevel, warning: &'static str, ok: &'static str) -> &'static str {
    match level {
        HealthLevel::Ok => ok,
        HealthLevel::Warning => warning,
        HealthLevel::Critical => "critical",
    }
}

fn bar(value: f64, max: f64) -> String {
    if max <= 0.0 {
        return String::new();
    }
    let filled = ((value / max) * BAR_WIDTH as f64).round() as usize;
    "#".repeat(filled.min(BAR_WIDTH))
}
