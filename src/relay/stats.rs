//! The `/stats` command report.

use std::fmt::Write;

use log::{error, info};

use crate::store::{Exchange, GlobalStats, UserStats};
use crate::types::{StatsCommand, StatsScope};

use super::{RelayController, STATS_FAILURE_MESSAGE};

const RECENT_IN_REPORT: usize = 3;
const SUMMARY_CHARS: usize = 50;

impl<C> RelayController<C> {
    /// Build the statistics report for a stats command. Read-only.
    pub async fn handle_stats(&self, command: &StatsCommand) -> String {
        let scope = command.scope();
        info!(
            "Stats command from {} (scope: {scope:?})",
            command.user_id
        );

        let report = match scope {
            StatsScope::Global => self.store.total_stats().await.map(|stats| format_global(&stats)),
            StatsScope::User => self
                .store
                .user_stats(&command.user_id)
                .await
                .map(|stats| format_user(&command.user_id, &stats)),
        };

        report.unwrap_or_else(|e| {
            error!("Failed to build stats for {}: {e}", command.user_id);
            STATS_FAILURE_MESSAGE.to_string()
        })
    }
}

fn format_user(user_id: &str, stats: &UserStats) -> String {
    let mut report = format!("*<@{user_id}> さんの利用統計*\n");
    write_summary(
        &mut report,
        stats.total_conversations,
        stats.avg_response_time,
        stats.error_rate,
    );
    write_recent(&mut report, &stats.recent_conversations);
    report
}

fn format_global(stats: &GlobalStats) -> String {
    let mut report = String::from("*全体の利用統計*\n");
    write_summary(
        &mut report,
        stats.total_conversations,
        stats.avg_response_time,
        stats.error_rate,
    );
    let _ = writeln!(report, "総ユーザー数: {}", stats.total_users);
    write_recent(&mut report, &stats.recent_conversations);
    report
}

fn write_summary(report: &mut String, total: i64, avg_response_time: f64, error_rate: f64) {
    let _ = writeln!(report, "総会話数: {total}");
    let _ = writeln!(report, "平均応答時間: {avg_response_time:.2}秒");
    let _ = writeln!(report, "エラー率: {error_rate:.1}%");
}

fn write_recent(report: &mut String, recent: &[Exchange]) {
    if recent.is_empty() {
        return;
    }
    report.push_str("\n*最近の会話*\n");
    for exchange in recent.iter().take(RECENT_IN_REPORT) {
        let marker = if exchange.error_occurred { " (エラー)" } else { "" };
        let _ = writeln!(
            report,
            "• {} {}{marker}",
            exchange.created_at.format("%Y-%m-%d %H:%M"),
            summarize(&exchange.message)
        );
    }
}

/// Single-line preview of a message, cut to [`SUMMARY_CHARS`] characters.
fn summarize(message: &str) -> String {
    let flat = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = flat.chars();
    let head: String = chars.by_ref().take(SUMMARY_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
