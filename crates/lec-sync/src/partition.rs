//! Competition filter applied to a decoded drop before ingestion.

use std::collections::BTreeMap;

use lec_core::GameRow;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineSettings;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub competition: String,
    pub total_rows: usize,
    pub tracked_rows: usize,
    pub discarded_rows: usize,
    /// Discarded rows per canonical league label.
    pub discarded_by_league: BTreeMap<String, usize>,
    pub unlabeled_rows: usize,
}

/// Keep the rows of the tracked competition, ordered chronologically.
///
/// The sort is stable, so rows sharing a timestamp keep their export order; undated rows
/// go last. Series grouping depends on this order.
pub fn partition_rows(rows: Vec<GameRow>, settings: &PipelineSettings) -> (Vec<GameRow>, PartitionReport) {
    let mut report = PartitionReport {
        competition: settings.competition.clone(),
        total_rows: rows.len(),
        ..PartitionReport::default()
    };

    let mut tracked: Vec<GameRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match row.league.as_deref() {
            Some(league) if settings.tracks(league) => tracked.push(row),
            Some(league) => {
                *report
                    .discarded_by_league
                    .entry(settings.canonical_league(league))
                    .or_default() += 1;
                report.discarded_rows += 1;
            }
            None => {
                report.unlabeled_rows += 1;
                report.discarded_rows += 1;
            }
        }
    }
    tracked.sort_by_key(|row| (row.date.is_none(), row.date));
    report.tracked_rows = tracked.len();

    info!(
        competition = %report.competition,
        tracked = report.tracked_rows,
        discarded = report.discarded_rows,
        "partitioned drop"
    );
    (tracked, report)
}
