//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::collection::{CollectionStats, QueryMatch, UploadSummary};

/// Content longer than this is shortened in result tables.
const PREVIEW_CHARS: usize = 60;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Table of an upload: one row per failure plus a totals row.
///
/// `lines` maps batch positions back to input line numbers.
pub fn create_upload_table(summary: &UploadSummary, lines: &[usize]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("Line").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Detail").add_attribute(Attribute::Bold),
    ]);

    for failure in &summary.errors {
        let line = lines
            .get(failure.index)
            .map_or_else(|| "?".to_string(), ToString::to_string);
        // Only the first line; suggestions are printed separately.
        let detail = failure.error.to_string();
        let detail = detail.lines().next().unwrap_or_default().to_string();
        table.add_row(vec![
            Cell::new(line),
            Cell::new("rejected").fg(Color::Red),
            Cell::new(detail),
        ]);
    }

    let (status, color) = if summary.errors.is_empty() {
        ("✓ all stored".to_string(), Color::Green)
    } else {
        (format!("⚠ {} rejected", summary.errors.len()), Color::Yellow)
    };
    table.add_row(vec![
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        Cell::new(status).fg(color).add_attribute(Attribute::Bold),
        Cell::new(format!("{} stored", summary.inserted.len())).add_attribute(Attribute::Bold),
    ]);

    table.to_string()
}

/// Table of query matches, closest first.
pub fn create_matches_table(matches: &[QueryMatch]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec!["#", "ID", "Distance", "Title", "Content"]);
    for (rank, m) in matches.iter().enumerate() {
        builder = builder.add_row(vec![
            (rank + 1).to_string(),
            m.document.id.to_string(),
            format!("{:.4}", m.distance),
            m.document.title.clone(),
            preview(&m.document.content),
        ]);
    }
    builder.build()
}

/// Table of collection statistics.
pub fn create_stats_table(stats: &CollectionStats) -> String {
    let log_size = stats
        .log_bytes
        .map_or_else(|| "in memory".to_string(), |bytes| format!("{bytes} bytes"));
    let index_size = match (stats.log_bytes, stats.index_bytes) {
        (None, _) => "in memory".to_string(),
        (Some(_), None) => "not built".to_string(),
        (Some(_), Some(bytes)) => format!("{bytes} bytes"),
    };

    TableBuilder::new()
        .set_headers(vec!["Metric", "Value"])
        .add_row(vec!["Documents".to_string(), stats.documents.to_string()])
        .add_row(vec!["Generation".to_string(), stats.generation.to_string()])
        .add_row(vec!["Indexed".to_string(), stats.indexed.to_string()])
        .add_row(vec!["Pending".to_string(), stats.pending.to_string()])
        .add_row(vec!["Clusters".to_string(), stats.clusters.to_string()])
        .add_row(vec![
            "Build iterations".to_string(),
            stats.build_iterations.to_string(),
        ])
        .add_row(vec!["nprobe".to_string(), stats.nprobe.to_string()])
        .add_row(vec![
            "Search pending".to_string(),
            stats.search_pending.to_string(),
        ])
        .add_row(vec!["Record log".to_string(), log_size])
        .add_row(vec!["Index file".to_string(), index_size])
        .build()
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut short: String = content.chars().take(PREVIEW_CHARS).collect();
    short.push('…');
    short
}
