//! Table formatting utilities

use std::fmt::Display;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, *};

use cms_domain::{category::CategoryNode, DailyCount, StatusCount};

/// Widest bar drawn in the daily histogram
const BAR_WIDTH: u64 = 40;

/// Table formatter
pub struct TableFormatter;

impl TableFormatter {
    /// Create a new table with default styling
    pub fn new() -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table
    }

    /// Create a simple table with headers and rows
    pub fn simple(headers: Vec<&str>, rows: Vec<Vec<String>>) -> Table {
        let mut table = Self::new();
        table.set_header(headers);
        for row in rows {
            table.add_row(row);
        }
        table
    }

    /// Create a key-value table
    pub fn key_value(items: Vec<(&str, String)>) -> Table {
        let mut table = Self::new();
        for (key, value) in items {
            table.add_row(vec![Cell::new(key).add_attribute(Attribute::Bold), Cell::new(value)]);
        }
        table
    }

    /// One row per status, with a total row
    pub fn status_counts<S: Display>(counts: &[StatusCount<S>]) -> Table {
        let total: u64 = counts.iter().map(|c| c.count).sum();
        let mut rows: Vec<Vec<String>> = counts
            .iter()
            .map(|c| vec![c.status.to_string(), c.count.to_string()])
            .collect();
        rows.push(vec!["total".to_string(), total.to_string()]);
        Self::simple(vec!["Status", "Count"], rows)
    }

    /// One row per day with a bar scaled to the busiest day
    pub fn daily_counts(days: &[DailyCount]) -> Table {
        let peak = days.iter().map(|d| d.count).max().unwrap_or(0);
        let rows = days
            .iter()
            .map(|d| {
                vec![
                    d.date.format("%Y-%m-%d").to_string(),
                    d.count.to_string(),
                    bar(d.count, peak),
                ]
            })
            .collect();
        Self::simple(vec!["Date", "Count", ""], rows)
    }

    /// Category forest, one row per node, names indented by depth
    pub fn category_tree(roots: &[CategoryNode]) -> Table {
        let mut rows = Vec::new();
        for root in roots {
            push_tree_rows(&mut rows, root, 0);
        }
        Self::simple(vec!["Name", "Slug", "Order", "ID"], rows)
    }
}

fn push_tree_rows(rows: &mut Vec<Vec<String>>, node: &CategoryNode, depth: usize) {
    let name = if depth == 0 {
        node.category.name.clone()
    } else {
        format!("{}└ {}", "  ".repeat(depth - 1), node.category.name)
    };
    rows.push(vec![
        name,
        node.category.slug.clone(),
        node.category.sort_order.to_string(),
        node.category.id.to_string(),
    ]);
    for child in &node.children {
        push_tree_rows(rows, child, depth + 1);
    }
}

fn bar(count: u64, peak: u64) -> String {
    if peak == 0 {
        return String::new();
    }
    let width = (count * BAR_WIDTH).div_ceil(peak);
    "█".repeat(width as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use cms_domain::category::{build_tree, Category};

    #[test]
    fn test_bar_scales_to_peak() {
        assert_eq!(bar(0, 0), "");
        assert_eq!(bar(10, 10).chars().count(), BAR_WIDTH as usize);
        assert_eq!(bar(5, 10).chars().count(), (BAR_WIDTH / 2) as usize);
        assert_eq!(bar(1, 1000).chars().count(), 1);
    }

    #[test]
    fn test_daily_counts_table() {
        let days = vec![
            DailyCount {
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                count: 4,
            },
            DailyCount {
                date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                count: 0,
            },
        ];
        let out = TableFormatter::daily_counts(&days).to_string();
        assert!(out.contains("2024-05-01"));
        assert!(out.contains("2024-05-02"));
    }

    #[test]
    fn test_category_tree_indents_children() {
        let root = Category::new_root("News", "news");
        let child = Category::new(Some(root.id), "Sports", "sports");
        let tree = build_tree(&[root, child]);

        let mut rows = Vec::new();
        push_tree_rows(&mut rows, &tree[0], 0);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "News");
        assert_eq!(rows[1][0], "└ Sports");
    }

    #[test]
    fn test_status_counts_total() {
        let counts = vec![
            StatusCount { status: "draft", count: 2 },
            StatusCount { status: "published", count: 5 },
        ];
        let out = TableFormatter::status_counts(&counts).to_string();
        assert!(out.contains("total"));
        assert!(out.contains('7'));
    }
}
