use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDateTime;
use unicode_width::UnicodeWidthStr;

use crate::category::CategoryStore;
use crate::config::Config;
use crate::item::Item;
use crate::status::Status;

/// One row of the item table, with everything derived up front.
#[derive(Debug, Clone)]
pub struct ItemRow<'a> {
    pub item: &'a Item,
    pub category: &'a str,
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, rows))]
    pub fn print_item_table(&mut self, rows: &[ItemRow<'_>]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if rows.is_empty() {
            writeln!(out, "No items.")?;
            return Ok(());
        }
        let painted = self.item_table_rows(rows);
        write_table(&mut out, item_headers(), painted)?;
        Ok(())
    }

    fn item_table_rows(&self, rows: &[ItemRow<'_>]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| {
                let item = row.item;
                let progress = match item.subtask_progress() {
                    (_, 0) => String::new(),
                    (done, total) => format!("{done}/{total}"),
                };
                vec![
                    self.paint(&item.id.to_string(), "33"),
                    row.category.to_string(),
                    format_due(item),
                    self.paint_status(row.status),
                    item.title.clone(),
                    progress,
                ]
            })
            .collect()
    }

    #[tracing::instrument(skip(self, item, category))]
    pub fn print_item_info(
        &mut self,
        item: &Item,
        category: &str,
        status: Status,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", item.id)?;
        writeln!(out, "title       {}", item.title)?;
        writeln!(out, "category    {category}")?;
        writeln!(
            out,
            "completed   {}",
            if item.completed { "yes" } else { "no" }
        )?;
        if item.due_date.is_some() {
            writeln!(out, "due         {}", format_due(item))?;
        }
        if status != Status::None {
            writeln!(out, "status      {}", self.paint_status(status))?;
        }
        if let Some(description) = &item.description {
            writeln!(out, "description {description}")?;
        }
        if !item.reminders.is_empty() {
            let reminders = item
                .reminders
                .iter()
                .map(|reminder| format!("{reminder} before"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(out, "reminders   {reminders}")?;
        }
        for subtask in &item.subtasks {
            let mark = if subtask.completed { "x" } else { " " };
            writeln!(out, "  [{mark}] {:<4} {}", subtask.id, subtask.text)?;
        }
        if let Some(created) = chrono::DateTime::from_timestamp_millis(item.created_at) {
            writeln!(out, "created     {}", created.format("%Y-%m-%dT%H:%M:%SZ"))?;
        }

        Ok(())
    }

    /// Category list, with the number of active items when `counts` is set.
    #[tracing::instrument(skip(self, categories, count))]
    pub fn print_categories(
        &mut self,
        categories: &CategoryStore,
        counts: bool,
        count: impl Fn(&str) -> usize,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let mut headers = vec!["ID".to_string(), "Name".to_string()];
        if counts {
            headers.push("Active".to_string());
        }

        let rows = categories
            .as_slice()
            .iter()
            .map(|category| {
                let mut row = vec![self.paint(&category.id, "33"), category.name.clone()];
                if counts {
                    row.push(count(&category.id).to_string());
                }
                row
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn paint_status(&self, status: Status) -> String {
        let code = match status {
            Status::None => return String::new(),
            Status::Upcoming => "36",
            Status::Urgent => "33",
            Status::PastDue => "31",
        };
        self.paint(status.label(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn item_headers() -> Vec<String> {
    ["ID", "Category", "Due", "Status", "Title", "Subtasks"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

/// `2024-01-10 09:00`, or just the date when no time is set.
pub fn format_due(item: &Item) -> String {
    match (item.due_date, item.due_time) {
        (Some(date), Some(time)) => format_instant(date.and_time(time)),
        (Some(date), None) => date.format("%Y-%m-%d").to_string(),
        _ => String::new(),
    }
}

pub fn format_instant(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{format_due, strip_ansi, write_table};
    use crate::item::{Item, ItemDraft};

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Title".to_string()],
            vec![
                vec!["\x1b[33m1\x1b[0m".to_string(), "Café".to_string()],
                vec!["22".to_string(), "x".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<_> = text.lines().map(strip_ansi).collect();
        assert_eq!(lines[0], "ID Title ");
        assert_eq!(lines[1], "-- ----- ");
        assert_eq!(lines[2], "1  Café  ");
        assert_eq!(lines[3], "22 x     ");
    }

    #[test]
    fn due_column_shows_time_only_when_set() {
        let mut draft = ItemDraft::new("x", "task");
        draft.due_date = NaiveDate::from_ymd_opt(2024, 1, 10);
        let mut item = Item::from_draft(1, draft, 0);
        assert_eq!(format_due(&item), "2024-01-10");
        item.due_time = NaiveTime::from_hms_opt(9, 5, 0);
        assert_eq!(format_due(&item), "2024-01-10 09:05");
    }
}
