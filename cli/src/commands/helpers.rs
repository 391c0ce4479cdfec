use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use platter_core::mealie::PlanItem;
use platter_core::models::{DateWindow, ShoppingListEntry};

use crate::config::Settings;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Resolve the query window: `--all` means the service default, otherwise fill
/// any missing bound from the configured days before/after today.
pub(crate) fn resolve_window(
    settings: &Settings,
    start: Option<String>,
    end: Option<String>,
    all: bool,
) -> Result<Option<DateWindow>> {
    if all {
        return Ok(None);
    }
    let default = settings.window_around(Local::now().date_naive())?;
    let start = start.map(Some).map(parse_date).transpose()?;
    let end = end.map(Some).map(parse_date).transpose()?;
    let window = DateWindow::new(
        start.unwrap_or(default.start),
        end.unwrap_or(default.end),
    )?;
    Ok(Some(window))
}

pub(crate) fn print_plan_table(items: &[PlanItem]) {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Type")]
        entry_type: String,
        #[tabled(rename = "Meal")]
        name: String,
        #[tabled(rename = "Recipe")]
        recipe_url: String,
    }

    let rows: Vec<PlanRow> = items
        .iter()
        .map(|i| PlanRow {
            id: i.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            date: i.date.clone().unwrap_or_default(),
            entry_type: i.entry_type.clone().unwrap_or_default(),
            name: truncate(i.display_name(), 40),
            recipe_url: i.recipe_url.clone().unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(0)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_shopping_table(entries: &[ShoppingListEntry]) {
    #[derive(Tabled)]
    struct ShoppingRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Ref")]
        id: String,
    }

    let rows: Vec<ShoppingRow> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| ShoppingRow {
            idx: i + 1,
            name: truncate(&e.ingredient_name, 50),
            id: if e.ingredient_id.is_empty() {
                "-".to_string()
            } else {
                e.ingredient_id.clone()
            },
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_resolve_window_all_means_service_default() {
        let window = resolve_window(&Settings::default(), None, None, true).unwrap();
        assert!(window.is_none());
    }

    #[test]
    fn test_resolve_window_defaults_from_settings() {
        let today = Local::now().date_naive();
        let window = resolve_window(&Settings::default(), None, None, false)
            .unwrap()
            .unwrap();
        assert_eq!(window.start, today - chrono::Duration::days(7));
        assert_eq!(window.end, today + chrono::Duration::days(7));
    }

    #[test]
    fn test_resolve_window_explicit_bounds() {
        let window = resolve_window(
            &Settings::default(),
            Some("2024-01-01".to_string()),
            Some("2024-01-31".to_string()),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    }

    #[test]
    fn test_resolve_window_inverted_is_error() {
        let result = resolve_window(
            &Settings::default(),
            Some("2024-02-01".to_string()),
            Some("2024-01-01".to_string()),
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("日清カップヌードル", 8), "日清カップ...");
    }
}
