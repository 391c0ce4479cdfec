use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a meal-plan entry, assigned by the remote meal-plan service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MealId(pub i64);

impl fmt::Display for MealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MealId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for MealId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Err(Error::validation("Meal id must not be empty"));
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::validation(format!("Invalid meal id '{s}'. Expected an integer")))
    }
}

impl ToSql for MealId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for MealId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoneMarker {
    pub meal_id: MealId,
    /// RFC 3339 UTC. Legacy stores may hold naive timestamps or nothing.
    pub done_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListEntry {
    /// Empty string when the upstream ingredient has no reference id.
    pub ingredient_id: String,
    pub ingredient_name: String,
}

impl ShoppingListEntry {
    pub fn new(ingredient_id: Option<String>, ingredient_name: impl Into<String>) -> Self {
        Self {
            ingredient_id: ingredient_id.unwrap_or_default(),
            ingredient_name: ingredient_name.into(),
        }
    }

    /// Parse a `[id, name]` pair as submitted by a client.
    pub fn from_pair(value: &serde_json::Value, index: usize) -> Result<Self> {
        let pair = value
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| {
                Error::validation(format!(
                    "Shopping list entry {index} must be a pair of [id, name], got {value}"
                ))
            })?;
        match (pair[0].as_str(), pair[1].as_str()) {
            (Some(id), Some(name)) => Ok(Self {
                ingredient_id: id.to_string(),
                ingredient_name: name.to_string(),
            }),
            _ => Err(Error::validation(format!(
                "Shopping list entry {index} must contain two strings, got {value}"
            ))),
        }
    }
}

/// Validate a full snapshot of `[id, name]` pairs. Nothing is returned unless every pair is valid.
pub fn parse_shopping_pairs(values: &[serde_json::Value]) -> Result<Vec<ShoppingListEntry>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| ShoppingListEntry::from_pair(v, i + 1))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::validation(format!(
                "Start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// `today` widened by the given days on each side. Fails when either edge leaves the calendar.
    pub fn around(today: NaiveDate, days_before: u32, days_after: u32) -> Result<Self> {
        let start = today.checked_sub_days(Days::new(u64::from(days_before)));
        let end = today.checked_add_days(Days::new(u64::from(days_after)));
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(Error::validation(format!(
                "Window of {days_before} days before and {days_after} days after {today} is out of range"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaStatus {
    pub version: i64,
    pub target: i64,
    pub compatible: bool,
}
