//! On-disk CSV snapshots as a substitute data source.
//!
//! The dashboard can run against CSV exports of the stats endpoints instead
//! of the live API. The exports use flattened column names
//! (`author_login`, `w`, `a`, `d`, `c` for contributors); this module
//! normalizes them back to the canonical JSON shapes so the same aggregators
//! apply to both sources.

use crate::error::AggregationError;
use crate::github::EndpointKind;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CodeFrequencyRow {
    week: i64,
    additions: i64,
    deletions: i64,
}

#[derive(Debug, Deserialize)]
struct CommitActivityRow {
    week: i64,
    total: i64,
}

#[derive(Debug, Deserialize)]
struct ContributorRow {
    author_login: String,
    w: i64,
    a: i64,
    d: i64,
    c: i64,
}

#[derive(Clone, Debug)]
pub struct SnapshotSource {
    dir: PathBuf,
}

impl SnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads the snapshot for an endpoint, normalized to the same JSON shape
    /// the live API delivers. A missing or empty file yields
    /// [`AggregationError::Empty`], which renders as an empty state.
    pub fn load(&self, endpoint: EndpointKind) -> Result<Value, AggregationError> {
        match endpoint {
            EndpointKind::CodeFrequency => self.load_code_frequency(),
            EndpointKind::CommitActivity => self.load_commit_activity(),
            EndpointKind::Contributors => self.load_contributors(),
            // Traffic and repository metadata are not part of the exports.
            EndpointKind::TrafficViews | EndpointKind::TrafficClones | EndpointKind::RepoMeta => {
                Err(AggregationError::Empty)
            }
        }
    }

    fn load_code_frequency(&self) -> Result<Value, AggregationError> {
        let rows: Vec<CodeFrequencyRow> = read_rows(&self.dir.join("code_frequency.csv"))?;
        Ok(Value::Array(
            rows.iter()
                .map(|r| json!([r.week, r.additions, r.deletions]))
                .collect(),
        ))
    }

    fn load_commit_activity(&self) -> Result<Value, AggregationError> {
        let rows: Vec<CommitActivityRow> = read_rows(&self.dir.join("commit_activity.csv"))?;
        Ok(Value::Array(
            rows.iter()
                .map(|r| json!({"week": r.week, "total": r.total}))
                .collect(),
        ))
    }

    /// Contributor exports are one row per (login, week); they are grouped
    /// back into the API's per-author records, preserving first-seen login
    /// order and file order within each author.
    fn load_contributors(&self) -> Result<Value, AggregationError> {
        let rows: Vec<ContributorRow> = read_rows(&self.dir.join("contributors.csv"))?;

        let mut order = Vec::new();
        let mut weeks_by_login: HashMap<String, Vec<Value>> = HashMap::new();
        for row in rows {
            let weeks = weeks_by_login.entry(row.author_login.clone()).or_insert_with(|| {
                order.push(row.author_login.clone());
                Vec::new()
            });
            weeks.push(json!({"w": row.w, "a": row.a, "d": row.d, "c": row.c}));
        }

        Ok(Value::Array(
            order
                .into_iter()
                .map(|login| {
                    let weeks = weeks_by_login.remove(&login).unwrap_or_default();
                    json!({"author": {"login": login}, "weeks": weeks})
                })
                .collect(),
        ))
    }
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, AggregationError> {
    let mut reader = csv::Reader::from_path(path).map_err(|_| AggregationError::Empty)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|_| AggregationError::MalformedInput)?);
    }

    if rows.is_empty() {
        return Err(AggregationError::Empty);
    }
    Ok(rows)
}
