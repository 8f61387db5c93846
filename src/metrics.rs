//! Pure aggregation of raw GitHub payloads into the series and summary
//! statistics the dashboard renders.
//!
//! Every function here is a total transform over well-formed input: an empty
//! or missing payload yields an explicitly empty result so the presenter can
//! show a "no data" state, while a payload of the wrong shape yields
//! [`AggregationError::MalformedInput`] instead of partial numbers.

use crate::error::AggregationError;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive `[start, end]` date window. `start > end` matches nothing.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

fn in_range(date: NaiveDate, range: Option<&DateRange>) -> bool {
    range.map_or(true, |r| r.contains(date))
}

/// Returns the sub-sequence whose dates fall inside the window, preserving
/// the original order. `None` means the full span.
pub fn filter_range<T: Clone>(
    series: &[T],
    range: Option<&DateRange>,
    date_of: impl Fn(&T) -> NaiveDate,
) -> Vec<T> {
    series
        .iter()
        .filter(|item| in_range(date_of(item), range))
        .cloned()
        .collect()
}

fn epoch_to_date(secs: i64) -> Result<NaiveDate, AggregationError> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.date_naive())
        .ok_or(AggregationError::MalformedInput)
}

/// Accepts the two timestamp encodings seen in the wild: epoch seconds from
/// CSV snapshots and RFC 3339 strings from the live traffic endpoints.
fn value_to_date(value: &Value) -> Result<NaiveDate, AggregationError> {
    match value {
        Value::Number(n) => epoch_to_date(n.as_i64().ok_or(AggregationError::MalformedInput)?),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.date_naive())
            .map_err(|_| AggregationError::MalformedInput),
        _ => Err(AggregationError::MalformedInput),
    }
}

fn int_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<i64, AggregationError> {
    obj.get(key)
        .and_then(Value::as_i64)
        .ok_or(AggregationError::MalformedInput)
}

// ---------------------------------------------------------------------------
// Code frequency
// ---------------------------------------------------------------------------

/// A signed row as delivered by the API, kept for the raw-data view.
/// `deletions` is non-positive here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodeFrequencyRaw {
    pub week: NaiveDate,
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodeFrequencyPoint {
    pub week: NaiveDate,
    pub additions: i64,
    /// Magnitude of the weekly deletions, normalized for display.
    pub deletions: i64,
    pub cumulative_additions: i64,
    pub cumulative_deletions: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CodeFrequency {
    /// The unfiltered signed rows.
    pub raw: Vec<CodeFrequencyRaw>,
    /// The windowed series with display magnitudes and running totals.
    pub series: Vec<CodeFrequencyPoint>,
}

/// Aggregates a `stats/code_frequency` payload: rows of
/// `[week_epoch, additions, deletions]` with non-positive deletions.
///
/// The cumulative sums run over the selected window only, so changing the
/// window recomputes them from the first visible week rather than carrying a
/// prefix sum over the whole history.
pub fn code_frequency(
    payload: &Value,
    range: Option<&DateRange>,
) -> Result<CodeFrequency, AggregationError> {
    let rows = match payload {
        Value::Null => return Ok(CodeFrequency::default()),
        Value::Array(rows) => rows,
        _ => return Err(AggregationError::MalformedInput),
    };

    let mut raw = Vec::with_capacity(rows.len());
    for row in rows {
        let cols = row.as_array().ok_or(AggregationError::MalformedInput)?;
        if cols.len() != 3 {
            return Err(AggregationError::MalformedInput);
        }
        let week_secs = cols[0].as_i64().ok_or(AggregationError::MalformedInput)?;
        let additions = cols[1].as_i64().ok_or(AggregationError::MalformedInput)?;
        let deletions = cols[2].as_i64().ok_or(AggregationError::MalformedInput)?;

        raw.push(CodeFrequencyRaw {
            week: epoch_to_date(week_secs)?,
            additions,
            deletions,
        });
    }

    let mut cumulative_additions = 0;
    let mut cumulative_deletions = 0;
    let series = raw
        .iter()
        .filter(|row| in_range(row.week, range))
        .map(|row| {
            let deletions = row.deletions.abs();
            cumulative_additions += row.additions;
            cumulative_deletions += deletions;
            CodeFrequencyPoint {
                week: row.week,
                additions: row.additions,
                deletions,
                cumulative_additions,
                cumulative_deletions,
            }
        })
        .collect();

    Ok(CodeFrequency { raw, series })
}

// ---------------------------------------------------------------------------
// Commit activity
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitActivityPoint {
    pub week: NaiveDate,
    pub total: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CommitActivity {
    pub series: Vec<CommitActivityPoint>,
    pub total_commits: i64,
    pub average_commits: f64,
    /// Percentage change from the second-to-last to the last week.
    /// `None` when fewer than two points exist or the previous week is zero.
    pub week_over_week_change_pct: Option<f64>,
}

/// Aggregates a `stats/commit_activity` payload: rows of
/// `{week: epoch, total: int, ...}`.
pub fn commit_activity(
    payload: &Value,
    range: Option<&DateRange>,
) -> Result<CommitActivity, AggregationError> {
    let rows = match payload {
        Value::Null => return Ok(CommitActivity::default()),
        Value::Array(rows) => rows,
        _ => return Err(AggregationError::MalformedInput),
    };

    let mut series = Vec::with_capacity(rows.len());
    for row in rows {
        let obj = row.as_object().ok_or(AggregationError::MalformedInput)?;
        let week = epoch_to_date(int_field(obj, "week")?)?;
        let total = int_field(obj, "total")?;
        if in_range(week, range) {
            series.push(CommitActivityPoint { week, total });
        }
    }

    let total_commits: i64 = series.iter().map(|p| p.total).sum();
    let average_commits = if series.is_empty() {
        0.0
    } else {
        total_commits as f64 / series.len() as f64
    };

    let week_over_week_change_pct = match series.as_slice() {
        [.., prev, last] if prev.total != 0 => {
            Some((last.total - prev.total) as f64 / prev.total as f64 * 100.0)
        }
        _ => None,
    };

    Ok(CommitActivity {
        series,
        total_commits,
        average_commits,
        week_over_week_change_pct,
    })
}

// ---------------------------------------------------------------------------
// Contributors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContributorTotal {
    pub login: String,
    /// Sum of additions, deletions, and commits across every week.
    pub total_activity: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContributorWeek {
    pub week: NaiveDate,
    pub additions: i64,
    pub deletions: i64,
    pub commits: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContributorDetail {
    pub login: String,
    /// Weekly activity within the selected window.
    pub weeks: Vec<ContributorWeek>,
    /// Bounds of the contributor's full history, for range selection.
    pub first_week: Option<NaiveDate>,
    pub last_week: Option<NaiveDate>,
}

fn contributor_weeks_of(row: &Value) -> Result<Option<(String, Vec<ContributorWeek>)>, AggregationError> {
    let obj = row.as_object().ok_or(AggregationError::MalformedInput)?;

    // Anonymous contributions arrive with a null author; they cannot be
    // ranked by login and are skipped.
    let author = match obj.get("author") {
        Some(Value::Object(author)) => author,
        Some(Value::Null) | None => return Ok(None),
        Some(_) => return Err(AggregationError::MalformedInput),
    };
    let login = author
        .get("login")
        .and_then(Value::as_str)
        .ok_or(AggregationError::MalformedInput)?
        .to_string();

    let weeks = obj
        .get("weeks")
        .and_then(Value::as_array)
        .ok_or(AggregationError::MalformedInput)?;

    let mut parsed = Vec::with_capacity(weeks.len());
    for week in weeks {
        let week = week.as_object().ok_or(AggregationError::MalformedInput)?;
        parsed.push(ContributorWeek {
            week: epoch_to_date(int_field(week, "w")?)?,
            additions: int_field(week, "a")?,
            deletions: int_field(week, "d")?,
            commits: int_field(week, "c")?,
        });
    }

    Ok(Some((login, parsed)))
}

/// Ranks contributors by total activity, descending, ties broken by login
/// ascending so the ordering is deterministic.
pub fn contributor_ranking(payload: &Value) -> Result<Vec<ContributorTotal>, AggregationError> {
    let rows = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(rows) => rows,
        _ => return Err(AggregationError::MalformedInput),
    };

    let mut ranking = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some((login, weeks)) = contributor_weeks_of(row)? {
            let total_activity = weeks
                .iter()
                .map(|w| w.additions + w.deletions + w.commits)
                .sum();
            ranking.push(ContributorTotal {
                login,
                total_activity,
            });
        }
    }

    ranking.sort_by(|a, b| {
        b.total_activity
            .cmp(&a.total_activity)
            .then_with(|| a.login.cmp(&b.login))
    });

    Ok(ranking)
}

/// The weekly subsequence for one contributor, or `Ok(None)` when the login
/// does not appear in the payload.
pub fn contributor_detail(
    payload: &Value,
    login: &str,
    range: Option<&DateRange>,
) -> Result<Option<ContributorDetail>, AggregationError> {
    let rows = match payload {
        Value::Null => return Ok(None),
        Value::Array(rows) => rows,
        _ => return Err(AggregationError::MalformedInput),
    };

    for row in rows {
        let Some((row_login, weeks)) = contributor_weeks_of(row)? else {
            continue;
        };
        if row_login != login {
            continue;
        }

        let first_week = weeks.iter().map(|w| w.week).min();
        let last_week = weeks.iter().map(|w| w.week).max();
        let windowed = filter_range(&weeks, range, |w| w.week);

        return Ok(Some(ContributorDetail {
            login: row_login,
            weeks: windowed,
            first_week,
            last_week,
        }));
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Traffic
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrafficPoint {
    pub date: NaiveDate,
    pub count: i64,
    pub uniques: i64,
}

/// Aggregates a `traffic/views` or `traffic/clones` payload. The live API
/// wraps the series in an envelope keyed by `series_key`; a bare array (the
/// snapshot shape) is accepted as well. Values pass through unchanged.
pub fn traffic(
    payload: &Value,
    series_key: &str,
    range: Option<&DateRange>,
) -> Result<Vec<TrafficPoint>, AggregationError> {
    let rows = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(rows) => rows,
        Value::Object(obj) => match obj.get(series_key) {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(_) => return Err(AggregationError::MalformedInput),
        },
        _ => return Err(AggregationError::MalformedInput),
    };

    let mut series = Vec::with_capacity(rows.len());
    for row in rows {
        let obj = row.as_object().ok_or(AggregationError::MalformedInput)?;
        let date = value_to_date(obj.get("timestamp").ok_or(AggregationError::MalformedInput)?)?;
        if in_range(date, range) {
            series.push(TrafficPoint {
                date,
                count: int_field(obj, "count")?,
                uniques: int_field(obj, "uniques")?,
            });
        }
    }

    Ok(series)
}

// ---------------------------------------------------------------------------
// Repository metadata
// ---------------------------------------------------------------------------

/// Engagement counters from the repository metadata endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    pub forks: i64,
    pub stars: i64,
    pub watchers: i64,
}

pub fn repo_meta(payload: &Value) -> Result<Option<RepoMeta>, AggregationError> {
    let obj = match payload {
        Value::Null => return Ok(None),
        Value::Object(obj) => obj,
        _ => return Err(AggregationError::MalformedInput),
    };

    Ok(Some(RepoMeta {
        forks: int_field(obj, "forks_count")?,
        stars: int_field(obj, "stargazers_count")?,
        watchers: int_field(obj, "watchers_count")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn code_frequency_converts_and_accumulates() {
        let payload = json!([
            [1700000000, 10, -4],
            [1700604800, 5, -2],
        ]);

        let out = code_frequency(&payload, None).unwrap();

        assert_eq!(
            out.series,
            vec![
                CodeFrequencyPoint {
                    week: date(2023, 11, 14),
                    additions: 10,
                    deletions: 4,
                    cumulative_additions: 10,
                    cumulative_deletions: 4,
                },
                CodeFrequencyPoint {
                    week: date(2023, 11, 21),
                    additions: 5,
                    deletions: 2,
                    cumulative_additions: 15,
                    cumulative_deletions: 6,
                },
            ]
        );

        // The raw view keeps the signed values delivered by the API.
        assert_eq!(out.raw[0].deletions, -4);
        assert_eq!(out.raw[1].deletions, -2);
    }

    #[test]
    fn code_frequency_cumulative_sums_are_non_decreasing() {
        let payload = json!([
            [1700000000, 3, -1],
            [1700604800, 0, 0],
            [1701209600, 7, -9],
            [1701814400, 2, -2],
        ]);

        let out = code_frequency(&payload, None).unwrap();
        for pair in out.series.windows(2) {
            assert!(pair[1].cumulative_additions >= pair[0].cumulative_additions);
            assert!(pair[1].cumulative_deletions >= pair[0].cumulative_deletions);
        }
    }

    #[test]
    fn code_frequency_cumulative_sums_restart_inside_window() {
        let payload = json!([
            [1700000000, 10, -4],
            [1700604800, 5, -2],
            [1701209600, 1, -1],
        ]);

        // Window excludes the first week: the running totals start over from
        // the first visible week.
        let range = DateRange {
            start: date(2023, 11, 21),
            end: date(2023, 12, 31),
        };
        let out = code_frequency(&payload, Some(&range)).unwrap();

        assert_eq!(out.series.len(), 2);
        assert_eq!(out.series[0].cumulative_additions, 5);
        assert_eq!(out.series[0].cumulative_deletions, 2);
        assert_eq!(out.series[1].cumulative_additions, 6);
        assert_eq!(out.series[1].cumulative_deletions, 3);
        // The raw view is never windowed.
        assert_eq!(out.raw.len(), 3);
    }

    #[test]
    fn code_frequency_empty_and_malformed() {
        assert!(code_frequency(&Value::Null, None).unwrap().series.is_empty());
        assert!(code_frequency(&json!([]), None).unwrap().series.is_empty());

        let err = code_frequency(&json!([[1700000000, 10]]), None).unwrap_err();
        assert_eq!(err, AggregationError::MalformedInput);
        let err = code_frequency(&json!({"week": 1}), None).unwrap_err();
        assert_eq!(err, AggregationError::MalformedInput);
        let err = code_frequency(&json!([[1700000000, "ten", -4]]), None).unwrap_err();
        assert_eq!(err, AggregationError::MalformedInput);
    }

    #[test]
    fn commit_activity_summary() {
        let payload = json!([
            {"week": 1700000000, "total": 10, "days": [1, 2, 3, 4, 0, 0, 0]},
            {"week": 1700604800, "total": 20, "days": [5, 5, 5, 5, 0, 0, 0]},
            {"week": 1701209600, "total": 15, "days": [5, 5, 5, 0, 0, 0, 0]},
        ]);

        let out = commit_activity(&payload, None).unwrap();

        assert_eq!(out.total_commits, 45);
        assert!((out.average_commits - 15.0).abs() < f64::EPSILON);
        let change = out.week_over_week_change_pct.unwrap();
        assert!((change - (-25.0)).abs() < 1e-9);
    }

    #[test]
    fn commit_activity_average_matches_total_over_count() {
        let payload = json!([
            {"week": 1700000000, "total": 7},
            {"week": 1700604800, "total": 11},
            {"week": 1701209600, "total": 2},
            {"week": 1701814400, "total": 0},
        ]);

        let out = commit_activity(&payload, None).unwrap();
        let expected = out.total_commits as f64 / out.series.len() as f64;
        assert!((out.average_commits - expected).abs() < 1e-9);
    }

    #[test]
    fn commit_activity_single_point_has_no_change_pct() {
        let payload = json!([{"week": 1700000000, "total": 10}]);
        let out = commit_activity(&payload, None).unwrap();

        assert_eq!(out.week_over_week_change_pct, None);
        assert_eq!(out.total_commits, 10);
    }

    #[test]
    fn commit_activity_zero_previous_week_has_no_change_pct() {
        let payload = json!([
            {"week": 1700000000, "total": 0},
            {"week": 1700604800, "total": 5},
        ]);

        let out = commit_activity(&payload, None).unwrap();
        assert_eq!(out.week_over_week_change_pct, None);
    }

    #[test]
    fn commit_activity_empty_and_malformed() {
        let out = commit_activity(&Value::Null, None).unwrap();
        assert!(out.series.is_empty());
        assert_eq!(out.total_commits, 0);

        let err = commit_activity(&json!([{"week": "soon"}]), None).unwrap_err();
        assert_eq!(err, AggregationError::MalformedInput);
    }

    fn contributors_payload() -> Value {
        json!([
            {
                "author": {"login": "zoe"},
                "total": 3,
                "weeks": [
                    {"w": 1700000000, "a": 10, "d": 5, "c": 3},
                ]
            },
            {
                "author": {"login": "amy"},
                "total": 3,
                "weeks": [
                    {"w": 1700000000, "a": 6, "d": 9, "c": 3},
                ]
            },
            {
                "author": {"login": "bob"},
                "total": 9,
                "weeks": [
                    {"w": 1700000000, "a": 100, "d": 20, "c": 5},
                    {"w": 1700604800, "a": 50, "d": 10, "c": 4},
                ]
            },
            {
                "author": null,
                "total": 1,
                "weeks": [{"w": 1700000000, "a": 1, "d": 1, "c": 1}]
            }
        ])
    }

    #[test]
    fn contributor_ranking_is_deterministic() {
        let ranking = contributor_ranking(&contributors_payload()).unwrap();

        // bob: 189; zoe and amy tie at 18 and sort by login ascending.
        assert_eq!(
            ranking,
            vec![
                ContributorTotal {
                    login: "bob".to_string(),
                    total_activity: 189,
                },
                ContributorTotal {
                    login: "amy".to_string(),
                    total_activity: 18,
                },
                ContributorTotal {
                    login: "zoe".to_string(),
                    total_activity: 18,
                },
            ]
        );
    }

    #[test]
    fn contributor_detail_filters_but_keeps_bounds() {
        let range = DateRange {
            start: date(2023, 11, 20),
            end: date(2023, 11, 30),
        };
        let detail = contributor_detail(&contributors_payload(), "bob", Some(&range))
            .unwrap()
            .unwrap();

        assert_eq!(detail.weeks.len(), 1);
        assert_eq!(detail.weeks[0].week, date(2023, 11, 21));
        // Bounds cover the full history regardless of the window.
        assert_eq!(detail.first_week, Some(date(2023, 11, 14)));
        assert_eq!(detail.last_week, Some(date(2023, 11, 21)));
    }

    #[test]
    fn contributor_detail_unknown_login_is_none() {
        let detail = contributor_detail(&contributors_payload(), "nobody", None).unwrap();
        assert!(detail.is_none());
    }

    #[test]
    fn traffic_accepts_envelope_and_bare_array() {
        let envelope = json!({
            "count": 14,
            "uniques": 5,
            "views": [
                {"timestamp": "2023-11-14T00:00:00Z", "count": 10, "uniques": 3},
                {"timestamp": "2023-11-15T00:00:00Z", "count": 4, "uniques": 2},
            ]
        });

        let out = traffic(&envelope, "views", None).unwrap();
        assert_eq!(
            out,
            vec![
                TrafficPoint {
                    date: date(2023, 11, 14),
                    count: 10,
                    uniques: 3,
                },
                TrafficPoint {
                    date: date(2023, 11, 15),
                    count: 4,
                    uniques: 2,
                },
            ]
        );

        let bare = json!([{"timestamp": 1700000000, "count": 1, "uniques": 1}]);
        let out = traffic(&bare, "views", None).unwrap();
        assert_eq!(out[0].date, date(2023, 11, 14));
    }

    #[test]
    fn traffic_empty_and_malformed() {
        assert!(traffic(&Value::Null, "clones", None).unwrap().is_empty());
        assert!(traffic(&json!({"count": 0}), "clones", None).unwrap().is_empty());

        let err = traffic(&json!({"clones": "nope"}), "clones", None).unwrap_err();
        assert_eq!(err, AggregationError::MalformedInput);
    }

    #[test]
    fn repo_meta_counters() {
        let payload = json!({
            "forks_count": 12,
            "stargazers_count": 340,
            "watchers_count": 340,
            "full_name": "octocat/Hello-World"
        });

        let meta = repo_meta(&payload).unwrap().unwrap();
        assert_eq!(
            meta,
            RepoMeta {
                forks: 12,
                stars: 340,
                watchers: 340,
            }
        );

        assert_eq!(repo_meta(&Value::Null).unwrap(), None);
        assert_eq!(
            repo_meta(&json!({"forks_count": "many"})).unwrap_err(),
            AggregationError::MalformedInput
        );
    }

    #[test]
    fn filter_full_span_is_identity() {
        let series = vec![
            CommitActivityPoint {
                week: date(2023, 11, 14),
                total: 1,
            },
            CommitActivityPoint {
                week: date(2023, 11, 21),
                total: 2,
            },
            CommitActivityPoint {
                week: date(2023, 11, 28),
                total: 3,
            },
        ];

        let range = DateRange {
            start: date(2023, 11, 14),
            end: date(2023, 11, 28),
        };
        assert_eq!(filter_range(&series, Some(&range), |p| p.week), series);
        assert_eq!(filter_range(&series, None, |p| p.week), series);
    }

    #[test]
    fn filter_single_day_and_inverted_window() {
        let series = vec![
            CommitActivityPoint {
                week: date(2023, 11, 14),
                total: 1,
            },
            CommitActivityPoint {
                week: date(2023, 11, 21),
                total: 2,
            },
        ];

        let single = DateRange {
            start: date(2023, 11, 21),
            end: date(2023, 11, 21),
        };
        let out = filter_range(&series, Some(&single), |p| p.week);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].week, date(2023, 11, 21));

        let inverted = DateRange {
            start: date(2023, 11, 28),
            end: date(2023, 11, 14),
        };
        assert!(filter_range(&series, Some(&inverted), |p| p.week).is_empty());
    }
}
