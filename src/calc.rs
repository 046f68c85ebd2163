use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Grade values come from a fixed ordinal scale; anything else is rejected at
/// the point of persistence.
pub const GRADE_SCALE: [f64; 11] = [1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0];

pub fn is_valid_grade_value(v: f64) -> bool {
    GRADE_SCALE.iter().any(|g| (g - v).abs() < 1e-9)
}

/// 1-decimal display rounding: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Weighted average over (value, weight) pairs. `None` means "no grades",
/// which callers must keep distinct from an average of 0.
pub fn weighted_average<I>(grades: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, i64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (value, weight) in grades {
        sum += value * (weight as f64);
        denom += weight as f64;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

pub fn subject_average(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Option<f64>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT value, weight FROM grades
             WHERE student_id = ? AND subject_id = ?",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let pairs: Vec<(f64, i64)> = stmt
        .query_map((student_id, subject_id), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    Ok(weighted_average(pairs))
}

pub const ATTENDANCE_STATUSES: [&str; 5] = ["present", "absent", "exempt", "excused", "none"];

pub fn is_valid_attendance_status(status: &str) -> bool {
    ATTENDANCE_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub status: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total: i64,
    pub by_status: Vec<StatusSummary>,
}

/// Per-status counts and display percentages. Every recorded row counts
/// toward the total, including status "none".
pub fn summarize_statuses(counts: &[(String, i64)]) -> AttendanceSummary {
    let total: i64 = counts.iter().map(|(_, c)| c).sum();
    let by_status = ATTENDANCE_STATUSES
        .iter()
        .map(|status| {
            let count = counts
                .iter()
                .find(|(s, _)| s == status)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            let percentage = if total > 0 {
                round_off_1_decimal(100.0 * (count as f64) / (total as f64))
            } else {
                0.0
            };
            StatusSummary {
                status: status.to_string(),
                count,
                percentage,
            }
        })
        .collect();
    AttendanceSummary { total, by_status }
}

pub fn attendance_summary(
    conn: &Connection,
    student_id: &str,
    subject_id: Option<&str>,
) -> Result<AttendanceSummary, CalcError> {
    let counts: Vec<(String, i64)> = match subject_id {
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM attendance
                     WHERE student_id = ?
                     GROUP BY status",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?)))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
        }
        Some(subject_id) => {
            let mut stmt = conn
                .prepare(
                    "SELECT a.status, COUNT(*)
                     FROM attendance a
                     JOIN lesson_sessions ls ON a.session_id = ls.id
                     JOIN lessons l ON ls.lesson_id = l.id
                     WHERE a.student_id = ? AND l.subject_id = ?
                     GROUP BY a.status",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map((student_id, subject_id), |r| Ok((r.get(0)?, r.get(1)?)))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
        }
    };
    Ok(summarize_statuses(&counts))
}

/// Rolling retention window for homework lists: anything due in the future is
/// current, and so is anything due up to 7 days ago. Day 8 falls out.
pub fn homework_is_current(completion_date: NaiveDate, as_of: NaiveDate) -> bool {
    completion_date >= as_of - Duration::days(7)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkProgress {
    pub submitted_count: i64,
    pub total_count: i64,
}

pub fn homework_progress(
    conn: &Connection,
    homework_id: &str,
) -> Result<Option<HomeworkProgress>, CalcError> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM homework WHERE id = ?",
            [homework_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let Some(class_id) = class_id else {
        return Ok(None);
    };

    let submitted_count: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT student_id) FROM homework_realisations WHERE homework_id = ?",
            [homework_id],
            |r| r.get(0),
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let total_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM actors WHERE role = 'student' AND class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    Ok(Some(HomeworkProgress {
        submitted_count,
        total_count,
    }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnseenCounters {
    pub messages: i64,
    pub events: i64,
    /// Absent for teachers and admins: they do not receive grades.
    pub grades: Option<i64>,
    /// Absent for teachers and admins, same as grades.
    pub notes: Option<i64>,
}

/// Unread/unseen counters for one actor. An unknown actor id yields all
/// zeros rather than an error so callers can render an empty dashboard.
pub fn unseen_counters(conn: &Connection, actor_id: &str) -> Result<UnseenCounters, CalcError> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM actors WHERE id = ?", [actor_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let messages: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM message_statuses WHERE actor_id = ? AND read = 0",
            [actor_id],
            |r| r.get(0),
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let events: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM event_statuses WHERE actor_id = ? AND seen = 0",
            [actor_id],
            |r| r.get(0),
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let (grades, notes) = match role.as_deref() {
        Some("student") => {
            let g: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM grades WHERE student_id = ? AND seen_by_student = 0",
                    [actor_id],
                    |r| r.get(0),
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM notes WHERE student_id = ? AND seen_by_student = 0",
                    [actor_id],
                    |r| r.get(0),
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            (Some(g), Some(n))
        }
        Some("parent") => {
            let g: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM grades g
                     JOIN actors p ON p.child_id = g.student_id
                     WHERE p.id = ? AND g.seen_by_parent = 0",
                    [actor_id],
                    |r| r.get(0),
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM notes nt
                     JOIN actors p ON p.child_id = nt.student_id
                     WHERE p.id = ? AND nt.seen_by_parent = 0",
                    [actor_id],
                    |r| r.get(0),
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            (Some(g), Some(n))
        }
        _ => (None, None),
    };

    Ok(UnseenCounters {
        messages,
        events,
        grades,
        notes,
    })
}
