use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_required_date, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{self, Viewer};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn homework_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let title = get_required_str(params, "title")?;
    let description = get_required_str(params, "description")?;
    let completion_date = get_required_date(params, "completionDate")?;

    let class_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if class_ok.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }
    let teacher_ok: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM actors WHERE id = ? AND role = 'teacher'",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if teacher_ok.is_none() {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    let subject_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if subject_ok.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let homework_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework(id, class_id, teacher_id, subject_id, title, description, completion_date)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &homework_id,
            &class_id,
            &teacher_id,
            &subject_id,
            &title,
            &description,
            completion_date.to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "homework" })),
    })?;
    Ok(json!({ "homeworkId": homework_id }))
}

fn homework_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let only_current = params
        .get("onlyCurrent")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let as_of = get_optional_date(params, "asOf")?.unwrap_or_else(|| Local::now().date_naive());

    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "homework": [] }));
    };
    let mut rows = visibility::visible_homework(conn, &viewer).map_err(HandlerErr::db)?;
    if only_current {
        rows.retain(|h| {
            NaiveDate::parse_from_str(&h.completion_date, "%Y-%m-%d")
                .map(|d| calc::homework_is_current(d, as_of))
                .unwrap_or(false)
        });
    }
    Ok(json!({
        "homework": serde_json::to_value(rows).unwrap_or_else(|_| json!([]))
    }))
}

fn homework_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let homework_id = get_required_str(params, "homeworkId")?;
    let student_id = get_required_str(params, "studentId")?;
    let content = get_required_str(params, "content")?;
    let submitted_at =
        get_optional_date(params, "submittedAt")?.unwrap_or_else(|| Local::now().date_naive());

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM homework WHERE id = ?",
            [&homework_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("homework not found"));
    };

    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM actors WHERE id = ? AND role = 'student' AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if enrolled.is_none() {
        return Err(HandlerErr::validation(
            "student_not_in_class",
            "student is not enrolled in the homework's class",
        ));
    }

    let realisation_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework_realisations(id, homework_id, student_id, submitted_at, content)
         VALUES (?, ?, ?, ?, ?)",
        (
            &realisation_id,
            &homework_id,
            &student_id,
            submitted_at.to_string(),
            &content,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "homework_realisations" })),
    })?;
    Ok(json!({ "realisationId": realisation_id }))
}

fn homework_progress(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let homework_id = get_required_str(params, "homeworkId")?;
    match calc::homework_progress(conn, &homework_id)? {
        Some(progress) => Ok(serde_json::to_value(progress).unwrap_or_else(|_| json!({}))),
        None => Err(HandlerErr::not_found("homework not found")),
    }
}

fn handle<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "homework.create" => Some(handle(state, req, homework_create)),
        "homework.list" => Some(handle(state, req, homework_list)),
        "homework.submit" => Some(handle(state, req, homework_submit)),
        "homework.progress" => Some(handle(state, req, homework_progress)),
        _ => None,
    }
}
