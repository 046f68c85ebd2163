use crate::authz::TeachesCache;
use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{self, Role, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn require_teacher(conn: &Connection, actor_id: &str) -> Result<(), HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM actors WHERE id = ?", [actor_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    match role.as_deref() {
        Some("teacher") => Ok(()),
        Some(_) => Err(HandlerErr::validation(
            "actor_must_be_teacher",
            "actor is not a teacher",
        )),
        None => Err(HandlerErr::not_found("teacher not found")),
    }
}

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name) VALUES (?, ?)",
        (&subject_id, name.trim()),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::validation("subject_name_taken", "subject name already exists")
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: Some(json!({ "table": "subjects" })),
        },
    })?;
    Ok(json!({ "subjectId": subject_id }))
}

/// Subjects a teacher actually teaches to a class, i.e. the triples the
/// teaches predicate holds for.
fn subjects_list_for_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT s.id, s.name
             FROM subjects s
             JOIN lessons l ON l.subject_id = s.id
             WHERE l.teacher_id = ? AND l.class_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let subjects: Vec<serde_json::Value> = stmt
        .query_map((&teacher_id, &class_id), |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "subjects": subjects }))
}

fn lessons_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let weekday = get_required_i64(params, "weekday")?;
    let time_slot = get_required_i64(params, "timeSlot")?;
    let classroom = get_required_str(params, "classroom")?;

    if !(0..=6).contains(&weekday) {
        return Err(HandlerErr::bad_params("weekday must be 0..=6"));
    }
    if time_slot < 0 {
        return Err(HandlerErr::bad_params("timeSlot must be non-negative"));
    }
    require_teacher(conn, &teacher_id)?;
    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, subject_id, teacher_id, class_id, weekday, time_slot, classroom)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &lesson_id,
            &subject_id,
            &teacher_id,
            &class_id,
            weekday,
            time_slot,
            &classroom,
        ),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::validation(
                "lesson_time_conflict",
                "teacher already has a lesson at this weekday and time slot",
            )
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: Some(json!({ "table": "lessons" })),
        },
    })?;
    Ok(json!({ "lessonId": lesson_id }))
}

fn lessons_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let teacher_id = get_optional_str(params, "teacherId")?;

    let (sql, key) = match (&class_id, &teacher_id) {
        (Some(cid), _) => (
            "SELECT id, subject_id, teacher_id, class_id, weekday, time_slot, classroom
             FROM lessons WHERE class_id = ? ORDER BY weekday, time_slot",
            cid.clone(),
        ),
        (None, Some(tid)) => (
            "SELECT id, subject_id, teacher_id, class_id, weekday, time_slot, classroom
             FROM lessons WHERE teacher_id = ? ORDER BY weekday, time_slot",
            tid.clone(),
        ),
        (None, None) => return Err(HandlerErr::bad_params("missing classId or teacherId")),
    };

    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db)?;
    let lessons: Vec<serde_json::Value> = stmt
        .query_map([&key], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "teacherId": r.get::<_, String>(2)?,
                "classId": r.get::<_, String>(3)?,
                "weekday": r.get::<_, i64>(4)?,
                "timeSlot": r.get::<_, i64>(5)?,
                "classroom": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "lessons": lessons }))
}

/// Creates the session and its attendance roster in one transaction: either
/// the session lands with one row per enrolled student, or nothing lands.
fn sessions_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;
    let date = get_required_date(params, "date")?;
    let topic = get_required_str(params, "topic")?;

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("lesson not found"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO lesson_sessions(id, lesson_id, date, topic) VALUES (?, ?, ?, ?)",
        (&session_id, &lesson_id, date.to_string(), &topic),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "lesson_sessions" })),
        });
    }
    let created = match db::create_attendance_rows(&tx, &session_id, &class_id) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            });
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "sessionId": session_id, "attendanceRows": created }))
}

fn sessions_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "sessions": [] }));
    };
    let sessions = visibility::visible_sessions(conn, &viewer).map_err(HandlerErr::db)?;
    Ok(json!({
        "sessions": serde_json::to_value(sessions).unwrap_or_else(|_| json!([]))
    }))
}

/// Re-derives the roster for an existing session. Safe to call again after
/// enrollment changes; existing rows keep their status.
fn attendance_refresh(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let class_id: Option<String> = conn
        .query_row(
            "SELECT l.class_id
             FROM lesson_sessions ls
             JOIN lessons l ON ls.lesson_id = l.id
             WHERE ls.id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("session not found"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let created = match db::create_attendance_rows(&tx, &session_id, &class_id) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance" })),
            });
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "attendanceRows": created }))
}

fn attendance_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = get_required_str(params, "status")?;

    if !calc::is_valid_attendance_status(&status) {
        return Err(HandlerErr::validation(
            "bad_status",
            format!("unknown attendance status: {}", status),
        ));
    }

    let class_id: Option<String> = conn
        .query_row(
            "SELECT l.class_id
             FROM lesson_sessions ls
             JOIN lessons l ON ls.lesson_id = l.id
             WHERE ls.id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("session not found"));
    };

    let in_class: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM actors WHERE id = ? AND role = 'student' AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if in_class.is_none() {
        return Err(HandlerErr::validation(
            "student_not_in_class",
            "student is not enrolled in the session's class",
        ));
    }

    conn.execute(
        "INSERT INTO attendance(id, session_id, student_id, status)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET status = excluded.status",
        (
            Uuid::new_v4().to_string(),
            &session_id,
            &student_id,
            &status,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_optional_str(params, "subjectId")?;

    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let student_class: Option<Option<String>> = conn
        .query_row(
            "SELECT class_id FROM actors WHERE id = ? AND role = 'student'",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(student_class) = student_class else {
        return Err(HandlerErr::not_found("student not found"));
    };

    // A resource outside the viewer's scope looks exactly like a missing one.
    let allowed = match viewer.role {
        Role::Admin => true,
        Role::Student => viewer.actor_id == student_id,
        Role::Parent => {
            let child: Option<Option<String>> = conn
                .query_row(
                    "SELECT child_id FROM actors WHERE id = ?",
                    [&viewer.actor_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db)?;
            child.flatten().as_deref() == Some(student_id.as_str())
        }
        Role::Teacher => {
            let Some(class_id) = &student_class else {
                return Err(HandlerErr::not_found("student not found"));
            };
            let mut cache = TeachesCache::new();
            match &subject_id {
                Some(sid) => cache
                    .teaches(conn, &viewer.actor_id, sid, class_id)
                    .map_err(HandlerErr::db)?,
                None => conn
                    .query_row(
                        "SELECT 1 FROM lessons WHERE teacher_id = ? AND class_id = ? LIMIT 1",
                        (&viewer.actor_id, class_id),
                        |r| r.get::<_, i64>(0),
                    )
                    .optional()
                    .map_err(HandlerErr::db)?
                    .is_some(),
            }
        }
    };
    if !allowed {
        return Err(HandlerErr::not_found("student not found"));
    }

    let summary = calc::attendance_summary(conn, &student_id, subject_id.as_deref())?;
    Ok(serde_json::to_value(summary).unwrap_or_else(|_| json!({})))
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
        "subjects.create" => Some(handle(state, req, subjects_create)),
        "subjects.listForClass" => Some(handle(state, req, subjects_list_for_class)),
        "lessons.create" => Some(handle(state, req, lessons_create)),
        "lessons.list" => Some(handle(state, req, lessons_list)),
        "sessions.create" => Some(handle(state, req, sessions_create)),
        "sessions.list" => Some(handle(state, req, sessions_list)),
        "attendance.refresh" => Some(handle(state, req, attendance_refresh)),
        "attendance.set" => Some(handle(state, req, attendance_set)),
        "attendance.summary" => Some(handle(state, req, attendance_summary)),
        _ => None,
    }
}
