use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{Role, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn notes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let student_id = get_required_str(params, "studentId")?;
    let text = get_required_str(params, "text")?;

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
    let student_ok: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM actors WHERE id = ? AND role = 'student'",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if student_ok.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    let note_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notes(id, student_id, teacher_id, text) VALUES (?, ?, ?, ?)",
        (&note_id, &student_id, &teacher_id, &text),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "notes" })),
    })?;
    Ok(json!({ "noteId": note_id }))
}

fn notes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "notes": [] }));
    };

    if viewer.role == Role::Admin {
        let mut stmt = conn
            .prepare(
                "SELECT id, student_id, teacher_id, text, seen_by_student, seen_by_parent
                 FROM notes ORDER BY rowid",
            )
            .map_err(HandlerErr::db)?;
        let notes: Vec<serde_json::Value> = stmt
            .query_map([], note_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        return Ok(json!({ "notes": notes }));
    }

    let sql = match viewer.role {
        Role::Teacher => {
            "SELECT id, student_id, teacher_id, text, seen_by_student, seen_by_parent
             FROM notes WHERE teacher_id = ? ORDER BY rowid"
        }
        Role::Student => {
            "SELECT id, student_id, teacher_id, text, seen_by_student, seen_by_parent
             FROM notes WHERE student_id = ? ORDER BY rowid"
        }
        Role::Parent | Role::Admin => {
            "SELECT n.id, n.student_id, n.teacher_id, n.text, n.seen_by_student, n.seen_by_parent
             FROM notes n
             JOIN actors p ON p.child_id = n.student_id
             WHERE p.id = ? ORDER BY n.rowid"
        }
    };

    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db)?;
    let notes: Vec<serde_json::Value> = stmt
        .query_map([&viewer.actor_id], note_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "notes": notes }))
}

fn note_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "teacherId": r.get::<_, Option<String>>(2)?,
        "text": r.get::<_, String>(3)?,
        "seenByStudent": r.get::<_, i64>(4)? != 0,
        "seenByParent": r.get::<_, i64>(5)? != 0,
    }))
}

/// The viewer's role decides which seen flag flips; the flags are
/// independent of each other.
fn notes_mark_seen(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let note_id = get_required_str(params, "noteId")?;

    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Err(HandlerErr::not_found("note not found"));
    };

    let changed = match viewer.role {
        Role::Student => conn
            .execute(
                "UPDATE notes SET seen_by_student = 1 WHERE id = ? AND student_id = ?",
                (&note_id, &viewer.actor_id),
            )
            .map_err(HandlerErr::db)?,
        Role::Parent => conn
            .execute(
                "UPDATE notes SET seen_by_parent = 1
                 WHERE id = ?
                   AND student_id = (SELECT child_id FROM actors WHERE id = ?)",
                (&note_id, &viewer.actor_id),
            )
            .map_err(HandlerErr::db)?,
        Role::Teacher | Role::Admin => 0,
    };
    if changed == 0 {
        return Err(HandlerErr::not_found("note not found"));
    }
    Ok(json!({ "ok": true }))
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
        "notes.create" => Some(handle(state, req, notes_create)),
        "notes.list" => Some(handle(state, req, notes_list)),
        "notes.markSeen" => Some(handle(state, req, notes_mark_seen)),
        _ => None,
    }
}
