use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{self, Role, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn actor_role(conn: &Connection, actor_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT role FROM actors WHERE id = ?", [actor_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db)
}

fn actors_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let role_str = get_required_str(params, "role")?;
    let Some(role) = Role::parse(&role_str) else {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", role_str)));
    };
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let class_id = get_optional_str(params, "classId")?;
    let child_id = get_optional_str(params, "childId")?;

    if class_id.is_some() && role != Role::Student {
        return Err(HandlerErr::bad_params("classId is only valid for students"));
    }
    if child_id.is_some() && role != Role::Parent {
        return Err(HandlerErr::bad_params("childId is only valid for parents"));
    }

    if let Some(cid) = &class_id {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [cid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db)?;
        if exists.is_none() {
            return Err(HandlerErr::not_found("class not found"));
        }
    }
    if let Some(child) = &child_id {
        match actor_role(conn, child)?.as_deref() {
            Some("student") => {}
            Some(_) => {
                return Err(HandlerErr::validation(
                    "child_must_be_student",
                    "childId must reference a student",
                ))
            }
            None => return Err(HandlerErr::not_found("child actor not found")),
        }
    }

    let actor_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO actors(id, role, first_name, last_name, class_id, child_id)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &actor_id,
            role.as_str(),
            &first_name,
            &last_name,
            &class_id,
            &child_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "actors" })),
    })?;

    Ok(json!({ "actorId": actor_id }))
}

fn actors_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let kind = get_optional_str(params, "kind")?.unwrap_or_else(|| "student".to_string());
    if kind != "student" {
        return Err(HandlerErr::bad_params(format!("unknown kind: {}", kind)));
    }

    // An unknown viewer sees nothing, not an error.
    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "students": [] }));
    };
    let students = visibility::visible_students(conn, &viewer).map_err(HandlerErr::db)?;
    Ok(json!({
        "students": serde_json::to_value(students).unwrap_or_else(|_| json!([]))
    }))
}

fn handle_actors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match actors_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_actors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match actors_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "actors.create" => Some(handle_actors_create(state, req)),
        "actors.list" => Some(handle_actors_list(state, req)),
        _ => None,
    }
}
