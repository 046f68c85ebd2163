use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{self, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// URL-safe slug from the human-readable class number, e.g. "8D" -> "8d".
fn slugify(number: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in number.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let number = get_required_str(params, "number")?;
    let tutor_id = get_optional_str(params, "tutorId")?;
    if number.trim().is_empty() {
        return Err(HandlerErr::bad_params("number must not be empty"));
    }

    if let Some(tid) = &tutor_id {
        let role: Option<String> = conn
            .query_row("SELECT role FROM actors WHERE id = ?", [tid], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db)?;
        match role.as_deref() {
            Some("teacher") => {}
            Some(_) => {
                return Err(HandlerErr::validation(
                    "tutor_must_be_teacher",
                    "tutorId must reference a teacher",
                ))
            }
            None => return Err(HandlerErr::not_found("tutor not found")),
        }
    }

    let slug = slugify(&number);
    if slug.is_empty() {
        return Err(HandlerErr::bad_params("number yields an empty slug"));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, number, slug, tutor_id) VALUES (?, ?, ?, ?)",
        (&class_id, number.trim(), &slug, &tutor_id),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::validation("class_number_taken", "class number or slug already exists")
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: Some(json!({ "table": "classes" })),
        },
    })?;

    Ok(json!({ "classId": class_id, "slug": slug }))
}

fn classes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "classes": [] }));
    };
    let classes = visibility::visible_classes(conn, &viewer).map_err(HandlerErr::db)?;
    Ok(json!({
        "classes": serde_json::to_value(classes).unwrap_or_else(|_| json!([]))
    }))
}

fn classes_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let slug = get_optional_str(params, "slug")?;
    let (sql, key) = match (&class_id, &slug) {
        (Some(id), _) => (
            "SELECT id, number, slug, tutor_id FROM classes WHERE id = ?",
            id.clone(),
        ),
        (None, Some(slug)) => (
            "SELECT id, number, slug, tutor_id FROM classes WHERE slug = ?",
            slug.clone(),
        ),
        (None, None) => return Err(HandlerErr::bad_params("missing classId or slug")),
    };

    let row: Option<(String, String, String, Option<String>)> = conn
        .query_row(sql, [&key], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((id, number, slug, tutor_id)) = row else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let enrollment: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM actors WHERE role = 'student' AND class_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    Ok(json!({
        "id": id,
        "number": number,
        "slug": slug,
        "tutorId": tutor_id,
        "enrollment": enrollment,
    }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match classes_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match classes_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match classes_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_keeps_alnum_and_dashes() {
        assert_eq!(slugify("8D"), "8d");
        assert_eq!(slugify("3 B"), "3-b");
        assert_eq!(slugify("  7c  "), "7c");
    }
}
