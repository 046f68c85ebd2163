use crate::authz::TeachesCache;
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_i64, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::visibility::{Role, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn grade_categories_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let mut cache = TeachesCache::new();
    if !cache
        .teaches(conn, &teacher_id, &subject_id, &class_id)
        .map_err(HandlerErr::db)?
    {
        return Err(HandlerErr::validation(
            "teacher_does_not_teach",
            "teacher does not teach this subject to this class",
        ));
    }

    let category_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_categories(id, subject_id, class_id, name) VALUES (?, ?, ?, ?)",
        (&category_id, &subject_id, &class_id, name.trim()),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::validation(
                "category_name_taken",
                "category already exists for this subject and class",
            )
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: Some(json!({ "table": "grade_categories" })),
        },
    })?;
    Ok(json!({ "categoryId": category_id }))
}

fn grades_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category_id = get_required_str(params, "categoryId")?;
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let value = params
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
    let weight = get_required_i64(params, "weight")?;

    if !calc::is_valid_grade_value(value) {
        return Err(HandlerErr::validation(
            "bad_grade_value",
            format!("{} is not on the grade scale", value),
        ));
    }
    if weight <= 0 {
        return Err(HandlerErr::validation(
            "bad_weight",
            "weight must be a positive integer",
        ));
    }

    let category: Option<(String, String)> = conn
        .query_row(
            "SELECT subject_id, class_id FROM grade_categories WHERE id = ?",
            [&category_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((subject_id, class_id)) = category else {
        return Err(HandlerErr::not_found("grade category not found"));
    };

    let mut cache = TeachesCache::new();
    if !cache
        .teaches(conn, &teacher_id, &subject_id, &class_id)
        .map_err(HandlerErr::db)?
    {
        return Err(HandlerErr::validation(
            "teacher_does_not_teach",
            "teacher does not teach this subject to this class",
        ));
    }

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
            "graded actor is not enrolled in the category's class",
        ));
    }

    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, category_id, student_id, subject_id, teacher_id, value, weight)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &category_id,
            &student_id,
            &subject_id,
            &teacher_id,
            value,
            weight,
        ),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::validation(
                "grade_duplicate_in_category",
                "student already has a grade in this category",
            )
        }
        other => HandlerErr {
            code: "db_insert_failed",
            message: other.to_string(),
            details: Some(json!({ "table": "grades" })),
        },
    })?;
    Ok(json!({ "gradeId": grade_id }))
}

fn grade_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "categoryId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "subjectId": r.get::<_, String>(3)?,
        "teacherId": r.get::<_, Option<String>>(4)?,
        "value": r.get::<_, f64>(5)?,
        "weight": r.get::<_, i64>(6)?,
        "seenByStudent": r.get::<_, i64>(7)? != 0,
        "seenByParent": r.get::<_, i64>(8)? != 0,
    }))
}

const GRADE_COLS: &str = "id, category_id, student_id, subject_id, teacher_id, value, weight,
                          seen_by_student, seen_by_parent";

fn grades_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let subject_id = get_optional_str(params, "subjectId")?;

    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Ok(json!({ "grades": [] }));
    };

    let grades: Vec<serde_json::Value> = match viewer.role {
        Role::Student => {
            let sql = format!(
                "SELECT {} FROM grades WHERE student_id = ?1
                   AND (?2 IS NULL OR subject_id = ?2)",
                GRADE_COLS
            );
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
            stmt.query_map((&viewer.actor_id, &subject_id), |r| grade_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
        Role::Parent => {
            let mut stmt = conn
                .prepare(
                    "SELECT g.id, g.category_id, g.student_id, g.subject_id, g.teacher_id,
                            g.value, g.weight, g.seen_by_student, g.seen_by_parent
                     FROM grades g
                     JOIN actors p ON p.child_id = g.student_id
                     WHERE p.id = ?1 AND (?2 IS NULL OR g.subject_id = ?2)",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((&viewer.actor_id, &subject_id), |r| grade_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
        Role::Teacher => {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT g.id, g.category_id, g.student_id, g.subject_id, g.teacher_id,
                            g.value, g.weight, g.seen_by_student, g.seen_by_parent
                     FROM grades g
                     JOIN actors s ON s.id = g.student_id
                     JOIN lessons l ON l.class_id = s.class_id AND l.subject_id = g.subject_id
                     WHERE l.teacher_id = ?1 AND (?2 IS NULL OR g.subject_id = ?2)",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((&viewer.actor_id, &subject_id), |r| grade_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
        Role::Admin => {
            let sql = format!(
                "SELECT {} FROM grades WHERE (?1 IS NULL OR subject_id = ?1)",
                GRADE_COLS
            );
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
            stmt.query_map([&subject_id], |r| grade_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
    };

    Ok(json!({ "grades": grades }))
}

fn grades_average(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    // None means "no grades", which must stay distinct from 0.0 on the wire.
    let average = calc::subject_average(conn, &student_id, &subject_id)?;
    Ok(json!({ "average": average }))
}

fn grades_mark_seen(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let grade_id = get_required_str(params, "gradeId")?;

    let Some(viewer) = Viewer::resolve(conn, &actor_id).map_err(HandlerErr::db)? else {
        return Err(HandlerErr::not_found("grade not found"));
    };

    let changed = match viewer.role {
        Role::Student => conn
            .execute(
                "UPDATE grades SET seen_by_student = 1 WHERE id = ? AND student_id = ?",
                (&grade_id, &viewer.actor_id),
            )
            .map_err(HandlerErr::db)?,
        Role::Parent => conn
            .execute(
                "UPDATE grades SET seen_by_parent = 1
                 WHERE id = ?
                   AND student_id = (SELECT child_id FROM actors WHERE id = ?)",
                (&grade_id, &viewer.actor_id),
            )
            .map_err(HandlerErr::db)?,
        // Teachers and admins do not receive grades.
        Role::Teacher | Role::Admin => 0,
    };
    if changed == 0 {
        return Err(HandlerErr::not_found("grade not found"));
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
        "gradeCategories.create" => Some(handle(state, req, grade_categories_create)),
        "grades.create" => Some(handle(state, req, grades_create)),
        "grades.list" => Some(handle(state, req, grades_list)),
        "grades.average" => Some(handle(state, req, grades_average)),
        "grades.markSeen" => Some(handle(state, req, grades_mark_seen)),
        _ => None,
    }
}
