use crate::calendar::{CalendarEvent, EventCalendar};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_date, get_required_i64, get_required_str,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Event plus its status fan-out in one transaction. The recipient set is
/// derived from the event's scope at creation time.
fn events_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let description = get_required_str(params, "description")?;
    let date = get_required_date(params, "date")?;
    let class_id = get_optional_str(params, "classId")?;
    let as_of = get_optional_date(params, "asOf")?.unwrap_or_else(|| Local::now().date_naive());

    if date <= as_of {
        return Err(HandlerErr::validation(
            "event_date_not_future",
            "event date must be in the future",
        ));
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

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let event_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO events(id, title, description, date, class_id) VALUES (?, ?, ?, ?, ?)",
        (
            &event_id,
            &title,
            &description,
            date.to_string(),
            &class_id,
        ),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "events" })),
        });
    }
    let statuses = match db::create_event_statuses(&tx, &event_id, class_id.as_deref()) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "event_statuses" })),
            });
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "eventId": event_id, "statuses": statuses }))
}

fn visible_event_rows(
    conn: &Connection,
    actor_id: &str,
) -> Result<Vec<(String, String, String, String, Option<String>, bool)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.title, e.description, e.date, e.class_id, es.seen
             FROM events e
             JOIN event_statuses es ON es.event_id = e.id
             WHERE es.actor_id = ?
             ORDER BY e.date",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([actor_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, Option<String>>(4)?,
            r.get::<_, i64>(5)? != 0,
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn events_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let events: Vec<serde_json::Value> = visible_event_rows(conn, &actor_id)?
        .into_iter()
        .map(|(id, title, description, date, class_id, seen)| {
            json!({
                "id": id,
                "title": title,
                "description": description,
                "date": date,
                "classId": class_id,
                "seen": seen,
            })
        })
        .collect();
    Ok(json!({ "events": events }))
}

fn events_mark_seen(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let event_id = get_required_str(params, "eventId")?;
    let changed = conn
        .execute(
            "UPDATE event_statuses SET seen = 1 WHERE event_id = ? AND actor_id = ?",
            (&event_id, &actor_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("event not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Month view over everything the actor can see. The calendar is built from
/// the full event set once, then formatted for the requested month.
fn events_calendar(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let year = get_required_i64(params, "year")?;
    let month = get_required_i64(params, "month")?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 1 and 12"));
    }
    let year = i32::try_from(year).map_err(|_| HandlerErr::bad_params("year out of range"))?;

    let events: Vec<CalendarEvent> = visible_event_rows(conn, &actor_id)?
        .into_iter()
        .filter_map(|(id, title, description, date, class_id, _seen)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
            Some(CalendarEvent {
                id,
                title,
                description,
                date,
                class_id,
            })
        })
        .collect();

    let calendar = EventCalendar::new(events);
    let html = calendar.render_month(year, month as u32, |ev| {
        format!(
            "<span class=\"event\" title=\"{}\">{}</span>",
            escape_html(&ev.description),
            escape_html(&ev.title)
        )
    });
    Ok(json!({ "html": html }))
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
        "events.create" => Some(handle(state, req, events_create)),
        "events.list" => Some(handle(state, req, events_list)),
        "events.markSeen" => Some(handle(state, req, events_mark_seen)),
        "events.calendar" => Some(handle(state, req, events_calendar)),
        _ => None,
    }
}
