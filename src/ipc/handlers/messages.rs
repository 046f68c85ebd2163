use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_date, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Message plus its per-receiver status fan-out, in one transaction. A
/// message never lands without its statuses.
fn messages_send(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let author_id = get_required_str(params, "authorId")?;
    let title = get_required_str(params, "title")?;
    let content = get_required_str(params, "content")?;
    let sent_at =
        get_optional_date(params, "sentAt")?.unwrap_or_else(|| Local::now().date_naive());
    let receivers: Vec<String> = params
        .get("receiverIds")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .ok_or_else(|| HandlerErr::bad_params("missing receiverIds"))?;
    if receivers.is_empty() {
        return Err(HandlerErr::bad_params("receiverIds must not be empty"));
    }

    let author_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM actors WHERE id = ?", [&author_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if author_ok.is_none() {
        return Err(HandlerErr::not_found("author not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let message_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO messages(id, author_id, title, content, sent_at) VALUES (?, ?, ?, ?, ?)",
        (
            &message_id,
            &author_id,
            &title,
            &content,
            sent_at.to_string(),
        ),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "messages" })),
        });
    }
    let statuses = match db::create_message_statuses(&tx, &message_id, &receivers) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "message_statuses" })),
            });
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "messageId": message_id, "statuses": statuses }))
}

fn messages_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.author_id, m.title, m.content, m.sent_at, ms.read
             FROM messages m
             JOIN message_statuses ms ON ms.message_id = m.id
             WHERE ms.actor_id = ?
             ORDER BY m.sent_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let messages: Vec<serde_json::Value> = stmt
        .query_map([&actor_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "authorId": r.get::<_, Option<String>>(1)?,
                "title": r.get::<_, String>(2)?,
                "content": r.get::<_, String>(3)?,
                "sentAt": r.get::<_, String>(4)?,
                "read": r.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "messages": messages }))
}

fn messages_mark_read(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let message_id = get_required_str(params, "messageId")?;
    let changed = conn
        .execute(
            "UPDATE message_statuses SET read = 1 WHERE message_id = ? AND actor_id = ?",
            (&message_id, &actor_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        // Not a receiver, or no such message: identical from the outside.
        return Err(HandlerErr::not_found("message not found"));
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
        "messages.send" => Some(handle(state, req, messages_send)),
        "messages.list" => Some(handle(state, req, messages_list)),
        "messages.markRead" => Some(handle(state, req, messages_mark_read)),
        _ => None,
    }
}
