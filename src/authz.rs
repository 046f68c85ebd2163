use rusqlite::Connection;
use std::collections::HashMap;

/// True iff a lesson row joins exactly this teacher, subject and class.
/// Pure existence check, no side effects.
pub fn teaches(
    conn: &Connection,
    teacher_id: &str,
    subject_id: &str,
    class_id: &str,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(
        "SELECT 1 FROM lessons
         WHERE teacher_id = ? AND subject_id = ? AND class_id = ?
         LIMIT 1",
    )?;
    stmt.exists((teacher_id, subject_id, class_id))
}

/// Memoizes `teaches` per (teacher, subject, class) triple. Handlers create
/// one per request; it must not outlive the request, since lesson writes
/// would make it stale.
#[derive(Default)]
pub struct TeachesCache {
    cached: HashMap<(String, String, String), bool>,
}

impl TeachesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn teaches(
        &mut self,
        conn: &Connection,
        teacher_id: &str,
        subject_id: &str,
        class_id: &str,
    ) -> rusqlite::Result<bool> {
        let key = (
            teacher_id.to_string(),
            subject_id.to_string(),
            class_id.to_string(),
        );
        if let Some(hit) = self.cached.get(&key) {
            return Ok(*hit);
        }
        let result = teaches(conn, teacher_id, subject_id, class_id)?;
        self.cached.insert(key, result);
        Ok(result)
    }
}
