use rusqlite::Connection;
use serde::Serialize;

/// Fixed account category. Everything an actor may read hangs off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Student,
    Parent,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "parent" => Some(Role::Parent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Admin => "admin",
        }
    }
}

/// Requesting actor, resolved once per request. The strategy each read takes
/// is picked by matching on the role here, not re-derived per call site.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub actor_id: String,
    pub role: Role,
}

impl Viewer {
    /// Looks the actor up by id. Unknown ids yield `None`; callers render
    /// empty results for those, never errors.
    pub fn resolve(conn: &Connection, actor_id: &str) -> rusqlite::Result<Option<Viewer>> {
        let mut stmt = conn.prepare("SELECT role FROM actors WHERE id = ?")?;
        let mut rows = stmt.query([actor_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let role_str: String = row.get(0)?;
        Ok(Role::parse(&role_str).map(|role| Viewer {
            actor_id: actor_id.to_string(),
            role,
        }))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub number: String,
    pub slug: String,
    pub tutor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: String,
    pub lesson_id: String,
    pub date: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkRow {
    pub id: String,
    pub class_id: String,
    pub teacher_id: Option<String>,
    pub subject_id: String,
    pub title: String,
    pub description: String,
    pub completion_date: String,
}

fn collect_students(
    conn: &Connection,
    sql: &str,
    params: &[&str],
) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(sql)?;
    stmt.query_map(rusqlite::params_from_iter(params), |r| {
        Ok(StudentRow {
            id: r.get(0)?,
            first_name: r.get(1)?,
            last_name: r.get(2)?,
            class_id: r.get(3)?,
        })
    })
    .and_then(|it| it.collect())
}

fn collect_sessions(
    conn: &Connection,
    sql: &str,
    params: &[&str],
) -> rusqlite::Result<Vec<SessionRow>> {
    let mut stmt = conn.prepare(sql)?;
    stmt.query_map(rusqlite::params_from_iter(params), |r| {
        Ok(SessionRow {
            id: r.get(0)?,
            lesson_id: r.get(1)?,
            date: r.get(2)?,
            topic: r.get(3)?,
        })
    })
    .and_then(|it| it.collect())
}

fn collect_homework(
    conn: &Connection,
    sql: &str,
    params: &[&str],
) -> rusqlite::Result<Vec<HomeworkRow>> {
    let mut stmt = conn.prepare(sql)?;
    stmt.query_map(rusqlite::params_from_iter(params), |r| {
        Ok(HomeworkRow {
            id: r.get(0)?,
            class_id: r.get(1)?,
            teacher_id: r.get(2)?,
            subject_id: r.get(3)?,
            title: r.get(4)?,
            description: r.get(5)?,
            completion_date: r.get(6)?,
        })
    })
    .and_then(|it| it.collect())
}

/// Classes are listed permissively for every authenticated viewer; the coarse
/// permission gate lives with the caller.
pub fn visible_classes(conn: &Connection, _viewer: &Viewer) -> rusqlite::Result<Vec<ClassRow>> {
    let mut stmt =
        conn.prepare("SELECT id, number, slug, tutor_id FROM classes ORDER BY number")?;
    stmt.query_map([], |r| {
        Ok(ClassRow {
            id: r.get(0)?,
            number: r.get(1)?,
            slug: r.get(2)?,
            tutor_id: r.get(3)?,
        })
    })
    .and_then(|it| it.collect())
}

pub fn visible_students(conn: &Connection, viewer: &Viewer) -> rusqlite::Result<Vec<StudentRow>> {
    match viewer.role {
        Role::Teacher => collect_students(
            conn,
            "SELECT DISTINCT s.id, s.first_name, s.last_name, s.class_id
             FROM actors s
             JOIN lessons l ON l.class_id = s.class_id
             WHERE s.role = 'student' AND l.teacher_id = ?
             ORDER BY s.last_name, s.first_name",
            &[&viewer.actor_id],
        ),
        Role::Student => collect_students(
            conn,
            "SELECT id, first_name, last_name, class_id
             FROM actors
             WHERE id = ? AND role = 'student'",
            &[&viewer.actor_id],
        ),
        Role::Parent => collect_students(
            conn,
            "SELECT s.id, s.first_name, s.last_name, s.class_id
             FROM actors s
             JOIN actors p ON p.child_id = s.id
             WHERE p.id = ? AND s.role = 'student'",
            &[&viewer.actor_id],
        ),
        Role::Admin => collect_students(
            conn,
            "SELECT id, first_name, last_name, class_id
             FROM actors
             WHERE role = 'student'
             ORDER BY last_name, first_name",
            &[],
        ),
    }
}

pub fn visible_sessions(conn: &Connection, viewer: &Viewer) -> rusqlite::Result<Vec<SessionRow>> {
    match viewer.role {
        Role::Teacher => collect_sessions(
            conn,
            "SELECT ls.id, ls.lesson_id, ls.date, ls.topic
             FROM lesson_sessions ls
             JOIN lessons l ON ls.lesson_id = l.id
             WHERE l.teacher_id = ?
             ORDER BY ls.date",
            &[&viewer.actor_id],
        ),
        Role::Student => collect_sessions(
            conn,
            "SELECT ls.id, ls.lesson_id, ls.date, ls.topic
             FROM lesson_sessions ls
             JOIN lessons l ON ls.lesson_id = l.id
             JOIN actors s ON s.class_id = l.class_id
             WHERE s.id = ?
             ORDER BY ls.date",
            &[&viewer.actor_id],
        ),
        Role::Parent => Ok(Vec::new()),
        Role::Admin => collect_sessions(
            conn,
            "SELECT id, lesson_id, date, topic FROM lesson_sessions ORDER BY date",
            &[],
        ),
    }
}

pub fn visible_homework(conn: &Connection, viewer: &Viewer) -> rusqlite::Result<Vec<HomeworkRow>> {
    match viewer.role {
        Role::Teacher => collect_homework(
            conn,
            "SELECT id, class_id, teacher_id, subject_id, title, description, completion_date
             FROM homework
             WHERE teacher_id = ?
             ORDER BY completion_date",
            &[&viewer.actor_id],
        ),
        Role::Student => collect_homework(
            conn,
            "SELECT h.id, h.class_id, h.teacher_id, h.subject_id, h.title, h.description,
                    h.completion_date
             FROM homework h
             JOIN actors s ON s.class_id = h.class_id
             WHERE s.id = ?
             ORDER BY h.completion_date",
            &[&viewer.actor_id],
        ),
        Role::Parent => Ok(Vec::new()),
        Role::Admin => collect_homework(
            conn,
            "SELECT id, class_id, teacher_id, subject_id, title, description, completion_date
             FROM homework
             ORDER BY completion_date",
            &[],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::Teacher, Role::Student, Role::Parent, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("janitor"), None);
    }
}
