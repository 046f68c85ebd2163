use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS actors(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            class_id TEXT,
            child_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE SET NULL,
            FOREIGN KEY(child_id) REFERENCES actors(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_actors_class ON actors(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_actors_role ON actors(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            number TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            tutor_id TEXT,
            FOREIGN KEY(tutor_id) REFERENCES actors(id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            weekday INTEGER NOT NULL,
            time_slot INTEGER NOT NULL,
            classroom TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES actors(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            UNIQUE(teacher_id, weekday, time_slot)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_class ON lessons(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_teacher ON lessons(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_sessions(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            date TEXT NOT NULL,
            topic TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_lesson ON lesson_sessions(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES lesson_sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES actors(id) ON DELETE CASCADE,
            UNIQUE(session_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            teacher_id TEXT,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            completion_date TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES actors(id) ON DELETE SET NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_class ON homework(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_teacher ON homework(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework_realisations(
            id TEXT PRIMARY KEY,
            homework_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            content TEXT NOT NULL,
            FOREIGN KEY(homework_id) REFERENCES homework(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES actors(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_realisations_homework ON homework_realisations(homework_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_categories(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            UNIQUE(subject_id, class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_categories_class ON grade_categories(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT,
            value REAL NOT NULL,
            weight INTEGER NOT NULL,
            seen_by_student INTEGER NOT NULL DEFAULT 0,
            seen_by_parent INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(category_id) REFERENCES grade_categories(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES actors(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES actors(id) ON DELETE SET NULL,
            UNIQUE(category_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student_subject ON grades(student_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            date TEXT NOT NULL,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_class ON events(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_statuses(
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            seen INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE,
            FOREIGN KEY(actor_id) REFERENCES actors(id) ON DELETE CASCADE,
            UNIQUE(event_id, actor_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_statuses_actor ON event_statuses(actor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            author_id TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            FOREIGN KEY(author_id) REFERENCES actors(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS message_statuses(
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(message_id) REFERENCES messages(id) ON DELETE CASCADE,
            FOREIGN KEY(actor_id) REFERENCES actors(id) ON DELETE CASCADE,
            UNIQUE(message_id, actor_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_message_statuses_actor ON message_statuses(actor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            text TEXT NOT NULL,
            seen_by_student INTEGER NOT NULL DEFAULT 0,
            seen_by_parent INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES actors(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES actors(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_student ON notes(student_id)",
        [],
    )?;

    Ok(conn)
}

/// One attendance row per student currently enrolled in the class, default
/// status "none". ON CONFLICT DO NOTHING makes a repeated call re-derive the
/// roster instead of doubling it. Returns the number of rows inserted.
pub fn create_attendance_rows(
    conn: &Connection,
    session_id: &str,
    class_id: &str,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id FROM actors
         WHERE role = 'student' AND class_id = ?
         ORDER BY last_name, first_name",
    )?;
    let student_ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut ins = conn.prepare(
        "INSERT INTO attendance(id, session_id, student_id, status)
         VALUES (?, ?, ?, 'none')
         ON CONFLICT(session_id, student_id) DO NOTHING",
    )?;
    let mut inserted = 0;
    for sid in &student_ids {
        inserted += ins.execute((Uuid::new_v4().to_string(), session_id, sid))?;
    }
    Ok(inserted)
}

/// One unread status row per receiver. The caller wraps this together with
/// the message insert in a single transaction.
pub fn create_message_statuses(
    conn: &Connection,
    message_id: &str,
    receivers: &[String],
) -> rusqlite::Result<usize> {
    let mut ins = conn.prepare(
        "INSERT INTO message_statuses(id, message_id, actor_id, read) VALUES (?, ?, ?, 0)",
    )?;
    let mut inserted = 0;
    for actor_id in receivers {
        inserted += ins.execute((Uuid::new_v4().to_string(), message_id, actor_id))?;
    }
    Ok(inserted)
}

/// One unseen status row per recipient implied by the event's scope: every
/// actor for a global event; for a class event the class's students, those
/// students' parents, every teacher with a lesson in the class, and the tutor.
pub fn create_event_statuses(
    conn: &Connection,
    event_id: &str,
    class_id: Option<&str>,
) -> rusqlite::Result<usize> {
    let recipient_ids: Vec<String> = match class_id {
        None => {
            let mut stmt = conn.prepare("SELECT id FROM actors")?;
            let ids = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        }
        Some(cid) => {
            let mut stmt = conn.prepare(
                "SELECT id FROM actors WHERE role = 'student' AND class_id = ?1
                 UNION
                 SELECT p.id FROM actors p
                  JOIN actors s ON p.child_id = s.id
                  WHERE p.role = 'parent' AND s.class_id = ?1
                 UNION
                 SELECT DISTINCT teacher_id FROM lessons WHERE class_id = ?1
                 UNION
                 SELECT tutor_id FROM classes WHERE id = ?1 AND tutor_id IS NOT NULL",
            )?;
            let ids = stmt
                .query_map([cid], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        }
    };

    let mut ins = conn.prepare(
        "INSERT INTO event_statuses(id, event_id, actor_id, seen) VALUES (?, ?, ?, 0)",
    )?;
    let mut inserted = 0;
    for actor_id in &recipient_ids {
        inserted += ins.execute((Uuid::new_v4().to_string(), event_id, actor_id))?;
    }
    Ok(inserted)
}
