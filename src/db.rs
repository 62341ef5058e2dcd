use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("coderoom.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            password_hash TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            enrollment_number TEXT,
            birth_date TEXT,
            password_hash TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_groups(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            schedule TEXT NOT NULL DEFAULT '',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_group_students(
            class_group_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            PRIMARY KEY(class_group_id, student_id),
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_group_students_student
         ON class_group_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_group_id INTEGER,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            standard_duration REAL NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id)
        )",
        [],
    )?;
    // Lessons predate class groups in the original schema; the link
    // column arrived in a later migration.
    ensure_lessons_class_group(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_class_group ON lessons(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sessions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_group_id INTEGER,
            lesson_id INTEGER,
            date TEXT NOT NULL,
            observation TEXT,
            present_student_ids TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    ensure_class_sessions_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_class_group
         ON class_sessions(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendances(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_session_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'present',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(class_session_id, student_id),
            FOREIGN KEY(class_session_id) REFERENCES class_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendances_session ON attendances(class_session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendances_student ON attendances(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_group_id INTEGER,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            teacher_code TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id)
        )",
        [],
    )?;
    ensure_projects_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_class_group ON projects(class_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_submissions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            code TEXT,
            last_saved TEXT,
            grade REAL,
            feedback TEXT,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(project_id, student_id),
            FOREIGN KEY(project_id) REFERENCES projects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_submissions_project
         ON project_submissions(project_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_submissions_student
         ON project_submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            student_id INTEGER NOT NULL,
            class_group_id INTEGER,
            issue_date TEXT NOT NULL,
            validation_code TEXT NOT NULL UNIQUE,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_group_id) REFERENCES class_groups(id)
        )",
        [],
    )?;
    ensure_certificates_class_group(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_lessons_class_group(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "class_group_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE lessons ADD COLUMN class_group_id INTEGER", [])?;
    Ok(())
}

fn ensure_class_sessions_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "class_sessions", "lesson_id")? {
        conn.execute("ALTER TABLE class_sessions ADD COLUMN lesson_id INTEGER", [])?;
    }
    if !table_has_column(conn, "class_sessions", "observation")? {
        conn.execute("ALTER TABLE class_sessions ADD COLUMN observation TEXT", [])?;
    }
    if !table_has_column(conn, "class_sessions", "present_student_ids")? {
        conn.execute(
            "ALTER TABLE class_sessions ADD COLUMN present_student_ids TEXT",
            [],
        )?;
    }
    Ok(())
}

fn ensure_projects_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "projects", "teacher_code")? {
        conn.execute("ALTER TABLE projects ADD COLUMN teacher_code TEXT", [])?;
    }
    if !table_has_column(conn, "projects", "class_group_id")? {
        conn.execute("ALTER TABLE projects ADD COLUMN class_group_id INTEGER", [])?;
    }
    Ok(())
}

fn ensure_certificates_class_group(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "certificates", "class_group_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE certificates ADD COLUMN class_group_id INTEGER",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
