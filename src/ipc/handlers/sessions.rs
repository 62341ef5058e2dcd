use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{json_column, list_result, param_i64, param_id_list, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn db(code: &'static str, e: impl ToString) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

const SESSION_COLS: &str = "id, class_group_id, lesson_id, date, observation, present_student_ids, created_at, updated_at";

fn session_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "classGroupId": row.get::<_, Option<i64>>(1)?,
        "lessonId": row.get::<_, Option<i64>>(2)?,
        "date": row.get::<_, String>(3)?,
        "observation": row.get::<_, Option<String>>(4)?,
        "presentStudentIds": json_column(row.get::<_, Option<String>>(5)?),
        "createdAt": row.get::<_, Option<String>>(6)?,
        "updatedAt": row.get::<_, Option<String>>(7)?,
    }))
}

fn group_member_ids(conn: &Connection, class_group_id: i64) -> Result<Vec<i64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT student_id FROM class_group_students WHERE class_group_id = ?")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([class_group_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// One attendance row per group member: `present` for ids in the list,
/// `absent` for the rest. Upserts so re-saving a session is safe.
fn sync_attendance(
    conn: &Connection,
    session_id: i64,
    class_group_id: i64,
    present_ids: &[i64],
) -> Result<(), HandlerErr> {
    let now = db::now_iso();
    for student_id in group_member_ids(conn, class_group_id)? {
        let status = if present_ids.contains(&student_id) {
            "present"
        } else {
            "absent"
        };
        conn.execute(
            "INSERT INTO attendances(class_session_id, student_id, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(class_session_id, student_id)
             DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            (session_id, student_id, status, &now, &now),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendances" })),
        })?;
    }
    Ok(())
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let rows = if let Some(class_group_id) = param_i64(&req.params, "classGroupId") {
        let sql =
            format!("SELECT {SESSION_COLS} FROM class_sessions WHERE class_group_id = ? ORDER BY date, id");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([class_group_id], session_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        let sql = format!("SELECT {SESSION_COLS} FROM class_sessions ORDER BY date, id");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([], session_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(sessions) => ok(
            &req.id,
            json!({ "sessions": list_result(&req.params, sessions) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session_id) = param_i64(&req.params, "sessionId") else {
        return err(&req.id, "bad_params", "missing sessionId", None);
    };

    let sql = format!("SELECT {SESSION_COLS} FROM class_sessions WHERE id = ?");
    match conn.query_row(&sql, [session_id], session_json).optional() {
        Ok(Some(session)) => ok(&req.id, json!({ "session": session })),
        Ok(None) => err(&req.id, "not_found", "session not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(date) = param_str(&req.params, "date") else {
        return err(&req.id, "bad_params", "missing date", None);
    };
    let class_group_id = param_i64(&req.params, "classGroupId");
    let lesson_id = param_i64(&req.params, "lessonId");
    let observation = param_str(&req.params, "observation").map(|s| s.to_string());
    let present_ids = param_id_list(&req.params, "presentStudentIds");

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = db::now_iso();
    let present_json = present_ids
        .as_ref()
        .map(|ids| serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string()));
    if let Err(e) = tx.execute(
        "INSERT INTO class_sessions(class_group_id, lesson_id, date, observation,
                                    present_student_ids, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_group_id,
            &lesson_id,
            date,
            &observation,
            &present_json,
            &now,
            &now,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_sessions" })),
        );
    }
    let session_id = tx.last_insert_rowid();

    // Attendance is materialized from the roll call in the same
    // transaction so a session never exists half-marked.
    if let (Some(group_id), Some(ids)) = (class_group_id, present_ids.as_ref()) {
        if let Err(he) = sync_attendance(&tx, session_id, group_id, ids) {
            let _ = tx.rollback();
            return he.response(&req.id);
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "sessionId": session_id }))
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session_id) = param_i64(&req.params, "sessionId") else {
        return err(&req.id, "bad_params", "missing sessionId", None);
    };

    let existing_group: Option<Option<i64>> = match conn
        .query_row(
            "SELECT class_group_id FROM class_sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(existing_group) = existing_group else {
        return err(&req.id, "not_found", "session not found", None);
    };

    let present_ids = param_id_list(&req.params, "presentStudentIds");

    let mut sets: Vec<&str> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = param_str(&req.params, "date") {
        sets.push("date = ?");
        args.push(rusqlite::types::Value::Text(v.to_string()));
    }
    if let Some(v) = param_str(&req.params, "observation") {
        sets.push("observation = ?");
        args.push(rusqlite::types::Value::Text(v.to_string()));
    }
    if let Some(v) = param_i64(&req.params, "lessonId") {
        sets.push("lesson_id = ?");
        args.push(rusqlite::types::Value::Integer(v));
    }
    if let Some(v) = param_i64(&req.params, "classGroupId") {
        sets.push("class_group_id = ?");
        args.push(rusqlite::types::Value::Integer(v));
    }
    if let Some(ids) = present_ids.as_ref() {
        sets.push("present_student_ids = ?");
        args.push(rusqlite::types::Value::Text(
            serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string()),
        ));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    sets.push("updated_at = ?");
    args.push(rusqlite::types::Value::Text(db::now_iso()));
    args.push(rusqlite::types::Value::Integer(session_id));

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let sql = format!("UPDATE class_sessions SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = tx.execute(&sql, rusqlite::params_from_iter(args)) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "class_sessions" })),
        );
    }

    if let Some(ids) = present_ids.as_ref() {
        let group_id = param_i64(&req.params, "classGroupId").or(existing_group);
        if let Some(group_id) = group_id {
            // A session moved to another group still carries the old
            // roster's rows; drop anyone outside the target group
            // before re-marking.
            if let Err(e) = tx.execute(
                "DELETE FROM attendances
                 WHERE class_session_id = ?
                   AND student_id NOT IN
                     (SELECT student_id FROM class_group_students WHERE class_group_id = ?)",
                (session_id, group_id),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_delete_failed",
                    e.to_string(),
                    Some(json!({ "table": "attendances" })),
                );
            }
            if let Err(he) = sync_attendance(&tx, session_id, group_id, ids) {
                let _ = tx.rollback();
                return he.response(&req.id);
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session_id) = param_i64(&req.params, "sessionId") else {
        return err(&req.id, "bad_params", "missing sessionId", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM class_sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "session not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for (sql, table) in [
        (
            "DELETE FROM attendances WHERE class_session_id = ?",
            "attendances",
        ),
        ("DELETE FROM class_sessions WHERE id = ?", "class_sessions"),
    ] {
        if let Err(e) = tx.execute(sql, [session_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.get" => Some(handle_sessions_get(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        _ => None,
    }
}
