use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{list_result, param_i64, param_id_list, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn group_exists(conn: &Connection, class_group_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM class_groups WHERE id = ?",
        [class_group_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn member_ids(conn: &Connection, class_group_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM class_group_students WHERE class_group_id = ? ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map([class_group_id], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn lessons_for_group(
    conn: &Connection,
    class_group_id: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, standard_duration
         FROM lessons WHERE class_group_id = ? ORDER BY id",
    )?;
    let lessons = stmt
        .query_map([class_group_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "standardDuration": r.get::<_, f64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lessons)
}

fn handle_class_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Correlated subqueries for the dashboard counts; joins would
    // double-count once a group has both students and lessons.
    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.name,
           g.description,
           g.schedule,
           (SELECT COUNT(*) FROM class_group_students m WHERE m.class_group_id = g.id)
             AS student_count,
           (SELECT COUNT(*) FROM lessons l WHERE l.class_group_id = g.id) AS lesson_count
         FROM class_groups g
         ORDER BY g.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "name": row.get::<_, String>(1)?,
                "description": row.get::<_, String>(2)?,
                "schedule": row.get::<_, String>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
                "lessonCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(
            &req.id,
            json!({ "classGroups": list_result(&req.params, groups) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_class_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_group_id) = param_i64(&req.params, "classGroupId") else {
        return err(&req.id, "bad_params", "missing classGroupId", None);
    };

    let base = conn
        .query_row(
            "SELECT id, name, description, schedule, created_at, updated_at
             FROM class_groups WHERE id = ?",
            [class_group_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "description": r.get::<_, String>(2)?,
                    "schedule": r.get::<_, String>(3)?,
                    "createdAt": r.get::<_, Option<String>>(4)?,
                    "updatedAt": r.get::<_, Option<String>>(5)?,
                }))
            },
        )
        .optional();

    let mut group = match base {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "class group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match member_ids(conn, class_group_id) {
        Ok(ids) => group["studentIds"] = json!(ids),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match lessons_for_group(conn, class_group_id) {
        Ok(lessons) => group["lessons"] = json!(lessons),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    ok(&req.id, json!({ "classGroup": group }))
}

fn handle_class_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match param_str(&req.params, "name") {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let description = param_str(&req.params, "description").unwrap_or("").to_string();
    let schedule = param_str(&req.params, "schedule").unwrap_or("").to_string();
    let student_ids = param_id_list(&req.params, "studentIds").unwrap_or_default();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let now = db::now_iso();
    if let Err(e) = tx.execute(
        "INSERT INTO class_groups(name, description, schedule, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&name, &description, &schedule, &now, &now),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_groups" })),
        );
    }
    let class_group_id = tx.last_insert_rowid();

    for student_id in &student_ids {
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO class_group_students(class_group_id, student_id) VALUES(?, ?)",
            (class_group_id, student_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "class_group_students" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "classGroupId": class_group_id, "name": name }),
    )
}

fn handle_class_groups_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_group_id) = param_i64(&req.params, "classGroupId") else {
        return err(&req.id, "bad_params", "missing classGroupId", None);
    };

    match group_exists(conn, class_group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    for (key, set) in [
        ("name", "name = ?"),
        ("description", "description = ?"),
        ("schedule", "schedule = ?"),
    ] {
        if let Some(v) = param_str(&req.params, key) {
            sets.push(set);
            args.push(rusqlite::types::Value::Text(v.to_string()));
        }
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?");
        args.push(rusqlite::types::Value::Text(db::now_iso()));
        args.push(rusqlite::types::Value::Integer(class_group_id));
        let sql = format!("UPDATE class_groups SET {} WHERE id = ?", sets.join(", "));
        if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(args)) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "class_groups" })),
            );
        }
    }

    // Optional wholesale membership replace, the update form's behavior
    // in the original client.
    if let Some(student_ids) = param_id_list(&req.params, "studentIds") {
        if let Err(resp) = replace_members(conn, &req.id, class_group_id, &student_ids) {
            return resp;
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn replace_members(
    conn: &Connection,
    req_id: &str,
    class_group_id: i64,
    student_ids: &[i64],
) -> Result<(), serde_json::Value> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(req_id, "db_tx_failed", e.to_string(), None))?;

    tx.execute(
        "DELETE FROM class_group_students WHERE class_group_id = ?",
        [class_group_id],
    )
    .map_err(|e| {
        err(
            req_id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_group_students" })),
        )
    })?;

    for student_id in student_ids {
        tx.execute(
            "INSERT OR IGNORE INTO class_group_students(class_group_id, student_id) VALUES(?, ?)",
            (class_group_id, student_id),
        )
        .map_err(|e| {
            err(
                req_id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "class_group_students" })),
            )
        })?;
    }

    tx.commit()
        .map_err(|e| err(req_id, "db_commit_failed", e.to_string(), None))
}

fn handle_set_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_group_id) = param_i64(&req.params, "classGroupId") else {
        return err(&req.id, "bad_params", "missing classGroupId", None);
    };
    let Some(student_ids) = param_id_list(&req.params, "studentIds") else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };

    match group_exists(conn, class_group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(resp) = replace_members(conn, &req.id, class_group_id, &student_ids) {
        return resp;
    }
    ok(&req.id, json!({ "studentIds": student_ids }))
}

fn handle_add_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(class_group_id), Some(student_id)) = (
        param_i64(&req.params, "classGroupId"),
        param_i64(&req.params, "studentId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing classGroupId or studentId",
            None,
        );
    };

    match group_exists(conn, class_group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO class_group_students(class_group_id, student_id) VALUES(?, ?)",
        (class_group_id, student_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_group_students" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_remove_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(class_group_id), Some(student_id)) = (
        param_i64(&req.params, "classGroupId"),
        param_i64(&req.params, "studentId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing classGroupId or studentId",
            None,
        );
    };

    if let Err(e) = conn.execute(
        "DELETE FROM class_group_students WHERE class_group_id = ? AND student_id = ?",
        (class_group_id, student_id),
    ) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_group_students" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_class_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_group_id) = param_i64(&req.params, "classGroupId") else {
        return err(&req.id, "bad_params", "missing classGroupId", None);
    };

    match group_exists(conn, class_group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependency order: leaves first, then the group row.
    for (sql, table) in [
        (
            "DELETE FROM attendances
             WHERE class_session_id IN
               (SELECT id FROM class_sessions WHERE class_group_id = ?)",
            "attendances",
        ),
        (
            "DELETE FROM class_sessions WHERE class_group_id = ?",
            "class_sessions",
        ),
        (
            "DELETE FROM project_submissions
             WHERE project_id IN (SELECT id FROM projects WHERE class_group_id = ?)",
            "project_submissions",
        ),
        ("DELETE FROM projects WHERE class_group_id = ?", "projects"),
        ("DELETE FROM lessons WHERE class_group_id = ?", "lessons"),
        (
            "DELETE FROM certificates WHERE class_group_id = ?",
            "certificates",
        ),
        (
            "DELETE FROM class_group_students WHERE class_group_id = ?",
            "class_group_students",
        ),
        ("DELETE FROM class_groups WHERE id = ?", "class_groups"),
    ] {
        if let Err(e) = tx.execute(sql, [class_group_id]) {
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
        "classGroups.list" => Some(handle_class_groups_list(state, req)),
        "classGroups.get" => Some(handle_class_groups_get(state, req)),
        "classGroups.create" => Some(handle_class_groups_create(state, req)),
        "classGroups.update" => Some(handle_class_groups_update(state, req)),
        "classGroups.delete" => Some(handle_class_groups_delete(state, req)),
        "classGroups.setStudents" => Some(handle_set_students(state, req)),
        "classGroups.addStudent" => Some(handle_add_student(state, req)),
        "classGroups.removeStudent" => Some(handle_remove_student(state, req)),
        _ => None,
    }
}
