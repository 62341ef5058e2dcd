use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{list_result, param_i64, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const CERT_COLS: &str =
    "id, student_id, class_group_id, issue_date, validation_code, created_at, updated_at";

fn certificate_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, i64>(1)?,
        "classGroupId": row.get::<_, Option<i64>>(2)?,
        "issueDate": row.get::<_, String>(3)?,
        "validationCode": row.get::<_, String>(4)?,
        "createdAt": row.get::<_, Option<String>>(5)?,
        "updatedAt": row.get::<_, Option<String>>(6)?,
    }))
}

fn handle_certificates_issue(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(student_id), Some(class_group_id)) = (
        param_i64(&req.params, "studentId"),
        param_i64(&req.params, "classGroupId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing studentId or classGroupId",
            None,
        );
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let group_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM class_groups WHERE id = ?",
            [class_group_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if group_exists.is_none() {
        return err(&req.id, "not_found", "class group not found", None);
    }

    // Issuing twice for the same student and class hands back the
    // existing certificate instead of minting a second one.
    let sql = format!(
        "SELECT {CERT_COLS} FROM certificates WHERE student_id = ? AND class_group_id = ?"
    );
    match conn
        .query_row(&sql, (student_id, class_group_id), certificate_json)
        .optional()
    {
        Ok(Some(existing)) => {
            return ok(
                &req.id,
                json!({ "certificate": existing, "alreadyIssued": true }),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let cert_id = Uuid::new_v4().to_string();
    let validation_code = auth::new_validation_code();
    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO certificates(id, student_id, class_group_id, issue_date, validation_code,
                                  created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &cert_id,
            student_id,
            class_group_id,
            &now,
            &validation_code,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "certificates" })),
        );
    }

    ok(
        &req.id,
        json!({
            "certificate": {
                "id": cert_id,
                "studentId": student_id,
                "classGroupId": class_group_id,
                "issueDate": now,
                "validationCode": validation_code,
            },
            "alreadyIssued": false
        }),
    )
}

fn handle_certificates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let rows = if let Some(student_id) = param_i64(&req.params, "studentId") {
        let sql =
            format!("SELECT {CERT_COLS} FROM certificates WHERE student_id = ? ORDER BY issue_date");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([student_id], certificate_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        let sql = format!("SELECT {CERT_COLS} FROM certificates ORDER BY issue_date");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([], certificate_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(certificates) => ok(
            &req.id,
            json!({ "certificates": list_result(&req.params, certificates) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_certificates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(cert_id) = param_str(&req.params, "certificateId") else {
        return err(&req.id, "bad_params", "missing certificateId", None);
    };

    let sql = format!("SELECT {CERT_COLS} FROM certificates WHERE id = ?");
    match conn.query_row(&sql, [cert_id], certificate_json).optional() {
        Ok(Some(certificate)) => ok(&req.id, json!({ "certificate": certificate })),
        Ok(None) => err(&req.id, "not_found", "certificate not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_certificates_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(code) = param_str(&req.params, "validationCode") else {
        return err(&req.id, "bad_params", "missing validationCode", None);
    };

    // Validation is a public lookup; an unknown code is a negative
    // answer, not an error.
    let sql = format!(
        "SELECT c.id, c.student_id, c.class_group_id, c.issue_date, c.validation_code,
                s.name, g.name
         FROM certificates c
         JOIN students s ON s.id = c.student_id
         LEFT JOIN class_groups g ON g.id = c.class_group_id
         WHERE c.validation_code = ?"
    );
    let row = conn
        .query_row(&sql, [code], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "classGroupId": r.get::<_, Option<i64>>(2)?,
                "issueDate": r.get::<_, String>(3)?,
                "validationCode": r.get::<_, String>(4)?,
                "studentName": r.get::<_, String>(5)?,
                "classGroupName": r.get::<_, Option<String>>(6)?,
            }))
        })
        .optional();

    match row {
        Ok(Some(certificate)) => ok(
            &req.id,
            json!({ "valid": true, "certificate": certificate }),
        ),
        Ok(None) => ok(&req.id, json!({ "valid": false })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_certificates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(cert_id) = param_str(&req.params, "certificateId") else {
        return err(&req.id, "bad_params", "missing certificateId", None);
    };

    let deleted = match conn.execute("DELETE FROM certificates WHERE id = ?", [cert_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "certificates" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "certificate not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "certificates.issue" => Some(handle_certificates_issue(state, req)),
        "certificates.list" => Some(handle_certificates_list(state, req)),
        "certificates.get" => Some(handle_certificates_get(state, req)),
        "certificates.validate" => Some(handle_certificates_validate(state, req)),
        "certificates.delete" => Some(handle_certificates_delete(state, req)),
        _ => None,
    }
}
