use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy::{Component, SubjectCategory};
use crate::record::{ClassroomRecord, EditError, EnrolledStudent, Quarter, RecordKey, Slot};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EditError> for HandlerErr {
    fn from(e: EditError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: None,
        }
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn parse_quarter(params: &Value) -> Result<Quarter, HandlerErr> {
    let raw = match params.get("quarter") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(HandlerErr::bad_params("missing quarter")),
    };
    Quarter::parse(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "quarter must be one of: Q1, Q2, Q3, Q4".to_string(),
        details: Some(json!({ "quarter": raw })),
    })
}

fn parse_category(params: &Value) -> Result<SubjectCategory, HandlerErr> {
    if let Some(raw) = params.get("subjectCategory").and_then(|v| v.as_str()) {
        return SubjectCategory::parse(raw).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "subjectCategory must be one of: languages, mathScience, mapeh, techVoc, other"
                .to_string(),
            details: Some(json!({ "subjectCategory": raw })),
        });
    }
    Ok(params
        .get("subjectName")
        .and_then(|v| v.as_str())
        .map(SubjectCategory::from_subject_label)
        .unwrap_or(SubjectCategory::Other))
}

fn parse_students(params: &Value) -> Result<Vec<EnrolledStudent>, HandlerErr> {
    match params.get("students") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid students: {}", e))),
    }
}

fn parse_component(params: &Value) -> Result<Component, HandlerErr> {
    let raw = required_str(params, "component")?;
    Component::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "component must be one of: ww, pt, qa".to_string(),
        details: Some(json!({ "component": raw })),
    })
}

fn parse_slot(params: &Value, component: Component) -> Result<Slot, HandlerErr> {
    let index = match params.get("slot") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let Some(n) = v.as_u64() else {
                return Err(HandlerErr::bad_params("slot must be a non-negative integer"));
            };
            Some(usize::try_from(n).unwrap_or(usize::MAX))
        }
    };
    Ok(Slot::new(component, index)?)
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal_error",
        message: format!("failed to encode response: {}", e),
        details: None,
    })
}

fn record_json(record: &ClassroomRecord) -> Result<Value, HandlerErr> {
    to_json(record)
}

fn session<'a>(state: &'a AppState, params: &Value) -> Result<(String, &'a ClassroomRecord), HandlerErr> {
    let handle = required_str(params, "handle")?;
    state
        .sessions
        .get(handle)
        .map(|r| (handle.to_string(), r))
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "record is not open".to_string(),
            details: Some(json!({ "handle": handle })),
        })
}

fn open_record(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        });
    };

    let key = RecordKey {
        class_id: required_str(params, "classId")?.to_string(),
        subject_id: required_str(params, "subjectId")?.to_string(),
        quarter: parse_quarter(params)?,
        school_year: required_str(params, "schoolYear")?.to_string(),
    };
    let category = parse_category(params)?;

    let stored = db::record_load(conn, &key).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let (record, created) = match stored {
        Some(persisted) => (
            ClassroomRecord::rehydrate(persisted, category, &state.weight_defaults),
            false,
        ),
        None => {
            let students = parse_students(params)?;
            (
                ClassroomRecord::create_new(key, category, &students, &state.weight_defaults),
                true,
            )
        }
    };

    let record_value = record_json(&record)?;
    let handle = Uuid::new_v4().to_string();
    info!(
        handle = %handle,
        class_id = %record.key().class_id,
        subject_id = %record.key().subject_id,
        quarter = record.key().quarter.label(),
        created,
        rows = record.rows().len(),
        "record opened"
    );
    let body = json!({
        "handle": handle,
        "created": created,
        "weightsValid": record.weights().is_valid(),
        "record": record_value,
    });
    state.sessions.insert(handle, record);
    Ok(body)
}

/// Runs one edit against an open record and swaps the result into the session.
fn edit_record<F>(state: &mut AppState, params: &Value, edit: F) -> Result<ClassroomRecord, HandlerErr>
where
    F: FnOnce(&ClassroomRecord) -> Result<ClassroomRecord, HandlerErr>,
{
    let (handle, current) = session(state, params)?;
    let next = edit(current)?;
    state.sessions.insert(handle, next.clone());
    Ok(next)
}

fn set_weight(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let component = parse_component(params)?;
    let Some(value) = params.get("value").and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::bad_params("value must be an integer percentage"));
    };
    let next = edit_record(state, params, |r| Ok(r.with_weight(component, value)))?;
    Ok(json!({
        "weights": to_json(next.weights())?,
        "weightsTotal": next.weights().total(),
        "weightsValid": next.weights().is_valid(),
        "record": record_json(&next)?,
    }))
}

fn set_hps(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let component = parse_component(params)?;
    let slot = parse_slot(params, component)?;
    let value = match params.get("value").and_then(|v| v.as_u64()) {
        Some(v) => u32::try_from(v).map_err(|_| HandlerErr::bad_params("value is too large"))?,
        None => {
            return Err(HandlerErr {
                code: "bad_params",
                message: "value must be a non-negative integer".to_string(),
                details: params.get("value").map(|v| json!({ "value": v })),
            })
        }
    };
    let next = edit_record(state, params, |r| Ok(r.with_hps(slot, value)?))?;
    let hps = next.hps();
    Ok(json!({
        "hpsTotals": { "ww": hps.ww_total(), "pt": hps.pt_total(), "qa": hps.qa() },
        "record": record_json(&next)?,
    }))
}

fn set_score(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?.to_string();
    let component = parse_component(params)?;
    let slot = parse_slot(params, component)?;
    // A cleared cell counts as zero.
    let value = match params.get("value") {
        None | Some(Value::Null) => 0.0,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("value must be a number"))?,
    };
    let next = edit_record(state, params, |r| Ok(r.with_score(&student_id, slot, value)?))?;
    let row = next
        .row(&student_id)
        .ok_or_else(|| HandlerErr::from(EditError::StudentNotFound(student_id.clone())))?;
    Ok(json!({ "row": to_json(row)? }))
}

fn recalculate(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let next = edit_record(state, params, |r| Ok(calc::recalculate_all(r)))?;
    Ok(json!({ "record": record_json(&next)? }))
}

fn save_record(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        });
    };
    let (handle, record) = session(state, params)?;
    let weights = record.weights();
    if !weights.is_valid() {
        warn!(handle = %handle, total = weights.total(), "refusing to save record with invalid weights");
        return Err(HandlerErr {
            code: "invalid_weights",
            message: "weights must total 100 before saving".to_string(),
            details: Some(json!({ "weights": to_json(weights)?, "total": weights.total() })),
        });
    }

    let saved = db::record_save(conn, record).map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "class_records" })),
    })?;
    let id = saved.id().map(str::to_string);
    info!(handle = %handle, id = ?id, "record saved");
    state.sessions.insert(handle, saved);
    Ok(json!({ "ok": true, "id": id }))
}

fn get_record(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (_, record) = session(state, params)?;
    Ok(json!({
        "weightsValid": record.weights().is_valid(),
        "record": record_json(record)?,
    }))
}

fn summarize_record(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (_, record) = session(state, params)?;
    to_json(&calc::summarize(record))
}

fn handle_records_close(state: &mut AppState, req: &Request) -> Value {
    let handle = match required_str(&req.params, "handle") {
        Ok(h) => h,
        Err(e) => return e.response(&req.id),
    };
    let closed = state.sessions.remove(handle).is_some();
    ok(&req.id, json!({ "closed": closed }))
}

fn handle_records_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match db::record_list(conn, class_id) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_transmute(req: &Request) -> Value {
    let Some(value) = req.params.get("value").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "value must be a number", None);
    };
    let grade = calc::transmute(value);
    ok(
        &req.id,
        json!({
            "quarterlyGrade": grade,
            "descriptor": calc::descriptor(grade).label(),
        }),
    )
}

fn respond(req: &Request, res: Result<Value, HandlerErr>) -> Value {
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "records.open" => Some(respond(req, open_record(state, &req.params))),
        "records.get" => Some(respond(req, get_record(state, &req.params))),
        "records.setWeight" => Some(respond(req, set_weight(state, &req.params))),
        "records.setHps" => Some(respond(req, set_hps(state, &req.params))),
        "records.setScore" => Some(respond(req, set_score(state, &req.params))),
        "records.recalculate" => Some(respond(req, recalculate(state, &req.params))),
        "records.save" => Some(respond(req, save_record(state, &req.params))),
        "records.summary" => Some(respond(req, summarize_record(state, &req.params))),
        "records.close" => Some(handle_records_close(state, req)),
        "records.list" => Some(handle_records_list(state, req)),
        "grades.transmute" => Some(handle_grades_transmute(req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn encode_failures_become_error_envelopes() {
        // Non-string map keys cannot be turned into a JSON object.
        let mut unencodable = BTreeMap::new();
        unencodable.insert((1, 2), "cell");
        let Err(e) = to_json(&unencodable) else {
            panic!("tuple keys must not encode");
        };
        assert_eq!(e.code, "internal_error");
        let resp = e.response("r1");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("internal_error"));
        assert!(resp.get("result").is_none());
    }

    #[test]
    fn set_score_replies_with_the_edited_row() {
        let mut state = AppState::default();
        let key = RecordKey {
            class_id: "c1".to_string(),
            subject_id: "math7".to_string(),
            quarter: Quarter::Q1,
            school_year: "2025-2026".to_string(),
        };
        let students: Vec<EnrolledStudent> = serde_json::from_value(json!([
            { "studentId": "s1", "lastName": "Santos", "firstName": "Maria", "gender": "F" }
        ]))
        .expect("students");
        let record = ClassroomRecord::create_new(
            key,
            SubjectCategory::MathScience,
            &students,
            &state.weight_defaults,
        );
        state.sessions.insert("h1".to_string(), record);

        let _ = set_hps(
            &mut state,
            &json!({ "handle": "h1", "component": "qa", "value": 50 }),
        )
        .map_err(|e| e.message)
        .expect("hps edit");
        let res = set_score(
            &mut state,
            &json!({ "handle": "h1", "studentId": "s1", "component": "qa", "value": 40 }),
        )
        .map_err(|e| e.message)
        .expect("score edit");
        assert_eq!(res["row"]["studentId"], json!("s1"));
        assert_eq!(res["row"]["qaPS"].as_f64(), Some(80.0));
        assert_eq!(res["row"]["qaWS"].as_f64(), Some(16.0));
    }
}
