use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy::{SubjectCategory, WeightDefaults, WeightingPolicy};
use serde_json::{json, Map, Value};
use tracing::info;

const GRADING_KEY: &str = "setup.grading";

fn policy_json(p: WeightingPolicy) -> Value {
    json!({ "ww": p.ww, "pt": p.pt, "qa": p.qa })
}

fn default_grading() -> Value {
    let builtin = WeightDefaults::default();
    let mut obj = Map::new();
    for c in SubjectCategory::ALL {
        obj.insert(c.key().to_string(), policy_json(builtin.for_category(c)));
    }
    Value::Object(obj)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Applies a `{category: {ww?, pt?, qa?}}` patch. Each touched category must
/// still total 100 afterwards.
fn merge_grading_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal grading object must be a JSON object".to_string())?;
    for (cat_key, cat_patch) in patch {
        let Some(category) = SubjectCategory::parse(cat_key) else {
            return Err(format!("unknown subject category: {}", cat_key));
        };
        let Some(cat_patch) = cat_patch.as_object() else {
            return Err(format!("{} must be an object", cat_key));
        };
        let entry = obj
            .entry(category.key().to_string())
            .or_insert_with(|| json!({}));
        let Some(entry) = entry.as_object_mut() else {
            return Err(format!("{} must be an object", cat_key));
        };
        for (k, v) in cat_patch {
            match k.as_str() {
                "ww" | "pt" | "qa" => {
                    let field = format!("{}.{}", cat_key, k);
                    entry.insert(k.clone(), Value::from(parse_i64_range(v, &field, 0, 100)?));
                }
                _ => return Err(format!("unknown {} field: {}", cat_key, k)),
            }
        }
        let total: i64 = ["ww", "pt", "qa"]
            .iter()
            .map(|k| entry.get(*k).and_then(|v| v.as_i64()).unwrap_or(0))
            .sum();
        if total != 100 {
            return Err(format!("{} weights must total 100 (got {})", cat_key, total));
        }
    }
    Ok(())
}

fn load_grading(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut current = default_grading();
    if let Some(saved) = db::settings_get_json(conn, GRADING_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed historical value keeps the built-in table.
            let mut candidate = current.clone();
            if merge_grading_patch(&mut candidate, saved_obj).is_ok() {
                current = candidate;
            }
        }
    }
    Ok(current)
}

fn weight_defaults_from(grading: &Value) -> WeightDefaults {
    let mut defaults = WeightDefaults::default();
    for c in SubjectCategory::ALL {
        let Some(entry) = grading.get(c.key()) else {
            continue;
        };
        let field = |k: &str| entry.get(k).and_then(|v| v.as_i64());
        if let (Some(ww), Some(pt), Some(qa)) = (field("ww"), field("pt"), field("qa")) {
            defaults = defaults.with_override(c, WeightingPolicy::new(ww, pt, qa));
        }
    }
    defaults
}

pub fn load_weight_defaults(conn: &rusqlite::Connection) -> anyhow::Result<WeightDefaults> {
    Ok(weight_defaults_from(&load_grading(conn)?))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_grading(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "grading": grading }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != "grading" {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section })),
        );
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_grading(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_grading_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, GRADING_KEY, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    state.weight_defaults = weight_defaults_from(&current);
    info!("grading defaults updated");
    ok(&req.id, json!({ "ok": true, "grading": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
