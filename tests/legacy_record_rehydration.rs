mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

/// Builds a workspace the way early versions left it: no category or
/// timestamp columns and a record body missing most of its fields, with
/// empty HPS slots stored as null and a row without name or gender.
fn plant_legacy_workspace(workspace: &std::path::Path) {
    let conn = Connection::open(workspace.join("classrecord.sqlite3")).expect("open legacy db");
    conn.execute_batch(
        "CREATE TABLE class_records(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            quarter TEXT NOT NULL,
            school_year TEXT NOT NULL,
            record_json TEXT NOT NULL,
            UNIQUE(class_id, subject_id, quarter, school_year)
        );",
    )
    .expect("create legacy table");
    let body = json!({
        "id": "stale-body-id",
        "classId": "c7",
        "subjectId": "eng7",
        "quarter": "Q2",
        "schoolYear": "2024-2025",
        "weights": { "ww": 30 },
        "hpsWW": [20, null, 20],
        "rows": [
            {
                "studentId": "a1",
                "studentName": "Cruz, Ana",
                "gender": "F",
                "ww": [18, null]
            },
            {
                "studentId": "b2",
                "studentName": "Bautista, Ben",
                "gender": "M",
                "ww": [10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10],
                "pt": [null],
                "qa": null
            },
            { "studentId": "c3", "ww": [4] }
        ]
    });
    conn.execute(
        "INSERT INTO class_records(id, class_id, subject_id, quarter, school_year, record_json)
         VALUES('legacy-1', 'c7', 'eng7', 'Q2', '2024-2025', ?)",
        [body.to_string()],
    )
    .expect("insert legacy record");
}

#[test]
fn legacy_record_is_backfilled_and_recomputed_on_open() {
    let workspace = temp_dir("classrecord-legacy-rehydrate");
    plant_legacy_workspace(&workspace);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.open",
        json!({
            "classId": "c7",
            "subjectId": "eng7",
            "quarter": "2nd",
            "schoolYear": "2024-2025",
            "subjectName": "English 7"
        }),
    );
    assert_eq!(opened["created"], json!(false));
    let record = &opened["record"];
    assert_eq!(record["id"], json!("legacy-1"));
    assert_eq!(record["subjectCategory"], json!("languages"));
    assert_eq!(record["weights"], json!({ "ww": 30, "pt": 50, "qa": 20 }));
    assert_eq!(
        record["hpsWW"],
        json!([20, 0, 20, 0, 0, 0, 0, 0, 0, 0])
    );
    assert_eq!(record["hpsPT"], json!([0, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(record["hpsQA"], json!(0));
    assert_eq!(record["hpsWWTotal"], json!(40));
    assert_eq!(record["hpsPTTotal"], json!(0));

    let rows = record["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    let ana = rows
        .iter()
        .find(|r| r["studentId"] == json!("a1"))
        .expect("a1 row");
    assert_eq!(ana["ww"].as_array().map(|v| v.len()), Some(10));
    assert_eq!(ana["pt"].as_array().map(|v| v.len()), Some(10));
    assert_eq!(ana["wwTotal"].as_f64(), Some(18.0));
    assert_eq!(ana["wwPS"].as_f64(), Some(45.0));
    assert_eq!(ana["wwWS"].as_f64(), Some(13.5));
    assert_eq!(ana["initialGrade"].as_f64(), Some(13.5));
    assert_eq!(ana["quarterlyGrade"], json!(63));

    // Extra cells beyond the ten slots are dropped before totaling.
    let ben = rows
        .iter()
        .find(|r| r["studentId"] == json!("b2"))
        .expect("b2 row");
    assert_eq!(ben["ww"].as_array().map(|v| v.len()), Some(10));
    assert_eq!(ben["wwTotal"].as_f64(), Some(100.0));
    assert_eq!(ben["qa"].as_f64(), Some(0.0));

    // A row missing its name and gender is kept under its id.
    let carl = rows
        .iter()
        .find(|r| r["studentId"] == json!("c3"))
        .expect("c3 row");
    assert_eq!(carl["studentName"], json!("c3"));
    assert_eq!(carl["gender"], json!("unspecified"));
    assert_eq!(carl["wwPS"].as_f64(), Some(10.0));

    // Saving migrates the row in place and keeps the stored id.
    let handle = opened["handle"].as_str().expect("handle").to_string();
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "records.save",
        json!({ "handle": handle }),
    );
    assert_eq!(saved["id"], json!("legacy-1"));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.list",
        json!({ "classId": "c7" }),
    );
    assert_eq!(listed["records"][0]["subjectCategory"], json!("languages"));
    assert!(listed["records"][0]["updatedAt"].is_string());

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
