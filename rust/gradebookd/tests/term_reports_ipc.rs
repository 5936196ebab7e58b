use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOK_GRADING_SCALE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(false), "{} unexpectedly succeeded: {}", method, value);
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

fn id_of(result: &serde_json::Value, key: &str) -> String {
    result[key].as_str().expect(key).to_string()
}

fn report_for<'a>(list: &'a serde_json::Value, student: &str) -> &'a serde_json::Value {
    list["reports"]
        .as_array()
        .expect("reports")
        .iter()
        .find(|r| r["studentId"].as_str() == Some(student))
        .expect("report for student")
}

#[test]
fn generate_publish_and_parent_visibility() {
    let workspace = temp_dir("gradebook-term-reports");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (si, rd) = (&mut stdin, &mut reader);
    request_ok(si, rd, "ws", "workspace.select", json!({ "path": workspace.to_string_lossy() }));

    let class_teacher = id_of(
        &request_ok(
            si,
            rd,
            "s1",
            "staff.create",
            json!({ "firstName": "Ama", "lastName": "Owusu", "role": "teacher" }),
        ),
        "staffId",
    );
    let subject_teacher = id_of(
        &request_ok(
            si,
            rd,
            "s2",
            "staff.create",
            json!({ "firstName": "Kojo", "lastName": "Addo", "role": "teacher" }),
        ),
        "staffId",
    );
    let parent = id_of(
        &request_ok(
            si,
            rd,
            "p1",
            "parents.create",
            json!({ "name": "Mrs Adjei", "phone": "0240000000" }),
        ),
        "parentId",
    );
    let class = id_of(
        &request_ok(
            si,
            rd,
            "c1",
            "classes.create",
            json!({ "name": "Basic 6", "level": "Primary", "classTeacherId": class_teacher }),
        ),
        "classId",
    );
    let year = id_of(
        &request_ok(
            si,
            rd,
            "y1",
            "years.create",
            json!({ "name": "2025/2026", "startDate": "2025-09-01", "endDate": "2026-07-31" }),
        ),
        "academicYearId",
    );
    let term = id_of(
        &request_ok(
            si,
            rd,
            "t1",
            "terms.create",
            json!({ "academicYearId": year, "name": "First Term", "termNumber": 1, "startDate": "2025-09-01", "endDate": "2025-12-15" }),
        ),
        "termId",
    );
    request_ok(si, rd, "t1c", "terms.setCurrent", json!({ "termId": term }));

    let mut offerings = Vec::new();
    for (i, name) in ["Mathematics", "English"].iter().enumerate() {
        let subject = id_of(
            &request_ok(si, rd, &format!("sub{}", i), "subjects.create", json!({ "name": name })),
            "subjectId",
        );
        offerings.push(id_of(
            &request_ok(
                si,
                rd,
                &format!("off{}", i),
                "offerings.create",
                json!({ "classId": class, "subjectId": subject, "teacherId": subject_teacher }),
            ),
            "offeringId",
        ));
    }

    let mut students = Vec::new();
    for (i, name) in ["Adjei", "Badu", "Cobbina"].iter().enumerate() {
        let mut params = json!({ "firstName": "Kid", "lastName": name });
        if i == 0 {
            params["parentId"] = json!(parent);
        }
        let sid = id_of(
            &request_ok(si, rd, &format!("st{}", i), "students.create", params),
            "studentId",
        );
        request_ok(
            si,
            rd,
            &format!("en{}", i),
            "enrollments.create",
            json!({ "studentId": sid, "classId": class }),
        );
        students.push(sid);
    }
    let (a, b, c) = (students[0].clone(), students[1].clone(), students[2].clone());

    request_ok(
        si,
        rd,
        "m",
        "scores.record",
        json!({
            "actorId": subject_teacher, "offeringId": offerings[0], "termId": term,
            "entries": [{ "studentId": a, "exam": 50 }, { "studentId": b, "exam": 40 }]
        }),
    );
    request_ok(
        si,
        rd,
        "e",
        "scores.record",
        json!({
            "actorId": subject_teacher, "offeringId": offerings[1], "termId": term,
            "entries": [{ "studentId": a, "classwork": 20, "exam": 30 }, { "studentId": b, "exam": 40 }]
        }),
    );

    for (i, (date, status_a, status_b)) in [
        ("2025-09-10", "present", "absent"),
        ("2025-09-11", "late", "present"),
        ("2025-10-01", "excused", "present"),
        ("2025-11-20", "absent", "absent"),
    ]
    .iter()
    .enumerate()
    {
        request_ok(
            si,
            rd,
            &format!("att{}", i),
            "attendance.record",
            json!({
                "actorId": class_teacher, "classId": class, "date": date,
                "entries": [{ "studentId": a, "status": status_a }, { "studentId": b, "status": status_b }]
            }),
        );
    }

    let cohort = json!({ "actorId": class_teacher, "classId": class, "termId": term, "asOf": "2025-10-15" });

    assert_eq!(request_err(si, rd, "pub0", "termReports.publish", cohort.clone()), "invalid_state");
    let mut foreign = cohort.clone();
    foreign["actorId"] = json!(subject_teacher);
    assert_eq!(request_err(si, rd, "gen0", "termReports.generate", foreign), "forbidden");

    let generated = request_ok(si, rd, "gen1", "termReports.generate", cohort.clone());
    assert_eq!(generated["generatedCount"], json!(3));

    let list = request_ok(
        si,
        rd,
        "list1",
        "termReports.list",
        json!({ "classId": class, "termId": term }),
    );
    let ra = report_for(&list, &a);
    assert_eq!(ra["totalMarks"].as_f64(), Some(100.0));
    assert_eq!(ra["averageScore"].as_f64(), Some(50.0));
    assert_eq!(ra["classPosition"], json!(1));
    assert_eq!(ra["classSize"], json!(3));
    assert_eq!(
        (ra["totalDays"].clone(), ra["daysPresent"].clone(), ra["daysAbsent"].clone()),
        (json!(3), json!(2), json!(0))
    );
    let rb = report_for(&list, &b);
    assert_eq!(rb["averageScore"].as_f64(), Some(40.0));
    assert_eq!(rb["classPosition"], json!(2));
    assert_eq!((rb["daysPresent"].clone(), rb["daysAbsent"].clone()), (json!(2), json!(1)));
    let rc = report_for(&list, &c);
    assert!(rc["averageScore"].is_null());
    assert!(rc["classPosition"].is_null());
    assert!(rc["classSize"].is_null());

    let parent_view = json!({ "parentId": parent, "studentId": a, "termId": term });
    let hidden = request_ok(si, rd, "pr0", "parent.reports", parent_view.clone());
    assert_eq!(hidden["reports"].as_array().map(|r| r.len()), Some(0));
    assert_eq!(request_err(si, rd, "pr1", "parent.report", parent_view.clone()), "invalid_state");

    let published = request_ok(si, rd, "pub1", "termReports.publish", cohort.clone());
    assert_eq!(published["publishedCount"], json!(3));

    let visible = request_ok(si, rd, "pr2", "parent.reports", parent_view.clone());
    assert_eq!(visible["reports"].as_array().map(|r| r.len()), Some(1));
    let detail = request_ok(si, rd, "pr3", "parent.report", parent_view.clone());
    assert_eq!(detail["subjects"].as_array().map(|s| s.len()), Some(2));
    assert_eq!(detail["isPublished"], json!(true));

    let mut not_mine = parent_view.clone();
    not_mine["studentId"] = json!(b);
    assert_eq!(request_err(si, rd, "pr4", "parent.report", not_mine), "forbidden");

    request_ok(
        si,
        rd,
        "upd",
        "termReports.update",
        json!({
            "actorId": class_teacher, "studentId": a, "termId": term,
            "classTeacherRemarks": "Hardworking", "conduct": "Good", "promotionStatus": "Promoted"
        }),
    );

    // Regeneration rewrites aggregates only.
    request_ok(si, rd, "gen2", "termReports.generate", cohort.clone());
    let report = request_ok(
        si,
        rd,
        "get",
        "termReports.get",
        json!({ "studentId": a, "termId": term }),
    );
    assert_eq!(report["classTeacherRemarks"], json!("Hardworking"));
    assert_eq!(report["conduct"], json!("Good"));
    assert_eq!(report["averageScore"].as_f64(), Some(50.0));
    assert_eq!(report["classPosition"], json!(1));
    assert_eq!(report["isPublished"], json!(true));

    let children = request_ok(si, rd, "kids", "parent.children", json!({ "parentId": parent }));
    let kids = children["children"].as_array().expect("children");
    assert_eq!(kids.len(), 1);
    assert_eq!(kids[0]["className"], json!("Basic 6"));

    let attendance = request_ok(si, rd, "att", "parent.attendance", parent_view.clone());
    let records = attendance["records"].as_array().expect("records");
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["date"], json!("2025-11-20"));

    let unpublished = request_ok(si, rd, "unpub", "termReports.unpublish", cohort);
    assert_eq!(unpublished["unpublishedCount"], json!(3));
    let hidden = request_ok(si, rd, "pr5", "parent.reports", parent_view);
    assert_eq!(hidden["reports"].as_array().map(|r| r.len()), Some(0));
}
