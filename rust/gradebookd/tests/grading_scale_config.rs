use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
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

fn level(name: &str, bands: &[(i64, i64, &str)]) -> String {
    let items: Vec<String> = bands
        .iter()
        .map(|(min, max, code)| {
            format!(
                "{{ min = {}, max = {}, code = \"{}\", remark = \"{} band\" }}",
                min, max, code, code
            )
        })
        .collect();
    format!("[levels.{}]\nbands = [{}]\n\n", name, items.join(", "))
}

fn write_scale(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("scale.toml");
    std::fs::write(&path, body).expect("write scale");
    path
}

#[test]
fn invalid_scale_file_stops_startup() {
    let dir = temp_dir("gradebook-scale-bad");
    let body = format!(
        "{}{}{}",
        level("PRIMARY", &[(50, 100, "P"), (0, 45, "F")]),
        level("JHS", &[(50, 100, "P"), (0, 49, "F")]),
        level("SHS", &[(50, 100, "P"), (0, 49, "F")]),
    );
    let path = write_scale(&dir, &body);

    let output = Command::new(env!("CARGO_BIN_EXE_gradebookd"))
        .env("GRADEBOOK_GRADING_SCALE", &path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("run gradebookd");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "no protocol output before a valid scale");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not covered"), "stderr: {}", stderr);
}

#[test]
fn custom_scale_is_used_for_grading() {
    let dir = temp_dir("gradebook-scale-custom");
    let body = format!(
        "{}{}{}",
        level("PRIMARY", &[(50, 100, "P"), (0, 49, "F")]),
        level("JHS", &[(50, 100, "P"), (0, 49, "F")]),
        level("SHS", &[(75, 100, "D"), (50, 74, "C"), (0, 49, "U")]),
    );
    let path = write_scale(&dir, &body);

    let mut child = Command::new(env!("CARGO_BIN_EXE_gradebookd"))
        .env("GRADEBOOK_GRADING_SCALE", &path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let payload = json!({
        "id": "1",
        "method": "grading.preview",
        "params": { "classwork": 30, "exam": 46, "level": "SHS" }
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["result"]["grade"], json!("D"));
    assert_eq!(value["result"]["remark"], json!("D band"));
}
