use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "scamsense-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

const PASSWORD_CALL: &str = r#"{
  "id": "desk-call",
  "title": "Help desk call",
  "steps": [
    { "id": "ask", "kind": "question", "text": "IT asks for your password.", "options": [
      { "id": "refuse", "label": "Refuse", "outcome": "safe", "next": "end" },
      { "id": "tell", "label": "Tell them", "outcome": "dangerous", "next": "end_scammed" }
    ] }
  ]
}"#;

#[test]
fn cli_catalog_lists_builtin_scenarios() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let output = Command::new(exe).arg("catalog").output().expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available scenarios"));
    assert!(stdout.contains("sms-parcel-fee"));
    assert!(stdout.contains("chat-prize"));
}

#[test]
fn cli_validate_reports_repairs_and_canonical_form() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let doc = temp_path("validate.json");
    std::fs::write(
        &doc,
        "```json\n{\"steps\": [{\"text\": \"hi\", \"options\": [{\"label\": \"a\", \"outcome\": \"maybe\"}]}]}\n```",
    )
    .expect("write doc");

    let output = Command::new(exe)
        .arg("validate")
        .arg(&doc)
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("outcomes coerced: 1"), "{stdout}");

    let output = Command::new(exe)
        .arg("validate")
        .arg(&doc)
        .arg("--canonical")
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let canonical: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(canonical["steps"][0]["options"][0]["outcomeType"], "dangerous");
    std::fs::remove_file(doc).ok();
}

#[test]
fn cli_validate_rejects_documents_without_steps() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let doc = temp_path("empty.json");
    std::fs::write(&doc, "{\"title\": \"nothing here\"}").expect("write doc");
    let output = Command::new(exe)
        .arg("validate")
        .arg(&doc)
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no steps"), "{stderr}");
    std::fs::remove_file(doc).ok();
}

#[test]
fn cli_play_with_scripted_choices_persists_the_record() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let doc = temp_path("play.json");
    let store = temp_path("store");
    std::fs::write(&doc, PASSWORD_CALL).expect("write doc");

    let output = Command::new(exe)
        .arg("--store")
        .arg(&store)
        .arg("play")
        .arg(&doc)
        .args(["--choices", "tell"])
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("COMPROMISED"), "{stdout}");
    assert!(stdout.contains("Mistakes: 1"));

    let traces: Vec<_> = std::fs::read_dir(store.join("traces"))
        .expect("traces dir")
        .collect();
    assert_eq!(traces.len(), 1);
    std::fs::remove_dir_all(store).ok();
    std::fs::remove_file(doc).ok();
}

#[test]
fn cli_play_rejects_options_not_offered() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let output = Command::new(exe)
        .args(["play", "call-bank-otp", "--choices", "wire-money"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("wire-money"), "{stderr}");
}

#[test]
fn cli_play_fails_when_the_script_stops_early() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let store = temp_path("partial-store");
    let output = Command::new(exe)
        .arg("--store")
        .arg(&store)
        .args(["play", "call-bank-otp", "--choices", "ask-details"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ran out at step 'pressure'"), "{stderr}");
    let traces = std::fs::read_dir(store.join("traces")).map_or(0, Iterator::count);
    assert_eq!(traces, 0);
    std::fs::remove_dir_all(store).ok();
}

#[test]
fn cli_drill_writes_json_report() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let output_path = temp_path("drill.json");
    let status = Command::new(exe)
        .args([
            "drill",
            "--scenarios",
            "all",
            "--policies",
            "cautious,reckless,random",
            "--seeds",
            "1,0x2a",
            "--report",
            "json",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    let results: Vec<serde_json::Value> = serde_json::from_str(&content).expect("json report");
    assert_eq!(results.len(), 4 * 3 * 2);
    assert!(results.iter().all(|r| r["passed"] == true && r["deterministic"] == true));
    std::fs::remove_file(output_path).ok();
}

#[test]
fn cli_drill_markdown_names_each_scenario() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let output = Command::new(exe)
        .args(["drill", "--scenarios", "email-invoice", "--report", "markdown"])
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# Scamsense Drill Results"));
    assert!(stdout.contains("| email-invoice | cautious |"));
}

#[cfg(unix)]
#[test]
fn cli_generate_stores_the_normalized_scenario() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let script = temp_path("generator.sh");
    let store = temp_path("gen-store");
    std::fs::write(
        &script,
        format!("cat > /dev/null\ncat <<'EOF'\n```json\n{PASSWORD_CALL}\n```\nEOF\n"),
    )
    .expect("write script");

    let output = Command::new(exe)
        .arg("--store")
        .arg(&store)
        .args(["generate", "--topic", "password phishing", "--generator-cmd"])
        .arg(format!("sh {}", script.display()))
        .output()
        .expect("run cli");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(store.join("scenarios").join("desk-call.json").is_file());
    std::fs::remove_dir_all(store).ok();
    std::fs::remove_file(script).ok();
}

#[cfg(unix)]
#[test]
fn cli_generate_fails_fast_on_a_broken_generator() {
    let exe = env!("CARGO_BIN_EXE_scamsense");
    let output = Command::new(exe)
        .args(["generate", "--topic", "anything", "--generator-cmd", "false"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("generator failed"), "{stderr}");
}
