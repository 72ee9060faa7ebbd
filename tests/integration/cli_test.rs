use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Output, Stdio};
use std::thread;

fn seedsweep(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_seedsweep"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute seedsweep")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "Command failed with status: {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

#[test]
fn test_plan_json() {
    let output = seedsweep(&["plan", "--kind", "boot-seed", "--end", "604800", "-j", "4", "--json"]);
    let plan = stdout_json(&output);

    let tasks = plan.as_array().unwrap();
    assert_eq!(tasks.len(), 4);
    for (i, task) in tasks.iter().enumerate() {
        assert_eq!(task["id"], i);
        assert_eq!(task["units"], 151_200);
        assert_eq!(task["offset"], 151_200 * i as u64);
    }
    assert_eq!(tasks[3]["last_instant"], 604_799);
}

#[test]
fn test_plan_text() {
    let output = seedsweep(&["plan", "--kind", "egg", "--start", "100", "--end", "110", "-j", "3"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 tasks"));
    assert!(stdout.contains("Task 0: units [0, 4) = 4 units, instants 100..=103"));
    assert!(stdout.contains("Task 2: units [7, 10) = 3 units, instants 107..=109"));
}

#[test]
fn test_run_from_definition_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search.json");
    fs::write(
        &path,
        r#"{"kind": "pattern", "params": {"pattern": "LR"}, "range": {"start": 0, "end": 500, "combinations": 4}}"#,
    )
    .unwrap();

    let output = seedsweep(&[
        "run",
        "--definition",
        path.to_str().unwrap(),
        "-j",
        "2",
        "--chunk-size",
        "64",
        "--json",
    ]);
    let report = stdout_json(&output);

    assert_eq!(report["complete"], true);
    assert_eq!(report["cancelled"], false);
    assert_eq!(report["progress"]["total_processed"], 2_000);
    assert_eq!(report["tasks"].as_array().unwrap().len(), 2);

    let matches = report["results"]["pattern_matches"].as_array().unwrap();
    assert!(!matches.is_empty());
    assert_eq!(report["counts"]["pattern-match"], matches.len());
    assert!(matches.iter().all(|m| m["pattern"] == "LR"));
}

#[test]
fn test_run_text_reports_accelerator_fallback() {
    let output = seedsweep(&["run", "--kind", "boot-seed", "--end", "5000", "-j", "2", "--gpu"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Search Report:"));
    assert!(stdout.contains("Tasks completed: 2/2"));
    assert!(stdout.contains("Units processed: 5000/5000"));
    assert!(stdout.contains("Accelerator unavailable"));
}

#[test]
fn test_run_reports_task_failures() {
    let output = seedsweep(&["run", "--kind", "trainer-info", "--end", "100", "-j", "2", "--json"]);
    let report = stdout_json(&output);

    assert_eq!(report["complete"], false);
    let failures = report["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].as_str().unwrap().contains("trainer-info search needs"));
}

#[test]
fn test_unknown_kind_fails() {
    let output = seedsweep(&["run", "--kind", "roaming", "--end", "100"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported search kind 'roaming'"));
}

#[test]
fn test_missing_end_fails() {
    let output = seedsweep(&["plan", "--kind", "egg"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--end is required"));
}

#[test]
fn test_malformed_definition_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"kind\": \"egg\"").unwrap();

    let output = seedsweep(&["plan", "--definition", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid search definition"));
}

#[cfg(unix)]
#[test]
fn test_interrupt_cancels_search() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_seedsweep"))
        .args([
            "run",
            "--kind",
            "trainer-info",
            "--params",
            r#"{"target_trainer_id": 1}"#,
            "--end",
            "1000000000000",
            "-j",
            "2",
            "--timeout",
            "60",
            "--json",
        ])
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn seedsweep");

    let mut stderr = BufReader::new(child.stderr.take().unwrap());
    let mut line = String::new();
    loop {
        line.clear();
        assert!(stderr.read_line(&mut line).unwrap() > 0, "seedsweep exited before starting");
        if line.contains("Execution started") {
            break;
        }
    }
    let drain = thread::spawn(move || {
        let mut rest = String::new();
        stderr.read_to_string(&mut rest).unwrap();
        rest
    });

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let mut stdout = Vec::new();
    child.stdout.take().unwrap().read_to_end(&mut stdout).unwrap();
    let exit = child.wait().unwrap();
    let rest = drain.join().unwrap();

    assert!(exit.success(), "exit {:?}\nstderr: {}", exit, rest);
    assert!(rest.contains("Interrupt received"));
    let report: Value = serde_json::from_slice(&stdout).expect("stdout is not JSON");
    assert_eq!(report["cancelled"], true);
    assert_eq!(report["complete"], false);
}
