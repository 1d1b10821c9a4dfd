use std::path::Path;
use std::process::Command;

const ADD_TOML: &str = r#"
name = "add"
num_frame_regs = 4

[[ops]]
op = "load_param"
dst = 0
index = 1

[[ops]]
op = "load_const_double"
dst = 1
value = 2.5

[[ops]]
op = "binary"
kind = "add"
dst = 2
left = 0
right = 1

[[ops]]
op = "ret"
value = 2
"#;

fn run_framejit(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_framejit"))
        .args(args)
        .output()
        .expect("failed to execute framejit");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn assert_success(args: &[&str]) -> String {
    let (stdout, stderr, success) = run_framejit(args);
    assert!(success, "framejit should succeed, stderr:\n{}", stderr);
    stdout
}

#[test]
fn test_compile_and_run() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), "add.toml", ADD_TOML);
    let stdout = assert_success(&["compile", &file, "--run", "--arg", "-1"]);
    assert!(stdout.starts_with("add: 4 ops, "), "{stdout}");
    assert!(stdout.ends_with("result: 1.5\n"), "{stdout}");
}

#[test]
fn test_dump_listing() {
    let dir = tempfile::tempdir().unwrap();
    let file = write(dir.path(), "add.toml", ADD_TOML);
    let stdout = assert_success(&["compile", &file, "--dump"]);
    assert!(stdout.contains("fadd"), "{stdout}");
    assert!(stdout.contains("LoadParam"), "{stdout}");
    assert!(!stdout.contains("result:"));
}

#[test]
fn test_json_output_with_config() {
    let dir = tempfile::tempdir().unwrap();
    let json = r#"{
        "name": "add_json",
        "num_frame_regs": 3,
        "ops": [
            {"op": "load_const_double", "dst": 0, "value": 4},
            {"op": "load_const_double", "dst": 1, "value": 0.5},
            {"op": "binary", "kind": "mul", "dst": 2, "left": 0, "right": 1},
            {"op": "ret", "value": 2}
        ]
    }"#;
    let file = write(dir.path(), "f.json", json);
    let config = write(dir.path(), "jit.toml", "always_slow_path = true\npin_registers = false\n");
    let stdout = assert_success(&["compile", &file, "--config", &config, "--run", "--json"]);
    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["name"], "add_json");
    assert_eq!(out["result"], "2");
    assert_eq!(out["stats"]["ops"], 4);
    assert_eq!(out["stats"]["gp_pinned"], 0);
}

#[test]
fn test_layout() {
    let stdout = assert_success(&["layout"]);
    assert!(stdout.contains("double limit 0xfff9000000000000"), "{stdout}");
    assert!(stdout.contains("frame        x19"));
    assert!(stdout.contains("pinned vec   d8..d15"));
}

#[test]
fn test_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let (_, stderr, success) = run_framejit(&["compile", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("error: failed to read"), "{stderr}");

    let file = write(dir.path(), "add.toml", ADD_TOML);
    let config = write(dir.path(), "jit.toml", "gp_temp_count = 99\n");
    let (_, stderr, success) = run_framejit(&["compile", &file, "--config", &config]);
    assert!(!success);
    assert!(stderr.contains("gp_temp_count must be between 4 and 16, got 99"), "{stderr}");
}
