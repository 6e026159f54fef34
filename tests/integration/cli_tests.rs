use crate::helpers::*;
use assert_cmd::Command;
use predicates::prelude::*;

const ENV_OVERRIDES: [&str; 9] = [
    "PIXPRESS_STORAGE_DIR",
    "PIXPRESS_FFMPEG_PATH",
    "PIXPRESS_FFMPEG_LAUNCHER",
    "PIXPRESS_FFMPEG_TIMEOUT",
    "PIXPRESS_MAX_CONCURRENT",
    "PIXPRESS_DEFAULT_QUALITY",
    "PIXPRESS_RETENTION_MINUTES",
    "PIXPRESS_SWEEP_INTERVAL_MINUTES",
    "PIXPRESS_LOG_LEVEL",
];

#[allow(deprecated)]
fn pixpress(sandbox: &Sandbox) -> Command {
    let mut cmd = Command::cargo_bin("pixpress").unwrap();
    cmd.current_dir(sandbox.path());
    for var in ENV_OVERRIDES {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_help() {
    let sandbox = Sandbox::new();
    pixpress(&sandbox)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compress"));
}

#[test]
fn test_cli_stats_json() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "[compression]\nmax_concurrent_operations = 3\n");

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .args(["stats", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_concurrent_operations\": 3"))
        .stdout(predicate::str::contains("\"default_quality\": 80"));
}

#[test]
fn test_cli_compress_and_fetch() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "");
    let input = sandbox.write_input("photo.jpg", 50_000);
    let copy = sandbox.path().join("copy.jpg");

    let output = pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .arg("--json")
        .arg("compress")
        .arg(&input)
        .args(["-q", "70", "-o"])
        .arg(&copy)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["format"], "jpeg");
    assert_eq!(result["quality"], 70);
    assert_eq!(result["compressed_size"], 1000);
    assert_eq!(std::fs::metadata(&copy).unwrap().len(), 1000);

    let id = result["id"].as_str().unwrap().to_string();
    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .args(["fetch", &id])
        .assert()
        .success();
    assert!(sandbox.path().join(format!("{}_compressed.jpg", id)).exists());
}

#[test]
fn test_cli_fetch_malformed_id_is_not_found() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "");

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .args(["fetch", "../../etc/passwd"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_cli_compress_bad_quality_is_validation_error() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "");
    let input = sandbox.write_input("photo.png", 100);

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .arg("compress")
        .arg(&input)
        .args(["-q", "0"])
        .assert()
        .code(4);
    assert!(!sandbox.storage().exists());
}

#[test]
fn test_cli_health_degraded_without_tool() {
    let sandbox = Sandbox::new();
    let config = sandbox.path().join("pixpress.toml");
    std::fs::write(
        &config,
        "[ffmpeg]\npath = \"/nonexistent/bin/ffmpeg\"\n",
    )
    .unwrap();

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .args(["health", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"degraded\""))
        .stdout(predicate::str::contains("unavailable"));
}

#[test]
fn test_cli_invalid_config_exit_code() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "[compression]\nmax_concurrent_operations = 0\n");

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .arg("stats")
        .assert()
        .code(2);
}

#[test]
fn test_cli_missing_config_file() {
    let sandbox = Sandbox::new();
    pixpress(&sandbox)
        .args(["-c", "does-not-exist.toml", "stats"])
        .assert()
        .code(2);
}

#[test]
fn test_cli_sweep_empty_storage() {
    let sandbox = Sandbox::new();
    let tool = sandbox.write_tool("ffmpeg.sh", FAKE_FFMPEG);
    let config = sandbox.write_config(&tool, "");

    pixpress(&sandbox)
        .arg("-c")
        .arg(&config)
        .args(["sweep", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"removed\": 0"));
}

#[test]
fn test_cli_interrupt_kills_running_tool() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let sandbox = Sandbox::new();
    let pid_file = sandbox.path().join("tool.pid");
    let tool = sandbox.write_tool("ffmpeg.sh", &stalling_ffmpeg(&pid_file));
    let config = sandbox.write_config_with_timeout(&tool, 100, "");
    let input = sandbox.write_input("photo.jpg", 10_000);

    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_pixpress"));
    cmd.current_dir(sandbox.path())
        .arg("-c")
        .arg(&config)
        .arg("compress")
        .arg(&input)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    for var in ENV_OVERRIDES {
        cmd.env_remove(var);
    }
    let mut child = cmd.spawn().unwrap();

    let tool_pid = wait_for_pid(&pid_file, Duration::from_secs(10));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    // Well inside the shutdown grace period: the command unwinds on its own.
    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if start.elapsed() > Duration::from_secs(5) {
            let _ = child.kill();
            let _ = kill(Pid::from_raw(tool_pid), Signal::SIGKILL);
            panic!("pixpress did not exit after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    let output = child.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(status.code(), Some(130), "stderr: {}", stderr);
    assert!(stderr.contains("Interrupted"), "stderr: {}", stderr);
    assert!(
        process_gone(tool_pid, Duration::from_secs(5)),
        "tool process {} outlived pixpress",
        tool_pid
    );
}
