/*
 * Process-level shutdown tests
 *
 * Run the thermopi binary against a fake sysfs PWM chip, deliver a signal
 * and check that the fan was driven to 0% and disabled before exit.
 */
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// 64°C on the default curve is 76%, i.e. 30400 ns of a 40000 ns period
const RUNNING_DUTY_NS: &str = "30400";

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default().trim().to_string()
}

/// Fake pwmchip0 with an already published pwm0 plus a thermal zone file
fn fake_board() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let chip = dir.path().join("pwmchip0");
    let channel = chip.join("pwm0");
    fs::create_dir_all(&channel).unwrap();
    fs::write(chip.join("export"), "").unwrap();
    fs::write(chip.join("unexport"), "").unwrap();
    for file in ["period", "duty_cycle", "enable"] {
        fs::write(channel.join(file), "0").unwrap();
    }
    fs::write(dir.path().join("temp"), "64000\n").unwrap();

    let config = serde_json::json!({
        "pwm": { "chip": chip, "settle_ms": 0 },
        "sensor": { "path": dir.path().join("temp") },
        "control": { "interval_ms": 50 },
        "sample_log": null,
    });
    fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
    dir
}

fn spawn_monitor(board: &TempDir) -> Child {
    Command::new(env!("CARGO_BIN_EXE_thermopi"))
        .arg("--config")
        .arg(board.path().join("config.json"))
        .arg("monitor")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn assert_signal_turns_fan_off(signal: &str) {
    let board = fake_board();
    let channel = board.path().join("pwmchip0").join("pwm0");
    let mut child = spawn_monitor(&board);

    let running = wait_until(Duration::from_secs(10), || {
        read(&channel.join("duty_cycle")) == RUNNING_DUTY_NS
    });
    if !running {
        let _ = child.kill();
        panic!("fan never reached the running duty");
    }
    assert_eq!(read(&channel.join("enable")), "1");
    // Let the front-end install its signal handlers
    thread::sleep(Duration::from_millis(200));

    let sent = Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(sent.success());

    let mut status = None;
    let exited = wait_until(Duration::from_secs(10), || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    if !exited {
        let _ = child.kill();
        panic!("thermopi did not exit after SIG{}", signal);
    }

    assert!(status.unwrap().success(), "SIG{} exit: {:?}", signal, status);
    assert_eq!(read(&channel.join("duty_cycle")), "0");
    assert_eq!(read(&channel.join("enable")), "0");
    assert_eq!(read(&board.path().join("pwmchip0").join("unexport")), "0");
}

#[test]
fn sigterm_turns_fan_off() {
    assert_signal_turns_fan_off("TERM");
}

#[test]
fn sighup_turns_fan_off() {
    assert_signal_turns_fan_off("HUP");
}

#[test]
fn sigquit_turns_fan_off() {
    assert_signal_turns_fan_off("QUIT");
}

#[test]
fn sigint_turns_fan_off() {
    assert_signal_turns_fan_off("INT");
}
