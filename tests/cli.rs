//! End-to-end scenarios driving the compiled binary. Fork-heavy
//! behavior is exercised here rather than in-process so the libtest
//! harness never shares signal state with a worker fleet.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn brunt() -> Command {
    Command::new(env!("CARGO_BIN_EXE_brunt"))
}

#[test]
fn explicit_plan_runs_to_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("metrics.yaml");

    let output = brunt()
        .args(["--stressor", "cpu:2", "--stressor", "memcpy:1"])
        .args(["--timeout", "1", "--metrics"])
        .arg("--yaml")
        .arg(&yaml)
        .args(["--temp-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = std::fs::read_to_string(&yaml).unwrap();
    assert!(report.contains("runinfo:"));
    assert!(report.contains("bogo-ops:"));
    assert!(report.contains("stressor: cpu"));
    assert!(report.contains("stressor: memcpy"));
    assert!(report.contains("times:"));
    assert!(report.contains("load-average-1m:"));
}

#[test]
fn instance_accounting_balances() {
    let output = brunt()
        .args(["--stressor", "cpu:2", "--stressor", "vm:1"])
        .args(["--timeout", "1", "--verbose"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    // Every planned instance was started, exited on its own and was
    // reaped by the parent.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("instances: 3 started, 3 exited, 3 reaped"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn interrupt_shuts_the_fleet_down_cleanly() {
    let mut child = brunt()
        .args(["--stressor", "cpu:2", "--timeout", "30"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Let the fleet spin up before interrupting it.
    std::thread::sleep(Duration::from_secs(1));
    unsafe { libc::kill(child.id() as i32, libc::SIGINT) };

    // Shutdown must complete well inside the 30 s deadline: the
    // broadcast stops the workers and the reap loop collects them.
    let interrupted_at = Instant::now();
    let bound = Duration::from_secs(15);
    while child.try_wait().unwrap().is_none() {
        if interrupted_at.elapsed() > bound {
            let _ = child.kill();
            panic!("harness still alive {:?} after SIGINT", bound);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(interrupted_at.elapsed() < bound);

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("run interrupted"), "stderr: {}", stderr);
}

#[test]
fn sequential_entries_never_overlap() {
    let output = brunt()
        .args(["--sequential", "2", "--with", "pipe,yield"])
        .args(["--timeout", "1", "--verbose"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // Workers log "<name> [<pid>]: ..." lines as they finish and are
    // decoded. With one entry at a time, every pipe worker line must
    // precede the first yield worker line.
    let stderr = String::from_utf8_lossy(&output.stderr);
    let pipe_last = stderr.rfind("pipe [").expect("no pipe worker lines");
    let yield_first = stderr.find("yield [").expect("no yield worker lines");
    assert!(
        pipe_last < yield_first,
        "pipe workers overlap yield workers: {}",
        stderr
    );
}

#[test]
fn ops_budget_bounds_the_run_without_a_deadline() {
    let output = brunt()
        .args(["--stressor", "cpu:1:5", "--timeout", "30"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn stressor_listing_covers_the_catalog() {
    let output = brunt().arg("--stressors").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["cpu", "cache", "memcpy", "vm", "pipe", "hdd", "udp", "yield", "fork"] {
        assert!(stdout.contains(name), "missing {}", name);
    }
}

#[test]
fn class_query_lists_members_and_exits_success() {
    let output = brunt().args(["--class", "cpu?"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cpu"));

    let output = brunt().args(["--class", "scheduler?"]).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("yield"));
}

#[test]
fn class_filter_with_mode_runs_only_that_class() {
    let output = brunt()
        .args(["--all", "1", "--class", "pipe", "--timeout", "1"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("1 stressor entries"));
}

#[test]
fn sequential_mode_walks_the_with_list() {
    let output = brunt()
        .args(["--sequential", "1", "--with", "pipe,yield", "--timeout", "1"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn permute_mode_runs_every_subset() {
    let output = brunt()
        .args(["--permute", "1", "--with", "pipe,yield", "--timeout", "1"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    // Two runnable entries: subsets {pipe}, {yield}, {pipe, yield}.
    assert!(stderr.contains("permute 1/3"));
    assert!(stderr.contains("permute 3/3"));
}

#[test]
fn unknown_stressor_fails_with_a_listing() {
    let output = brunt().args(["--stressor", "warpdrive:1"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("warpdrive"));
    assert!(stderr.contains("cpu"));
}

#[test]
fn conflicting_modes_fail() {
    let output = brunt()
        .args(["--all", "1", "--sequential", "1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn pathological_needs_the_gate() {
    let output = brunt()
        .args(["--stressor", "fork:1", "--timeout", "1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let output = brunt()
        .args(["--stressor", "fork:1", "--timeout", "1", "--pathological"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn job_file_options_are_spliced_in() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("stress.job");
    std::fs::write(
        &job,
        "# one cpu worker, bounded by ops\n--stressor cpu:1:5\n--timeout 30\n",
    )
    .unwrap();

    let output = brunt().arg("--job").arg(&job).output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn stressor_options_route_through_set() {
    let dir = tempfile::tempdir().unwrap();
    let output = brunt()
        .args(["--stressor", "hdd:1:2", "--set", "hdd-blocks=4"])
        .args(["--timeout", "30", "--temp-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = brunt()
        .args(["--stressor", "cpu:1:1", "--set", "nonesuch=1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn verify_mode_passes_on_healthy_workloads() {
    let output = brunt()
        .args(["--stressor", "memcpy:1:3", "--verify", "--timeout", "30"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
