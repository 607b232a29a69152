//! Interrupting the tool while its trace source is idle

use nix::{
    sys::{
        signal::{kill, Signal},
        stat::Mode,
    },
    unistd::{mkfifo, Pid},
};
use std::{
    fs,
    io::{BufRead, BufReader},
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

const CONFIG: &str = "\
in_outer_dev: ethA
in_outer_func: netif_receive_skb
in_inner_dev: vethA
in_inner_func: netif_rx
out_inner_dev: vethA
out_inner_func: net_dev_queue
out_outer_dev: ethA
out_outer_func: net_dev_xmit
";

const SETTINGS: [&str; 7] = [
    "trace",
    "current_tracer",
    "trace_clock",
    "set_event",
    "set_event_pid",
    "tracing_on",
    "trace_marker",
];

/// Block until the tool logs that it is reading events
fn wait_until_correlating(child: &mut Child) {
    let stderr = child.stderr.take().unwrap();
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let line = lines.next().expect("tool exited before correlating").unwrap();
        if line.contains("Correlating events") {
            break;
        }
    }
    // Keep draining so logging never blocks on a full pipe
    thread::spawn(move || for _ in lines {});
    thread::sleep(Duration::from_millis(300));
}

fn interrupt_and_wait(child: &mut Child, limit: Duration) -> Option<std::process::ExitStatus> {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let started = Instant::now();
    while started.elapsed() < limit {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(50));
    }
    let _ = child.kill();
    let _ = child.wait();
    None
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("hop.conf");
    fs::write(&path, CONFIG).unwrap();
    path
}

#[test]
fn test_live_run_exits_on_interrupt_with_idle_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let tracefs = dir.path().join("tracing");
    fs::create_dir(&tracefs).unwrap();
    for name in SETTINGS {
        fs::write(tracefs.join(name), "").unwrap();
    }
    let pipe = tracefs.join("trace_pipe");
    mkfifo(&pipe, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
    let _writer = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&pipe)
        .unwrap();
    let config = write_config(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_hop-latency"))
        .arg(&config)
        .arg("--live")
        .arg("--tracing-path")
        .arg(&tracefs)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    wait_until_correlating(&mut child);
    assert_eq!(fs::read_to_string(tracefs.join("tracing_on")).unwrap(), "1");

    let status = interrupt_and_wait(&mut child, Duration::from_secs(5));

    assert!(status.is_some_and(|s| s.success()), "status: {:?}", status);
    assert_eq!(fs::read_to_string(tracefs.join("tracing_on")).unwrap(), "0");
    let output = child.wait_with_output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("rtt  mean: 0 usec"));
}

#[test]
fn test_stdin_run_exits_on_interrupt_with_idle_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_hop-latency"))
        .arg(&config)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    // Held open without writing so stdin never reaches end of stream
    let _stdin = child.stdin.take();
    wait_until_correlating(&mut child);

    let status = interrupt_and_wait(&mut child, Duration::from_secs(5));

    assert!(status.is_some_and(|s| s.success()), "status: {:?}", status);
}
