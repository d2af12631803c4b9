//! Purpose: End-to-end tests for the limb HTTP server and `RemoteClient`.
//! Exports: None (integration test module).
//! Role: Validate pin/serial traffic, config publication, and error statuses across TCP.
//! Invariants: Uses a loopback-only server on a simulated board from a temp file.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use phal::api::{ErrorKind, GENERATION_HEADER, Level, RemoteClient};
use serde_json::Value;
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

const BOARD: &str = r#"{
    "gpio": ["gpio5", "gpio6", "gpio17", "gpio27"],
    "uart": ["uart0", "uart1", "uart2"],
    "wires": [["gpio5", "gpio6"]],
    "links": [["uart0", "uart1"]]
}"#;

const LIMBS: &str = r#"[
    {"name": "out", "kind": "pin", "direction": "output", "resource": "gpio5"},
    {"name": "in", "kind": "pin", "direction": "input", "resource": "gpio6"},
    {"name": "left", "kind": "serial", "resource": "uart0"},
    {"name": "right", "kind": "serial", "resource": "uart1"},
    {"name": "echo", "kind": "serial", "resource": "uart2", "baud-rate": 115200}
]"#;

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(dir: &Path) -> TestResult<Self> {
        Self::start_with_config(dir, None)
    }

    fn start_with_config(dir: &Path, config: Option<&str>) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let board_path = dir.join("board.json");
        std::fs::write(&board_path, BOARD)?;
        let config_path = match config {
            Some(config) => {
                let path = dir.join("limbs.json");
                std::fs::write(&path, config)?;
                Some(path)
            }
            None => None,
        };

        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut command = Command::new(env!("CARGO_BIN_EXE_phal"));
            command
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .arg("--board")
                .arg(&board_path)
                .stdout(Stdio::null())
                .stderr(Stdio::piped());
            if let Some(path) = &config_path {
                command.arg("--config").arg(path);
            }
            let mut child = command.spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn client(&self) -> TestResult<RemoteClient> {
        Ok(RemoteClient::new(self.base_url.clone())?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn remote_wired_pins_follow_each_other() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let client = server.client()?;
    assert_eq!(client.apply_config(LIMBS)?, 1);

    client.set_pin("out", Level::High)?;
    assert_eq!(client.get_pin("in")?, Level::High);
    client.set_pin("out", Level::Low)?;
    assert_eq!(client.get_pin("in")?, Level::Low);
    Ok(())
}

#[test]
fn remote_serial_ping_pong_over_linked_ports() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let client = server.client()?;
    client.apply_config(LIMBS)?;

    assert!(client.receive("right")?.is_empty());
    client.send("left", b"ping\n")?;
    assert_eq!(client.receive("right")?, b"ping\n");
    client.send("right", b"pong\n")?;
    assert_eq!(client.receive("left")?, b"pong\n");
    assert!(client.receive("left")?.is_empty());

    client.send("echo", &[0x00, 0x7f, 0xff])?;
    assert_eq!(client.receive("echo")?, vec![0x00, 0x7f, 0xff]);
    Ok(())
}

#[test]
fn remote_errors_propagate_kind() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let client = server.client()?;

    let err = match client.get_pin("out") {
        Ok(_) => return Err("expected missing limb error".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.limb(), Some("out"));

    client.apply_config(LIMBS)?;
    let err = match client.get_pin("out") {
        Ok(_) => return Err("expected direction error".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Direction);

    let err = match client.set_pin("in", Level::High) {
        Ok(()) => return Err("expected direction error".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Direction);

    let err = match client.set_limb("out", b"on") {
        Ok(()) => return Err("expected usage error".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Usage);
    Ok(())
}

#[test]
fn remote_rejected_config_keeps_previous_registry() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let client = server.client()?;
    client.apply_config(LIMBS)?;

    let cases = [
        (
            r#"[{"name": "a", "kind": "pin", "direction": "output", "resource": "gpio17"},
                {"name": "a", "kind": "pin", "direction": "input", "resource": "gpio27"}]"#,
            ErrorKind::DuplicateName,
        ),
        (
            r#"[{"name": "a", "kind": "pin", "direction": "output", "resource": "gpio99"}]"#,
            ErrorKind::UnknownResource,
        ),
        (
            r#"[{"name": "a", "kind": "pin", "direction": "output", "resource": "gpio17"},
                {"name": "b", "kind": "pin", "direction": "input", "resource": "gpio17"}]"#,
            ErrorKind::ResourceConflict,
        ),
        (r#"{"name": "a"}"#, ErrorKind::Malformed),
    ];
    for (payload, kind) in cases {
        let err = match client.apply_config(payload) {
            Ok(_) => return Err(format!("expected {kind:?}").into()),
            Err(err) => err,
        };
        assert_eq!(err.kind(), kind);
    }

    let active = client.active_config()?;
    assert_eq!(active.generation, 1);
    assert_eq!(active.limbs.len(), 5);
    client.set_pin("out", Level::High)?;
    assert_eq!(client.get_pin("in")?, Level::High);
    Ok(())
}

#[test]
fn remote_startup_config_and_generation_header() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start_with_config(temp_dir.path(), Some(LIMBS))?;

    let resp = ureq::get(&format!("{}/limb/in", server.base_url)).call()?;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.header(GENERATION_HEADER), Some("1"));
    assert_eq!(resp.into_string()?, "Low");

    let resp = ureq::post(&format!("{}/config", server.base_url)).send_string(LIMBS)?;
    assert_eq!(resp.header(GENERATION_HEADER), Some("2"));

    let body = ureq::get(&format!("{}/config", server.base_url))
        .call()?
        .into_string()?;
    let active: Value = serde_json::from_str(&body)?;
    assert_eq!(active["generation"], 2);
    assert_eq!(active["limbs"][0]["name"], "out");
    assert_eq!(active["limbs"][4]["baud-rate"], 115200);
    Ok(())
}

#[test]
fn remote_serve_rejects_invalid_startup_config() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let board_path = temp_dir.path().join("board.json");
    std::fs::write(&board_path, BOARD)?;
    let config_path = temp_dir.path().join("limbs.json");
    std::fs::write(
        &config_path,
        r#"[{"name": "tx", "kind": "serial", "direction": "output", "resource": "uart0"}]"#,
    )?;

    let output = Command::new(env!("CARGO_BIN_EXE_phal"))
        .args(["serve", "--bind", "127.0.0.1:0", "--board"])
        .arg(&board_path)
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .output()?;
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr)?;
    assert_eq!(err["error"]["kind"], "InvalidDirection");
    assert_eq!(err["error"]["limb"], "tx");
    Ok(())
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}
