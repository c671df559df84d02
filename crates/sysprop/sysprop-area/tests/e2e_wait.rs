//! Two-process exercise of the writer/reader protocol: a real `add`/`update`
//! from one process, observed and waited on from another, over a shared
//! area file on disk. Each process maps its own view, so this is the only
//! way to catch a `toc`/`serial` bug that a single-process test can't:
//! one process's writes must become visible to another's independent
//! mapping through the seqlock alone, with no shared Rust state at all.
//!
//! The child roles attach read-only via `attach_unchecked` (the
//! uid/gid-0 check `Area::attach` enforces can't be satisfied by a test
//! fixture file), so this also exercises the real reader path rather
//! than a writer mapping masquerading as one.

#![cfg(all(unix, feature = "test-support"))]

use std::env;
use std::process::Command;
use std::time::{Duration, Instant};
use sysprop_area::Area;

const ROLE_VAR: &str = "SYSPROP_E2E_ROLE";
const PATH_VAR: &str = "SYSPROP_E2E_PATH";

#[test]
fn reader_process_sees_value_written_by_writer_process() {
    if let Ok(role) = env::var(ROLE_VAR) {
        run_role(&role);
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("area");
    let path = path.to_str().unwrap().to_string();

    {
        let area = Area::init_fresh(&path).unwrap();
        area.add("e2e.prop", "first").unwrap();
    }

    let exe = env::current_exe().unwrap();
    let status = spawn_self("--exact", "reader_process_sees_value_written_by_writer_process", &exe, &path);
    assert!(status.success(), "reader child failed: {status:?}");
}

#[test]
fn reader_process_wakes_on_update_from_writer_process() {
    if let Ok(role) = env::var(ROLE_VAR) {
        run_role(&role);
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("area");
    let path = path.to_str().unwrap().to_string();

    {
        let area = Area::init_fresh(&path).unwrap();
        area.add("e2e.prop", "first").unwrap();
    }

    let exe = env::current_exe().unwrap();
    let mut child = Command::new(&exe)
        .arg("--exact")
        .arg("reader_process_wakes_on_update_from_writer_process")
        .env(ROLE_VAR, "waiter")
        .env(PATH_VAR, &path)
        .spawn()
        .unwrap();

    // Give the child time to attach and enter the futex wait before we
    // write the update it's supposed to wake on.
    std::thread::sleep(Duration::from_millis(200));

    {
        let area = Area::open_writer(&path).unwrap();
        let rec = area.find("e2e.prop").unwrap();
        area.update(Some(rec), "second").unwrap();
    }

    let status = wait_with_timeout(&mut child, Duration::from_secs(5))
        .unwrap_or_else(|| panic!("waiter child did not wake within timeout"));
    assert!(status.success(), "waiter child failed: {status:?}");
}

fn spawn_self(flag: &str, test_name: &str, exe: &std::path::Path, path: &str) -> std::process::ExitStatus {
    Command::new(exe)
        .arg(flag)
        .arg(test_name)
        .env(ROLE_VAR, "reader")
        .env(PATH_VAR, path)
        .status()
        .unwrap()
}

fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn run_role(role: &str) {
    let path = env::var(PATH_VAR).expect("path var set by parent");
    let area = Area::attach_unchecked(&path).unwrap();

    match role {
        "reader" => {
            let mut buf = [0u8; sysprop_area::VALUE_MAX_LEN];
            let n = area.get("e2e.prop", &mut buf);
            assert_eq!(&buf[..n], b"first");
        }
        "waiter" => {
            let rec = area.find("e2e.prop").expect("property must exist");
            area.wait(rec);
            let mut buf = [0u8; sysprop_area::VALUE_MAX_LEN];
            let n = area.get("e2e.prop", &mut buf);
            assert_eq!(&buf[..n], b"second");
        }
        other => panic!("unknown role: {other}"),
    }
}
