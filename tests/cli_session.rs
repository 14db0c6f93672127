//! Runs the `deltasync` binary against an in-process daemon.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::{Command, Output};
use std::thread;

use checksums::{Md4Padding, file_checksum};
use daemon::{Daemon, DaemonConfig, Module, ShutdownHandle};

fn deltasync(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_deltasync"))
        .args(args)
        .output()
        .expect("run deltasync")
}

fn start_daemon(root: &Path) -> (SocketAddr, ShutdownHandle, thread::JoinHandle<()>) {
    let config = DaemonConfig::builder()
        .address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(0)
        .module(Module::new("files", root).with_comment("Test files"))
        .build()
        .unwrap();
    let daemon = Daemon::bind(config).unwrap();
    let address = daemon.local_addr();
    let shutdown = daemon.shutdown_handle();
    let server = thread::spawn(move || daemon.serve().unwrap());
    (address, shutdown, server)
}

fn digest(path: &Path) -> [u8; 16] {
    file_checksum(path, Md4Padding::for_protocol(28)).unwrap()
}

#[test]
fn modules_pull_and_push_through_the_binary() {
    let served = tempfile::tempdir().unwrap();
    fs::write(served.path().join("one.txt"), b"first file").unwrap();
    fs::create_dir(served.path().join("dir")).unwrap();
    fs::write(served.path().join("dir/two.bin"), vec![42u8; 50_000]).unwrap();
    let (address, shutdown, server) = start_daemon(served.path());
    let base = format!("rsync://{address}");

    let output = deltasync(&["modules", &format!("{base}/")]);
    assert!(output.status.success(), "{output:?}");
    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.starts_with("files"), "{listing}");
    assert!(listing.contains("Test files"));

    let output = deltasync(&["pull", "-r", "--list-only", &format!("{base}/files")]);
    assert!(output.status.success(), "{output:?}");
    let listing = String::from_utf8(output.stdout).unwrap();
    assert!(listing.lines().any(|line| line.ends_with(" dir/two.bin")), "{listing}");

    let dest = tempfile::tempdir().unwrap();
    let dest_arg = dest.path().to_str().unwrap();
    let output = deltasync(&["pull", "-r", "--stats", &format!("{base}/files"), dest_arg]);
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8(output.stdout).unwrap().contains("Number of files: 3"));
    for name in ["one.txt", "dir/two.bin"] {
        assert_eq!(digest(&dest.path().join(name)), digest(&served.path().join(name)), "{name}");
    }

    let upload = tempfile::tempdir().unwrap();
    fs::write(upload.path().join("new.txt"), b"uploaded").unwrap();
    let source = upload.path().join("new.txt");
    let output = deltasync(&["push", source.to_str().unwrap(), &format!("{base}/files/dir")]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(fs::read(served.path().join("dir/new.txt")).unwrap(), b"uploaded");

    let output = deltasync(&["pull", &format!("{base}/nothing"), dest_arg]);
    assert_eq!(output.status.code(), Some(12), "{output:?}");

    shutdown.shutdown();
    server.join().unwrap();
}
