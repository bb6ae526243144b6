//! End-to-end tests: file patching, codec files, the RPC boundary and the
//! watcher's poll/transfer cycle against a live loopback server.

use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blocksync::orchestrator::{JobQueue, Watcher};
use blocksync::rpc::{self, RpcClient};
use blocksync::sync::Engine;
use blocksync::{codec, tree};

/// Start a server on an ephemeral loopback port, returning the port.
fn spawn_server(root: &Path, window: u32) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let root = root.to_path_buf();
    thread::spawn(move || {
        let _ = rpc::serve(listener, root, Engine::with_window(window));
    });
    port
}

fn connect(port: u16) -> RpcClient {
    for _ in 0..50 {
        if let Ok(client) = RpcClient::connect("127.0.0.1", port) {
            return client;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server did not come up");
}

#[test]
fn file_level_signature_delta_patch() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("doc.txt");
    let mut content: Vec<u8> = (0..=255).cycle().take(50_000).collect();
    fs::write(&old, &content).unwrap();

    // edit the middle and the tail
    content.splice(20_000..20_010, b"REPLACEMENT".iter().copied());
    content.extend_from_slice(b"appended tail");
    let new = dir.path().join("doc.new");
    fs::write(&new, &content).unwrap();

    let engine = Engine::with_window(1000);
    let signature = engine
        .signature(&mut fs::File::open(&old).map(std::io::BufReader::new).unwrap())
        .unwrap();
    let delta = engine.delta_file(&new, &signature).unwrap();

    // the edit is small, so nearly everything rides as copies
    assert!(delta.bytes_copied() > 40_000);
    assert_eq!(delta.output_len(), content.len() as u64);

    engine.patch_file(&old, &delta).unwrap();
    assert_eq!(fs::read(&old).unwrap(), content);
}

#[test]
fn codec_files_drive_the_standalone_flow() {
    let dir = tempfile::tempdir().unwrap();
    let basis_path = dir.path().join("basis.bin");
    let source_path = dir.path().join("source.bin");
    let basis: Vec<u8> = (0..200u8).cycle().take(10_000).collect();
    let mut source = basis.clone();
    source.truncate(9_000);
    fs::write(&basis_path, &basis).unwrap();
    fs::write(&source_path, &source).unwrap();

    let engine = Engine::with_window(500);

    // signature file
    let sig_path = dir.path().join("basis.sig");
    let signature = engine
        .signature(&mut std::io::Cursor::new(basis.clone()))
        .unwrap();
    codec::save_signature(&sig_path, &signature).unwrap();

    // delta file from the loaded signature
    let loaded_sig = codec::load_signature(&sig_path).unwrap();
    assert_eq!(loaded_sig, signature);
    let delta_path = dir.path().join("update.delta");
    let delta = engine.delta_file(&source_path, &loaded_sig).unwrap();
    codec::save_delta(&delta_path, &delta).unwrap();

    // patch from the loaded delta
    let loaded_delta = codec::load_delta(&delta_path).unwrap();
    assert_eq!(loaded_delta, delta);
    engine.patch_file(&basis_path, &loaded_delta).unwrap();
    assert_eq!(fs::read(&basis_path).unwrap(), source);
}

#[test]
fn rpc_tree_procedures() {
    let remote = tempfile::tempdir().unwrap();
    let port = spawn_server(remote.path(), 1000);
    let mut client = connect(port);

    assert!(client.dirs().unwrap().is_empty());
    assert!(client.files().unwrap().is_empty());

    client.mkdir("a/b").unwrap();
    let dirs = client.dirs().unwrap();
    assert!(dirs.contains("a"));
    assert!(dirs.contains("a/b"));
    assert!(remote.path().join("a/b").is_dir());

    client.rmdir("a/b").unwrap();
    assert!(!remote.path().join("a/b").exists());
    assert!(client.dirs().unwrap().contains("a"));

    // traversal collapses inside the root; nothing lands beside it
    client.mkdir("../outside").unwrap();
    assert!(remote.path().join("outside").is_dir());
    assert!(!remote.path().parent().unwrap().join("outside").exists());

    // a path that collapses to nothing is refused outright
    assert!(client.mkdir("../").is_err());
}

#[test]
fn rpc_signature_and_patch_create_and_update() {
    let remote = tempfile::tempdir().unwrap();
    let port = spawn_server(remote.path(), 1000);
    let mut client = connect(port);

    let engine = Engine::with_window(1000);

    // absent file: empty signature, patch creates it
    let signature = client.signature("fresh.bin").unwrap();
    assert!(signature.is_empty());

    let content = vec![42u8; 5_000];
    let delta = engine
        .delta(&mut std::io::Cursor::new(content.clone()), &signature)
        .unwrap();
    assert!(client.patch("fresh.bin", &delta).unwrap());
    assert_eq!(fs::read(remote.path().join("fresh.bin")).unwrap(), content);

    // update: second signature is non-empty and the patch reuses it
    let signature = client.signature("fresh.bin").unwrap();
    assert_eq!(signature.chunk_count(), 5);

    let mut updated = content;
    updated.extend_from_slice(b"and more");
    let delta = engine
        .delta(&mut std::io::Cursor::new(updated.clone()), &signature)
        .unwrap();
    assert_eq!(delta.bytes_copied(), 5_000);
    assert!(client.patch("fresh.bin", &delta).unwrap());
    assert_eq!(fs::read(remote.path().join("fresh.bin")).unwrap(), updated);
}

#[test]
fn rpc_patch_against_stale_basis_reports_failure() {
    let remote = tempfile::tempdir().unwrap();
    let port = spawn_server(remote.path(), 1000);
    let mut client = connect(port);

    fs::write(remote.path().join("data.bin"), vec![1u8; 4_000]).unwrap();
    let signature = client.signature("data.bin").unwrap();

    // basis changes between signature and patch
    fs::write(remote.path().join("data.bin"), vec![2u8; 4_000]).unwrap();

    let source = vec![1u8; 6_000];
    let delta = Engine::with_window(1000)
        .delta(&mut std::io::Cursor::new(source), &signature)
        .unwrap();
    assert!(!client.patch("data.bin", &delta).unwrap());
    // destination still intact
    assert_eq!(fs::read(remote.path().join("data.bin")).unwrap(), vec![2u8; 4_000]);
}

#[test]
fn watcher_mirrors_a_tree() {
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();

    fs::create_dir_all(local.path().join("sub/inner")).unwrap();
    fs::write(local.path().join("top.bin"), vec![7u8; 12_000]).unwrap();
    fs::write(local.path().join("sub/nested.txt"), b"nested content").unwrap();
    // stale staging leftover that must be cleaned, not mirrored
    fs::write(local.path().join("junk.blocksync"), b"stale").unwrap();

    // pre-existing remote state that must be pruned
    fs::create_dir_all(remote.path().join("obsolete")).unwrap();
    fs::write(remote.path().join("extra.bin"), b"gone soon").unwrap();

    let port = spawn_server(remote.path(), 1000);
    let watcher = Watcher::new(local.path().to_path_buf(), "127.0.0.1", port)
        .with_engine(Engine::with_window(1000));
    let queue = JobQueue::new();
    let mut client = connect(port);

    watcher.poll_once(&mut client, &queue).unwrap();

    // deletions and directory creation happen during the poll itself
    assert!(!remote.path().join("obsolete").exists());
    assert!(!remote.path().join("extra.bin").exists());
    assert!(remote.path().join("sub/inner").is_dir());
    assert!(!local.path().join("junk.blocksync").exists());

    // transfers are queued; drain them inline (claim never blocks while a
    // pending entry exists and nothing is in flight)
    while !queue.is_empty() {
        let path = queue.claim().unwrap();
        watcher.sync_path(&mut client, &path).unwrap();
        queue.complete(&path);
    }

    assert_eq!(
        fs::read(remote.path().join("top.bin")).unwrap(),
        vec![7u8; 12_000]
    );
    assert_eq!(
        fs::read(remote.path().join("sub/nested.txt")).unwrap(),
        b"nested content"
    );

    // a second poll finds both trees identical and schedules nothing
    let queue = JobQueue::new();
    watcher.poll_once(&mut client, &queue).unwrap();
    assert!(queue.is_empty());

    assert_eq!(
        tree::files(local.path()).unwrap(),
        tree::files(remote.path()).unwrap()
    );
}

#[test]
fn watcher_run_drains_scheduled_work() {
    let local = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    fs::write(local.path().join("a.bin"), vec![1u8; 3_000]).unwrap();
    fs::write(local.path().join("b.bin"), vec![2u8; 3_000]).unwrap();

    let port = spawn_server(remote.path(), 1000);
    let watcher = Watcher::new(local.path().to_path_buf(), "127.0.0.1", port)
        .with_workers(2)
        .with_interval(Duration::from_millis(50));
    let queue = Arc::new(JobQueue::new());

    let runner = {
        let watcher = watcher.clone();
        let queue = Arc::clone(&queue);
        thread::spawn(move || watcher.run(&queue))
    };

    // wait for both files to land remotely, then stop the watcher
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let synced = tree::files(remote.path()).map(|t| t.len() == 2).unwrap_or(false);
        if synced {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "sync did not converge");
        thread::sleep(Duration::from_millis(20));
    }
    queue.shutdown();
    runner.join().unwrap().unwrap();

    assert_eq!(fs::read(remote.path().join("a.bin")).unwrap(), vec![1u8; 3_000]);
    assert_eq!(fs::read(remote.path().join("b.bin")).unwrap(), vec![2u8; 3_000]);
}
