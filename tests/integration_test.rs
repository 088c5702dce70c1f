use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use git_pack_store::object::kind_name;
use git_pack_store::pack::{decode, Encoder};
use git_pack_store::storage::{FilesystemStorage, MemoryStorage, ObjectSink};
use git_pack_store::ObjectId;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Helper to run git commands in a directory
fn git_command(dir: &Path, args: &[&str]) -> std::process::Output {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .expect("Failed to run git command");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// Run git with `input` on stdin, returning stdout.
fn git_with_input(dir: &Path, args: &[&str], input: &[u8]) -> Vec<u8> {
    let mut child = Command::new("git")
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn git");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input)
        .expect("Failed to feed git");
    let output = child.wait_with_output().expect("Failed to wait for git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output.stdout
}

/// Create a repository whose history gives git something to delta.
fn create_test_repo(dir: &Path) -> PathBuf {
    let repo_dir = dir.join("test-repo");
    fs::create_dir(&repo_dir).expect("Failed to create repo dir");
    git_command(&repo_dir, &["init", "-q"]);

    let mut lines: Vec<String> = (0..400).map(|i| format!("line {i} of a long file\n")).collect();
    for round in 0..6 {
        lines[round * 37] = format!("edited in round {round}\n");
        fs::write(repo_dir.join("big.txt"), lines.concat()).unwrap();
        fs::write(repo_dir.join(format!("small{round}.txt")), format!("content {round}")).unwrap();
        git_command(&repo_dir, &["add", "."]);
        git_command(&repo_dir, &["commit", "-q", "-m", &format!("Commit {round}")]);
    }
    repo_dir
}

fn pack_head(repo: &Path) -> Vec<u8> {
    git_with_input(
        repo,
        &["pack-objects", "--stdout", "--revs", "--delta-base-offset"],
        b"HEAD\n",
    )
}

fn all_object_ids(repo: &Path) -> BTreeSet<String> {
    let out = git_command(repo, &["rev-list", "--objects", "--all"]);
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_decode_git_pack_objects_output() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = create_test_repo(temp.path());
    let pack = pack_head(&repo);

    let mut decoder = decode(&pack[..]);
    let mut decoded = BTreeMap::new();
    for object in decoder.by_ref() {
        let object = object.unwrap();
        decoded.insert(object.id.to_hex(), object);
    }
    assert_eq!(
        decoder.checksum().map(|c| c.as_bytes().to_vec()),
        Some(pack[pack.len() - 20..].to_vec())
    );

    let expected = all_object_ids(&repo);
    assert_eq!(decoded.keys().cloned().collect::<BTreeSet<_>>(), expected);

    for (id, object) in &decoded {
        let out = git_command(&repo, &["cat-file", kind_name(object.kind), id]);
        assert_eq!(out.stdout, &object.data[..], "content of {id}");
    }
}

#[test]
fn test_git_accepts_encoded_pack() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let repo = create_test_repo(temp.path());

    let store = MemoryStorage::new();
    let summary = decode(&pack_head(&repo)[..]).unpack_into(&store).unwrap();
    let ids = store.ids();
    assert_eq!(summary.objects as usize, ids.len());

    let mut pack = Vec::new();
    let checksum = Encoder::new(&mut pack, &store).encode(&ids).unwrap();

    let target = temp.path().join("target.git");
    fs::create_dir(&target).unwrap();
    git_command(&target, &["init", "-q", "--bare"]);
    let out = git_with_input(&target, &["index-pack", "--stdin"], &pack);
    let reported = String::from_utf8_lossy(&out);
    assert!(
        reported.contains(&checksum.to_hex()),
        "index-pack reported {reported}"
    );

    let head = git_command(&repo, &["rev-parse", "HEAD"]);
    let head = String::from_utf8_lossy(&head.stdout).trim().to_string();
    git_command(&target, &["cat-file", "-e", &head]);
    let log = git_command(&target, &["log", "--format=%s", &head]);
    assert_eq!(String::from_utf8_lossy(&log.stdout).lines().count(), 6);
}

#[test]
fn test_filesystem_store_round_trip() {
    let temp = TempDir::new().unwrap();
    let storage = FilesystemStorage::new(temp.path().join("store"));
    storage.initialize().unwrap();

    let memory = MemoryStorage::new();
    let ids = vec![
        memory.insert(gix_object::Kind::Blob, b"alpha"),
        memory.insert(gix_object::Kind::Blob, &vec![b'z'; 70_000]),
        memory.insert(gix_object::Kind::Tree, b""),
    ];
    let mut pack = Vec::new();
    Encoder::new(&mut pack, &memory).encode(&ids).unwrap();

    let summary = decode(&pack[..]).unpack_into(&storage).unwrap();
    assert_eq!(summary.objects, 3);
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(storage.list_ids().unwrap(), sorted);

    let mut again = Vec::new();
    let checksum = Encoder::new(&mut again, &storage).encode(&ids).unwrap();
    assert_eq!(again, pack);
    assert_eq!(checksum.as_bytes(), &pack[pack.len() - 20..]);

    // Writing the same objects twice is harmless.
    for object in decode(&pack[..]) {
        let object = object.unwrap();
        storage.write_object(&object.id, object.kind, &object.data).unwrap();
    }
    assert_eq!(storage.list_ids().unwrap().len(), 3);
}

fn cli(home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_git-pack-store"))
        .env("HOME", home)
        .env_remove("GIT_PACK_STORE_DIR")
        .env_remove("GIT_PACK_STORE_THIN_PACKS")
        .env_remove("GIT_PACK_STORE_CACHE_ENTRIES")
        .env_remove("GIT_PACK_STORE_CACHE_BYTES")
        .env_remove("GIT_PACK_STORE_COMPRESSION")
        .args(args)
        .output()
        .expect("Failed to run git-pack-store")
}

#[test]
fn test_cli_unpack_pack_verify() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("home");
    fs::create_dir(&home).unwrap();
    let store_dir = temp.path().join("store");
    let store = store_dir.to_str().unwrap();

    let memory = MemoryStorage::new();
    let ids: Vec<ObjectId> = (0..5)
        .map(|i| memory.insert(gix_object::Kind::Blob, format!("blob number {i}\n").as_bytes()))
        .collect();
    let mut pack = Vec::new();
    Encoder::new(&mut pack, &memory).encode(&ids).unwrap();
    let input = temp.path().join("input.pack");
    fs::write(&input, &pack).unwrap();

    let out = cli(&home, &["--store", store, "init"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(home.join(".config/git-pack-store/config.yaml").exists());

    let out = cli(&home, &["--store", store, "unpack", input.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let checksum = ObjectId::from_bytes(pack[pack.len() - 20..].try_into().unwrap());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), checksum.to_hex());

    let output = temp.path().join("output.pack");
    let out = cli(
        &home,
        &["--store", store, "pack", "--all", "-o", output.to_str().unwrap()],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let out = cli(&home, &["--store", store, "verify", "--json", output.to_str().unwrap()]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["objects"], 5);
    assert_eq!(report["blobs"], 5);

    let mut damaged = fs::read(&output).unwrap();
    let last = damaged.len() - 1;
    damaged[last] ^= 0xff;
    fs::write(&output, &damaged).unwrap();
    let out = cli(&home, &["--store", store, "verify", output.to_str().unwrap()]);
    assert!(!out.status.success());

    let sink = FilesystemStorage::new(&store_dir);
    assert_eq!(sink.list_ids().unwrap().len(), 5);
}
