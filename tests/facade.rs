mod common;

use std::sync::Arc;

use common::sample_fs;
use tierfs::config::{Encoding, FsConfig, FsOptions};
use tierfs::errno::ErrnoKind;
use tierfs::facade::FileSystem;
use tierfs::find::{FindOptions, FindType};
use tierfs::glob::GlobOptions;
use tierfs::grep::{GrepOptions, GrepPattern};
use tierfs::vfs::{Backend, MemoryBackend, MkdirOptions, WriteOptions};

fn config(options: FsOptions) -> FsConfig {
    FsConfig::new(options).expect("valid config")
}

#[tokio::test]
async fn root_path_mounts_a_subtree() {
    let backend = sample_fs().await;
    let fs = FileSystem::new(
        backend.clone(),
        config(FsOptions { root_path: "/home/user".to_string(), ..Default::default() }),
    );

    let text = fs.read_to_string("/readme.txt", None).await.expect("read under mount");
    assert_eq!(text, "hello from tierfs");

    fs.write_string("/fresh.txt", "mounted", None).await.expect("write under mount");
    assert!(backend.exists("/home/user/fresh.txt").await);
}

#[tokio::test]
async fn read_only_config_blocks_mutations() {
    let backend = sample_fs().await;
    let fs = FileSystem::new(
        backend,
        config(FsOptions { read_only: true, ..Default::default() }),
    );

    let err = fs.write_string("/x.txt", "data", None).await.expect_err("read-only mount");
    assert_eq!(err.kind(), ErrnoKind::Erofs);
    let err = fs.unlink("/home/user/readme.txt").await.expect_err("read-only unlink");
    assert_eq!(err.kind(), ErrnoKind::Erofs);

    // Reads still pass through.
    assert!(fs.exists("/home/user/readme.txt").await);
}

#[tokio::test]
async fn invalid_config_is_einval() {
    let err = FsConfig::new(FsOptions { encoding: "utf16".to_string(), ..Default::default() })
        .expect_err("bad encoding");
    assert_eq!(err.kind(), ErrnoKind::Einval);

    let err = FsConfig::new(FsOptions { mode: -1, ..Default::default() })
        .expect_err("negative mode");
    assert_eq!(err.kind(), ErrnoKind::Einval);
}

#[tokio::test]
async fn string_io_honours_encodings() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(backend.clone(), FsConfig::default());

    fs.write_string("/data.b64", "aGVsbG8=", Some(Encoding::Base64)).await.unwrap();
    assert_eq!(&backend.read_file("/data.b64").await.unwrap()[..], b"hello");
    assert_eq!(
        fs.read_to_string("/data.b64", Some(Encoding::Base64)).await.unwrap(),
        "aGVsbG8="
    );

    fs.write_string("/data.hex", "63616665", Some(Encoding::Hex)).await.unwrap();
    assert_eq!(&backend.read_file("/data.hex").await.unwrap()[..], b"cafe");

    let err = fs
        .write_string("/bad.hex", "zz", Some(Encoding::Hex))
        .await
        .expect_err("malformed hex");
    assert_eq!(err.kind(), ErrnoKind::Einval);
}

#[tokio::test]
async fn glob_through_the_facade() {
    let backend = sample_fs().await;
    let fs = FileSystem::new(
        backend,
        config(FsOptions { root_path: "/home/user".to_string(), ..Default::default() }),
    );

    let found = fs
        .glob(GlobOptions {
            patterns: vec!["**/*.md".to_string()],
            cwd: "/".to_string(),
            ..Default::default()
        })
        .await
        .expect("glob succeeds");
    assert_eq!(found, vec!["notes/a.md", "notes/b.md"]);
}

#[tokio::test]
async fn grep_context_boundary_scenario() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .write_file(
            "/src.txt",
            b"line 1\nline 2\nline 3\nline 4\nhas a TODO here\nline 6\nline 7\nline 8\n",
            WriteOptions::default(),
        )
        .await
        .unwrap();
    let fs = FileSystem::new(backend, FsConfig::default());

    let matches = fs
        .grep(GrepOptions {
            pattern: GrepPattern::Regex("TODO".to_string()),
            path: "/src.txt".to_string(),
            before: 2,
            after: 2,
            ..Default::default()
        })
        .await
        .expect("grep succeeds");

    assert_eq!(matches.len(), 1);
    let hit = &matches[0];
    assert_eq!(hit.line, 5);
    assert_eq!(hit.before, vec!["line 3", "line 4"]);
    assert_eq!(hit.after, vec!["line 6", "line 7"]);
}

#[tokio::test]
async fn find_through_the_facade() {
    let backend = sample_fs().await;
    let fs = FileSystem::new(
        backend,
        config(FsOptions { root_path: "/home/user".to_string(), ..Default::default() }),
    );

    let found = fs
        .find(FindOptions {
            path: "/".to_string(),
            kind: Some(FindType::File),
            name: Some("*.md".to_string()),
            ..Default::default()
        })
        .await
        .expect("find succeeds");
    let names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.md", "b.md"]);
}

#[tokio::test]
async fn facade_mkdir_respects_config_recursive() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = FileSystem::new(
        backend.clone(),
        config(FsOptions { recursive: true, ..Default::default() }),
    );
    fs.mkdir("/deep/nested/dir", MkdirOptions::default()).await.expect("config recursion");
    assert!(backend.exists("/deep/nested/dir").await);
}

#[tokio::test]
async fn tiering_probes_pass_through() {
    let backend = sample_fs().await;
    let fs = FileSystem::new(backend, FsConfig::default());
    assert!(fs.supports_tiering());
    fs.demote("/home/user/data.bin").await.unwrap();
    assert_eq!(fs.get_tier("/home/user/data.bin").await.unwrap(), tierfs::Tier::Cold);
}
