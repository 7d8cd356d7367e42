mod common;

use common::sample_fs;
use tierfs::consts;
use tierfs::errno::ErrnoKind;
use tierfs::vfs::{
    Backend, FileKind, MemoryBackend, MkdirOptions, RmdirOptions, WriteFlag, WriteOptions,
};

#[tokio::test]
async fn read_write_round_trip() {
    let fs = sample_fs().await;
    let data = fs.read_file("/home/user/readme.txt").await.expect("read succeeds");
    assert_eq!(&data[..], b"hello from tierfs");
}

#[tokio::test]
async fn read_missing_file_formats_enoent() {
    let fs = sample_fs().await;
    let err = fs.read_file("/home/user/ghost.txt").await.expect_err("missing file");
    assert_eq!(err.kind(), ErrnoKind::Enoent);
    assert_eq!(
        err.to_string(),
        "ENOENT: no such file or directory, open '/home/user/ghost.txt'"
    );
}

#[tokio::test]
async fn read_directory_is_eisdir() {
    let fs = sample_fs().await;
    let err = fs.read_file("/home/user").await.expect_err("directory read");
    assert_eq!(err.kind(), ErrnoKind::Eisdir);
}

#[tokio::test]
async fn write_into_missing_parent_is_enoent() {
    let fs = sample_fs().await;
    let err = fs
        .write_file("/no/such/dir/file.txt", b"x", WriteOptions::default())
        .await
        .expect_err("missing parent");
    assert_eq!(err.kind(), ErrnoKind::Enoent);
}

#[tokio::test]
async fn exclusive_write_refuses_overwrite() {
    let fs = sample_fs().await;
    let options = WriteOptions { flag: WriteFlag::WriteExclusive, ..Default::default() };
    let err = fs
        .write_file("/home/user/readme.txt", b"new", options)
        .await
        .expect_err("exclusive over existing");
    assert_eq!(err.kind(), ErrnoKind::Eexist);
}

#[tokio::test]
async fn append_creates_then_extends() {
    let fs = sample_fs().await;
    fs.append_file("/home/user/log.txt", b"one").await.expect("append creates");
    fs.append_file("/home/user/log.txt", b" two").await.expect("append extends");
    let data = fs.read_file("/home/user/log.txt").await.unwrap();
    assert_eq!(&data[..], b"one two");
}

#[tokio::test]
async fn unlink_file_but_not_directory() {
    let fs = sample_fs().await;
    fs.unlink("/home/user/readme.txt").await.expect("unlink file");
    assert!(!fs.exists("/home/user/readme.txt").await);

    let err = fs.unlink("/home/user/notes").await.expect_err("unlink directory");
    assert_eq!(err.kind(), ErrnoKind::Eisdir);
}

#[tokio::test]
async fn rename_file_and_directory_subtree() {
    let fs = sample_fs().await;
    fs.rename("/home/user/readme.txt", "/home/user/intro.txt").await.expect("rename file");
    assert!(fs.exists("/home/user/intro.txt").await);
    assert!(!fs.exists("/home/user/readme.txt").await);

    fs.rename("/home/user/notes", "/home/user/journal").await.expect("rename directory");
    assert!(fs.exists("/home/user/journal/a.md").await);
    assert!(!fs.exists("/home/user/notes/a.md").await);
}

#[tokio::test]
async fn rename_into_own_subtree_is_einval() {
    let fs = sample_fs().await;
    let err = fs.rename("/home/user", "/home/user/inner").await.expect_err("self move");
    assert_eq!(err.kind(), ErrnoKind::Einval);
}

#[tokio::test]
async fn rename_onto_nonempty_directory_is_enotempty() {
    let fs = sample_fs().await;
    fs.mkdir("/home/user/spare", MkdirOptions::default()).await.unwrap();
    let err = fs
        .rename("/home/user/spare", "/home/user/notes")
        .await
        .expect_err("target not empty");
    assert_eq!(err.kind(), ErrnoKind::Enotempty);
}

#[tokio::test]
async fn copy_file_honours_excl_and_mode() {
    let fs = sample_fs().await;
    fs.chmod("/home/user/readme.txt", 0o640).await.unwrap();
    fs.copy_file("/home/user/readme.txt", "/home/user/copy.txt", 0).await.expect("copy");
    let copied = fs.stat("/home/user/copy.txt").await.unwrap();
    assert_eq!(copied.mode, 0o640);
    assert_eq!(&fs.read_file("/home/user/copy.txt").await.unwrap()[..], b"hello from tierfs");

    let err = fs
        .copy_file("/home/user/readme.txt", "/home/user/copy.txt", consts::COPYFILE_EXCL)
        .await
        .expect_err("EXCL forbids overwrite");
    assert_eq!(err.kind(), ErrnoKind::Eexist);
}

#[tokio::test]
async fn mkdir_semantics() {
    let fs = sample_fs().await;
    let err = fs.mkdir("/home/user", MkdirOptions::default()).await.expect_err("exists");
    assert_eq!(err.kind(), ErrnoKind::Eexist);

    fs.mkdir("/home/user", MkdirOptions { recursive: true, ..Default::default() })
        .await
        .expect("recursive mkdir on existing dir succeeds");

    let err = fs
        .mkdir("/home/user/a/b/c", MkdirOptions::default())
        .await
        .expect_err("missing intermediates");
    assert_eq!(err.kind(), ErrnoKind::Enoent);

    fs.mkdir("/home/user/a/b/c", MkdirOptions { recursive: true, ..Default::default() })
        .await
        .expect("recursive creates chain");
    assert!(fs.exists("/home/user/a/b/c").await);
}

#[tokio::test]
async fn rmdir_semantics() {
    let fs = sample_fs().await;
    let err = fs.rmdir("/home/user/notes", RmdirOptions::default()).await.expect_err("not empty");
    assert_eq!(err.kind(), ErrnoKind::Enotempty);
    assert_eq!(
        err.to_string(),
        "ENOTEMPTY: directory not empty, rmdir '/home/user/notes'"
    );

    fs.rmdir("/home/user/notes", RmdirOptions { recursive: true }).await.expect("recursive rmdir");
    assert!(!fs.exists("/home/user/notes").await);

    fs.rmdir("/tmp", RmdirOptions::default()).await.expect("empty dir removal");

    let err = fs
        .rmdir("/home/user/readme.txt", RmdirOptions::default())
        .await
        .expect_err("file target");
    assert_eq!(err.kind(), ErrnoKind::Enotdir);
}

#[tokio::test]
async fn readdir_names_and_types() {
    let fs = sample_fs().await;
    let names = fs.readdir("/home/user").await.expect("readdir");
    assert_eq!(names, vec!["data.bin", "notes", "readme.txt"]);

    let dirents = fs.readdir_types("/home/user").await.expect("readdir types");
    let kinds: Vec<(String, FileKind)> =
        dirents.into_iter().map(|d| (d.name, d.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("data.bin".to_string(), FileKind::File),
            ("notes".to_string(), FileKind::Directory),
            ("readme.txt".to_string(), FileKind::File),
        ]
    );

    let err = fs.readdir("/home/user/readme.txt").await.expect_err("file readdir");
    assert_eq!(err.kind(), ErrnoKind::Enotdir);
}

#[tokio::test]
async fn stat_vs_lstat_on_symlinks() {
    let fs = sample_fs().await;
    fs.symlink("/home/user/readme.txt", "/home/user/alias").await.expect("symlink");

    let through = fs.stat("/home/user/alias").await.expect("stat follows");
    assert_eq!(through.kind, FileKind::File);
    assert_eq!(through.size, 17);

    let link = fs.lstat("/home/user/alias").await.expect("lstat stops at link");
    assert_eq!(link.kind, FileKind::Symlink);

    assert_eq!(
        fs.readlink("/home/user/alias").await.expect("readlink"),
        "/home/user/readme.txt"
    );
    let err = fs.readlink("/home/user/readme.txt").await.expect_err("not a link");
    assert_eq!(err.kind(), ErrnoKind::Einval);
}

#[tokio::test]
async fn relative_symlink_targets_resolve_from_link_dir() {
    let fs = sample_fs().await;
    fs.symlink("notes/a.md", "/home/user/shortcut").await.unwrap();
    let data = fs.read_file("/home/user/shortcut").await.expect("relative target resolves");
    assert_eq!(&data[..], b"# a");
    assert_eq!(fs.realpath("/home/user/shortcut").await.unwrap(), "/home/user/notes/a.md");
}

#[tokio::test]
async fn symlink_loops_fail_eloop() {
    let fs = sample_fs().await;
    fs.mkdir("/loop", MkdirOptions::default()).await.unwrap();
    fs.symlink("/loop/b", "/loop/a").await.unwrap();
    fs.symlink("/loop/a", "/loop/b").await.unwrap();

    let err = fs.realpath("/loop/a").await.expect_err("cycle");
    assert_eq!(err.kind(), ErrnoKind::Eloop);
    assert_eq!(
        err.to_string(),
        "ELOOP: too many symbolic links encountered, realpath '/loop/a'"
    );
}

#[tokio::test]
async fn hard_links_share_content_and_nlink() {
    let fs = sample_fs().await;
    fs.link("/home/user/readme.txt", "/home/user/hard.txt").await.expect("link");

    let stats = fs.stat("/home/user/readme.txt").await.unwrap();
    assert_eq!(stats.nlink, 2);
    assert_eq!(&fs.read_file("/home/user/hard.txt").await.unwrap()[..], b"hello from tierfs");

    // Content stays shared through either name.
    fs.append_file("/home/user/hard.txt", b"!").await.unwrap();
    assert_eq!(&fs.read_file("/home/user/readme.txt").await.unwrap()[..], b"hello from tierfs!");

    fs.unlink("/home/user/readme.txt").await.unwrap();
    let stats = fs.stat("/home/user/hard.txt").await.unwrap();
    assert_eq!(stats.nlink, 1);
}

#[tokio::test]
async fn chmod_chown_utimes_advance_ctime() {
    let fs = sample_fs().await;
    let before = fs.stat("/etc/config.toml").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    fs.chmod("/etc/config.toml", 0o600).await.unwrap();
    let after = fs.stat("/etc/config.toml").await.unwrap();
    assert_eq!(after.mode, 0o600);
    assert!(after.ctime_ms >= before.ctime_ms);

    fs.chown("/etc/config.toml", 1000, 1000).await.unwrap();
    let owned = fs.stat("/etc/config.toml").await.unwrap();
    assert_eq!((owned.uid, owned.gid), (1000, 1000));

    fs.utimes("/etc/config.toml", 1_000_000, 2_000_000).await.unwrap();
    let stamped = fs.stat("/etc/config.toml").await.unwrap();
    assert_eq!(stamped.atime_ms, 1_000_000);
    assert_eq!(stamped.mtime_ms, 2_000_000);
    assert!(stamped.ctime_ms >= owned.ctime_ms);
}

#[tokio::test]
async fn access_checks_permission_bits() {
    let fs = sample_fs().await;
    fs.access("/home/user/readme.txt", consts::F_OK).await.expect("exists");
    fs.access("/home/user/readme.txt", consts::R_OK | consts::W_OK).await.expect("rw");

    fs.chmod("/home/user/readme.txt", 0o000).await.unwrap();
    let err = fs.access("/home/user/readme.txt", consts::R_OK).await.expect_err("no read");
    assert_eq!(err.kind(), ErrnoKind::Eacces);

    let err = fs.access("/absent", consts::F_OK).await.expect_err("missing");
    assert_eq!(err.kind(), ErrnoKind::Enoent);
}

#[tokio::test]
async fn mkdtemp_creates_unique_0700_directories() {
    let fs = sample_fs().await;
    let first = fs.mkdtemp("/tmp/build-").await.expect("mkdtemp");
    let second = fs.mkdtemp("/tmp/build-").await.expect("mkdtemp again");
    assert_ne!(first, second);
    assert!(first.starts_with("/tmp/build-"));
    assert_eq!(first.len(), "/tmp/build-".len() + 6);

    let stats = fs.stat(&first).await.unwrap();
    assert_eq!(stats.kind, FileKind::Directory);
    assert_eq!(stats.mode, 0o700);

    let err = fs.mkdtemp("/nowhere/tmp-").await.expect_err("missing parent");
    assert_eq!(err.kind(), ErrnoKind::Enoent);
}

#[tokio::test]
async fn read_only_backend_fails_erofs() {
    let fs = MemoryBackend::new_read_only();
    let err = fs
        .write_file("/x.txt", b"data", WriteOptions::default())
        .await
        .expect_err("read-only");
    assert_eq!(err.kind(), ErrnoKind::Erofs);
    assert_eq!(err.to_string(), "EROFS: read-only file system, open '/x.txt'");

    let err = fs.mkdir("/dir", MkdirOptions::default()).await.expect_err("read-only mkdir");
    assert_eq!(err.kind(), ErrnoKind::Erofs);
}

#[tokio::test]
async fn tiering_capability_round_trip() {
    let fs = sample_fs().await;
    assert!(fs.supports_tiering());
    assert_eq!(fs.get_tier("/home/user/readme.txt").await.unwrap(), tierfs::Tier::Warm);
    fs.demote("/home/user/readme.txt").await.unwrap();
    assert_eq!(fs.get_tier("/home/user/readme.txt").await.unwrap(), tierfs::Tier::Cold);
    fs.promote("/home/user/readme.txt").await.unwrap();
    assert_eq!(fs.get_tier("/home/user/readme.txt").await.unwrap(), tierfs::Tier::Warm);
}
