//! End-to-end scenarios through the public API.
//!
//! Each test builds a small tree with the standard layout and a handful of
//! users, then exercises one rule of the filesystem as a caller sees it.

use std::sync::{Arc, Barrier};
use std::thread;

use arbor_vfs::bootstrap::standard_layout;
use arbor_vfs::{
    AccessContext, AccessMode, ErrorKind, FileSystem, FsEventKind, Mode, MountOptions,
    UserIdentity, VfsConfig,
};

const STAFF: u32 = 50;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn alice() -> UserIdentity {
    UserIdentity::new(1000, "alice", 1000).with_groups([STAFF])
}

fn bob() -> UserIdentity {
    UserIdentity::new(1001, "bob", 1001).with_groups([STAFF])
}

fn carol() -> UserIdentity {
    UserIdentity::new(1002, "carol", 1002)
}

fn as_user(user: UserIdentity) -> AccessContext {
    AccessContext::new(user)
}

fn system() -> FileSystem {
    init_tracing();
    let fs = FileSystem::default();
    standard_layout(&fs, &[alice(), bob(), carol()]).unwrap();
    fs
}

#[test]
fn resolution_is_idempotent() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    for raw in ["~/a/../b/./c", "../bob//x", "/tmp/../../etc", "~carol", "."] {
        let once = fs.resolve(&ctx, raw).unwrap();
        let twice = fs.resolve(&ctx, &once).unwrap();
        assert_eq!(once, twice, "resolving {raw:?}");
        assert!(once.starts_with('/'));
    }
    assert_eq!(fs.resolve(&ctx, "/tmp/../../etc").unwrap(), "/etc");
    assert_eq!(fs.resolve(&ctx, "~carol").unwrap(), "/home/carol");
    assert_eq!(
        fs.resolve(&ctx, "").unwrap_err().kind(),
        ErrorKind::InvalidPath
    );
}

#[test]
fn write_then_read_round_trip() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    let payload: Vec<u8> = (0..=255).collect();
    fs.write_file(&ctx, "blob.bin", &payload).unwrap();
    assert_eq!(fs.read_file(&ctx, "blob.bin").unwrap(), payload);
    assert_eq!(fs.metadata(&ctx, "blob.bin").unwrap().size, 256);
}

#[test]
fn other_class_is_denied_but_root_is_not() {
    let fs = system();
    let alice_ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_file_with_mode(&alice_ctx, "diary", b"dear diary", Some(Mode::new(0o600)))
        .unwrap();

    let err = fs.read_file(&as_user(carol()), "/home/alice/diary").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(!fs.check_access(&as_user(carol()), "/home/alice/diary", AccessMode::Read));

    assert_eq!(
        fs.read_file(&AccessContext::system(), "/home/alice/diary").unwrap(),
        b"dear diary"
    );
}

#[test]
fn owner_class_does_not_fall_back_to_other_bits() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_file_with_mode(&ctx, "odd", b"", Some(Mode::new(0o044)))
        .unwrap();
    assert!(!fs.check_access(&ctx, "odd", AccessMode::Read));
    assert!(fs.check_access(&as_user(carol()), "/home/alice/odd", AccessMode::Read));
}

#[test]
fn sticky_tmp_protects_other_users_files() {
    let fs = system();
    let alice_ctx = as_user(alice());
    let bob_ctx = as_user(bob());
    fs.create_file(&bob_ctx, "/tmp/bobs", b"mine").unwrap();

    let err = fs.delete(&alice_ctx, "/tmp/bobs", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = fs.move_node(&alice_ctx, "/tmp/bobs", "/tmp/stolen").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(fs.exists("/tmp/bobs"));

    fs.delete(&bob_ctx, "/tmp/bobs", false).unwrap();
    assert!(!fs.exists("/tmp/bobs"));
}

#[test]
fn tmp_file_scenario() {
    let fs = system();
    let alice_ctx = as_user(alice());
    fs.create_file(&alice_ctx, "/tmp/a", b"hello").unwrap();

    let meta = fs.get_node("/tmp/a").unwrap();
    assert_eq!(meta.owner, 1000);
    assert_eq!(meta.group, 1000);
    assert_eq!(meta.mode, Mode::new(0o644));

    let carol_ctx = as_user(carol());
    assert_eq!(fs.read_file(&carol_ctx, "/tmp/a").unwrap(), b"hello");
    let err = fs.write_file(&carol_ctx, "/tmp/a", b"bye").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = fs.delete(&carol_ctx, "/tmp/a", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(fs.read_file(&alice_ctx, "/tmp/a").unwrap(), b"hello");
}

#[test]
fn setgid_directory_shares_group() {
    let fs = system();
    let root = AccessContext::system();
    fs.create_directory(&root, "/srv").unwrap();
    fs.create_directory(&root, "/srv/team").unwrap();
    fs.set_owner(&root, "/srv/team", None, Some(STAFF)).unwrap();
    fs.set_permissions(&root, "/srv/team", Mode::new(0o2775)).unwrap();

    let alice_ctx = as_user(alice())
        .with_cwd("/srv/team")
        .with_umask(Mode::new(0o002));
    fs.create_file(&alice_ctx, "plan.md", b"").unwrap();
    fs.create_directory(&alice_ctx, "drafts").unwrap();

    let plan = fs.get_node("/srv/team/plan.md").unwrap();
    assert_eq!(plan.group, STAFF);
    assert!(!plan.mode.is_setgid());
    let drafts = fs.get_node("/srv/team/drafts").unwrap();
    assert_eq!(drafts.group, STAFF);
    assert!(drafts.mode.is_setgid());

    // bob is staff too and may work in the shared directory
    let bob_ctx = as_user(bob()).with_cwd("/srv/team/drafts");
    fs.create_file(&bob_ctx, "v2.md", b"").unwrap();
    assert_eq!(fs.get_node("/srv/team/drafts/v2.md").unwrap().group, STAFF);
    let err = fs
        .create_file(&as_user(carol()), "/srv/team/nope", b"")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn concurrent_creates_have_one_winner() {
    let fs = Arc::new(system());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let fs = Arc::clone(&fs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = as_user(UserIdentity::new(2000 + i, format!("u{i}"), 2000));
                barrier.wait();
                fs.create_file(&ctx, "/tmp/race", format!("{i}").as_bytes())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
    assert_eq!(fs.list_directory(&AccessContext::system(), "/tmp").unwrap().len(), 1);
}

#[test]
fn concurrent_writers_and_readers() {
    let fs = Arc::new(system());
    fs.create_file(&as_user(alice()), "/tmp/counter", b"").unwrap();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let ctx = as_user(alice());
                for _ in 0..50 {
                    fs.append_file(&ctx, "/tmp/counter", b"x").unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let ctx = as_user(carol());
            for _ in 0..50 {
                let data = fs.read_file(&ctx, "/tmp/counter").unwrap();
                assert!(data.iter().all(|&b| b == b'x'));
            }
        })
    };
    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(fs.read_file(&as_user(alice()), "/tmp/counter").unwrap().len(), 200);
}

#[test]
fn move_preserves_identity_and_attributes() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_directory(&ctx, "project").unwrap();
    fs.create_file_with_mode(&ctx, "project/main.rs", b"fn main() {}", Some(Mode::new(0o640)))
        .unwrap();
    let before = fs.get_node("/home/alice/project/main.rs").unwrap();

    fs.move_node(&ctx, "project", "/tmp/project").unwrap();

    assert!(fs.metadata(&ctx, "project").unwrap_err().is_not_found());
    let after = fs.get_node("/tmp/project/main.rs").unwrap();
    assert_eq!(after.path, "/tmp/project/main.rs");
    assert_eq!(
        (after.owner, after.group, after.mode, after.created_at),
        (before.owner, before.group, before.mode, before.created_at)
    );
    assert_eq!(fs.read_file(&ctx, "/tmp/project/main.rs").unwrap(), b"fn main() {}");
}

#[test]
fn non_recursive_delete_keeps_directory() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_directory(&ctx, "full").unwrap();
    fs.create_file(&ctx, "full/item", b"1").unwrap();

    let err = fs.delete(&ctx, "full", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DirectoryNotEmpty);
    assert_eq!(fs.read_file(&ctx, "full/item").unwrap(), b"1");

    fs.delete(&ctx, "full", true).unwrap();
    assert!(!fs.exists("/home/alice/full"));
}

#[test]
fn recursive_delete_is_all_or_nothing() {
    let fs = system();
    let alice_ctx = as_user(alice()).with_umask(Mode::new(0));
    let bob_ctx = as_user(bob());
    fs.create_directory_with_mode(&alice_ctx, "/tmp/box", Some(Mode::new(0o1777)))
        .unwrap();
    fs.create_file(&alice_ctx, "/tmp/box/mine", b"").unwrap();
    fs.create_directory(&bob_ctx, "/tmp/box/sub").unwrap();
    fs.create_file(&bob_ctx, "/tmp/box/sub/inner", b"").unwrap();

    // alice may remove everything in her box except bob's file in bob's 0755 dir
    let err = fs.delete(&alice_ctx, "/tmp/box", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let names: Vec<_> = fs
        .list_directory(&alice_ctx, "/tmp/box")
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["mine", "sub"]);
    assert!(fs.exists("/tmp/box/sub/inner"));

    fs.delete(&bob_ctx, "/tmp/box/sub", true).unwrap();
    fs.delete(&alice_ctx, "/tmp/box", true).unwrap();
    assert!(!fs.exists("/tmp/box"));
}

#[test]
fn copy_is_all_or_nothing() {
    let fs = system();
    let alice_ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_directory_all(&alice_ctx, "src/deep").unwrap();
    fs.create_file(&alice_ctx, "src/readme", b"r").unwrap();
    fs.create_file_with_mode(&alice_ctx, "src/deep/key", b"k", Some(Mode::new(0o600)))
        .unwrap();

    let carol_ctx = as_user(carol());
    let err = fs.copy(&carol_ctx, "/home/alice/src", "/tmp/loot").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(!fs.exists("/tmp/loot"));

    fs.copy(&alice_ctx, "src", "/tmp/backup").unwrap();
    let copied = fs.walk(&alice_ctx, "/tmp/backup").unwrap();
    assert_eq!(copied.len(), 4);
    assert!(copied.iter().all(|m| m.owner == 1000));
    assert_eq!(fs.read_file(&alice_ctx, "/tmp/backup/deep/key").unwrap(), b"k");
    assert_eq!(fs.get_node("/tmp/backup/deep/key").unwrap().mode, Mode::new(0o600));
}

#[test]
fn symlink_cycle_is_broken_link() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    fs.create_symbolic_link(&ctx, "loop", "loop").unwrap();
    let err = fs.metadata(&ctx, "loop").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenSymbolicLink);
    assert!(fs.symlink_metadata(&ctx, "loop").unwrap().is_symlink());
}

#[test]
fn hop_limit_comes_from_config() {
    init_tracing();
    let config = VfsConfig {
        max_symlink_depth: 2,
        ..VfsConfig::default()
    };
    let fs = FileSystem::new(config);
    let root = AccessContext::system();
    fs.create_file(&root, "/target", b"t").unwrap();
    fs.create_symbolic_link(&root, "/l1", "/target").unwrap();
    fs.create_symbolic_link(&root, "/l2", "/l1").unwrap();
    fs.create_symbolic_link(&root, "/l3", "/l2").unwrap();

    assert_eq!(fs.read_file(&root, "/l2").unwrap(), b"t");
    let err = fs.read_file(&root, "/l3").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenSymbolicLink);
}

#[test]
fn read_only_mount_refuses_every_write() {
    let fs = system();
    let root = AccessContext::system();
    fs.create_directory_all(&root, "/mnt/cdrom").unwrap();
    fs.create_file(&root, "/mnt/cdrom/setup.exe", b"MZ").unwrap();
    fs.mount(&root, "/dev/sr0", "/mnt/cdrom", "iso9660", "ro".parse().unwrap())
        .unwrap();

    let attempts = [
        fs.write_file(&root, "/mnt/cdrom/setup.exe", b""),
        fs.create_directory(&root, "/mnt/cdrom/dir"),
        fs.delete(&root, "/mnt/cdrom/setup.exe", false),
        fs.set_permissions(&root, "/mnt/cdrom/setup.exe", Mode::new(0o777)),
        fs.move_node(&root, "/mnt/cdrom/setup.exe", "/tmp/setup.exe"),
    ];
    for attempt in attempts {
        assert_eq!(attempt.unwrap_err().kind(), ErrorKind::ReadOnly);
    }
    assert_eq!(fs.read_file(&root, "/mnt/cdrom/setup.exe").unwrap(), b"MZ");
}

#[test]
fn busy_mount_needs_force() {
    let fs = system();
    let root = AccessContext::system();
    fs.create_directory(&root, "/media").unwrap();
    fs.mount(&root, "/dev/sdb1", "/media", "vfat", MountOptions::default())
        .unwrap();

    let lease = fs.open_mount("/media/photos").unwrap();
    let err = fs.unmount(&root, "/media", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MountConflict);
    assert_eq!(fs.mounts().len(), 1);
    drop(lease);
    fs.unmount(&root, "/media", false).unwrap();
}

#[test]
fn bind_mount_shares_content() {
    let fs = system();
    let root = AccessContext::system();
    fs.create_directory_all(&root, "/srv/www").unwrap();
    fs.create_file(&root, "/srv/www/index.html", b"<h1>hi</h1>").unwrap();
    fs.create_directory_all(&root, "/var/www").unwrap();
    fs.mount(&root, "/srv/www", "/var/www", "bind", MountOptions::default())
        .unwrap();

    let carol_ctx = as_user(carol());
    assert_eq!(
        fs.read_file(&carol_ctx, "/var/www/index.html").unwrap(),
        b"<h1>hi</h1>"
    );
    assert!(fs.describe_mounts().contains("/srv/www on /var/www type bind (rw)"));

    let err = fs
        .mount(&root, "/var/www", "/srv/www/sub", "bind", MountOptions::default())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn one_event_per_operation() {
    let fs = system();
    let ctx = as_user(alice()).with_cwd("/home/alice");
    let mut events = fs.subscribe("/home/alice");

    fs.create_directory(&ctx, "d").unwrap();
    fs.write_file(&ctx, "d/f", b"1").unwrap();
    fs.write_file(&ctx, "d/f", b"2").unwrap();
    fs.copy(&ctx, "d", "e").unwrap();
    fs.move_node(&ctx, "e", "g").unwrap();
    fs.set_permissions(&ctx, "g", Mode::new(0o700)).unwrap();
    fs.delete(&ctx, "g", true).unwrap();
    let _ = fs.read_file(&ctx, "missing");

    let kinds: Vec<_> = events.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            FsEventKind::Created,
            FsEventKind::Created,
            FsEventKind::Written,
            FsEventKind::Copied,
            FsEventKind::Moved,
            FsEventKind::AttributesChanged,
            FsEventKind::Deleted,
            FsEventKind::Failed,
        ]
    );
}

#[tokio::test]
async fn watcher_sees_config_changes() {
    let fs = Arc::new(system());
    let mut watcher = fs.subscribe_kinds("/etc", [FsEventKind::Written, FsEventKind::Created]);

    let writer = Arc::clone(&fs);
    tokio::spawn(async move {
        let root = AccessContext::system();
        writer.write_file(&root, "/tmp/ignored", b"").unwrap();
        writer.write_file(&root, "/etc/hostname", b"arbor\n").unwrap();
    });

    let event = watcher.recv().await.unwrap();
    assert_eq!(event.kind, FsEventKind::Created);
    assert_eq!(event.path, "/etc/hostname");
}
