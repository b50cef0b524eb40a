mod common;

use std::fs;
use std::path::Path;
use tempfile::tempdir;

use common::{bare_jpeg, organizer, set_mtime, snapshot, write_file};
use photo_organizer::{
    BatchState, CancellationToken, ErrorKind, FileIdentity, MediaKind, Operation, SilentSink,
};

fn identities(paths: &[&Path]) -> Vec<FileIdentity> {
    paths
        .iter()
        .map(|p| FileIdentity::from_path(p).unwrap())
        .collect()
}

#[test]
fn test_sizes_100_100_50() {
    let tmp = tempdir().unwrap();
    let a = write_file(&tmp.path().join("a.jpg"), &[0x11; 100]);
    let b = write_file(&tmp.path().join("b.jpg"), &[0x11; 100]);
    let c = write_file(&tmp.path().join("c.jpg"), &[0x22; 50]);

    let organizer = organizer(&tmp.path().join("journals"));
    let report = organizer.find_duplicates(&identities(&[&a, &b, &c]), None, &SilentSink);

    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    let members: Vec<&Path> = group.members.iter().map(|m| m.path.as_path()).collect();
    assert_eq!(members, vec![a.as_path(), b.as_path()]);
    assert_eq!(group.size, 100);
    assert!(report.failures.is_empty());
    assert_eq!(report.duplicate_files(), 1);
    assert_eq!(report.wasted_bytes(), 100);
}

#[test]
fn test_identical_content_groups_across_paths_and_mtimes() {
    let tmp = tempdir().unwrap();
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let x = write_file(&tmp.path().join("2019/x.jpg"), &content);
    let y = write_file(&tmp.path().join("backup/old/y.jpg"), &content);
    set_mtime(&x, 1_500_000_000);
    set_mtime(&y, 1_700_000_000);

    let organizer = organizer(&tmp.path().join("journals"));
    let report = organizer.find_duplicates(&identities(&[&x, &y]), None, &SilentSink);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].members.len(), 2);
}

#[test]
fn test_one_byte_difference_never_groups() {
    let tmp = tempdir().unwrap();
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let original = write_file(&tmp.path().join("original.jpg"), &content);

    // Outside every sampled region, so only the full hash can tell.
    let mut middle = content.clone();
    middle[50_000] ^= 0xFF;
    let middle = write_file(&tmp.path().join("middle.jpg"), &middle);

    let mut last = content.clone();
    let end = last.len() - 1;
    last[end] ^= 0x01;
    let last = write_file(&tmp.path().join("last.jpg"), &last);

    let organizer = organizer(&tmp.path().join("journals"));
    let report =
        organizer.find_duplicates(&identities(&[&original, &middle, &last]), None, &SilentSink);
    assert!(report.groups.is_empty());
    assert!(report.failures.is_empty());
}

#[test]
fn test_primary_is_earliest_then_path() {
    let tmp = tempdir().unwrap();
    let mut content = bare_jpeg();
    content.extend_from_slice(b"same pixels");
    let newer = write_file(&tmp.path().join("a/newer.jpg"), &content);
    let older = write_file(&tmp.path().join("z/older.jpg"), &content);
    let tie = write_file(&tmp.path().join("m/tie.jpg"), &content);
    set_mtime(&newer, 1_700_000_000);
    set_mtime(&older, 1_500_000_000);
    set_mtime(&tie, 1_500_000_000);

    let organizer = organizer(&tmp.path().join("journals"));
    let report = organizer.find_duplicates(&identities(&[&newer, &older, &tie]), None, &SilentSink);
    assert_eq!(report.groups.len(), 1);
    // older and tie share the earliest time; the smaller path wins.
    assert_eq!(report.groups[0].primary.path, tie);
    let redundant: Vec<_> = report.groups[0].redundant().map(|m| m.path.clone()).collect();
    assert_eq!(redundant, vec![newer.clone(), older.clone()]);
}

#[test]
fn test_kind_filter_restricts_grouping() {
    let tmp = tempdir().unwrap();
    let photo_a = write_file(&tmp.path().join("a.jpg"), b"identical bytes");
    let photo_b = write_file(&tmp.path().join("b.jpg"), b"identical bytes");
    let clip_a = write_file(&tmp.path().join("a.mp4"), b"identical clip!");
    let clip_b = write_file(&tmp.path().join("b.mp4"), b"identical clip!");

    let organizer = organizer(&tmp.path().join("journals"));
    let all = identities(&[&photo_a, &photo_b, &clip_a, &clip_b]);

    let report = organizer.find_duplicates(&all, Some(MediaKind::Video), &SilentSink);
    assert_eq!(report.groups.len(), 1);
    assert!(report.groups[0]
        .members
        .iter()
        .all(|m| m.path.extension().unwrap() == "mp4"));

    let report = organizer.find_duplicates(&all, None, &SilentSink);
    assert_eq!(report.groups.len(), 2);
}

#[test]
fn test_unreadable_file_is_reported_not_grouped() {
    let tmp = tempdir().unwrap();
    let a = write_file(&tmp.path().join("a.jpg"), &[7; 64]);
    let b = write_file(&tmp.path().join("b.jpg"), &[7; 64]);
    let c = write_file(&tmp.path().join("c.jpg"), &[7; 64]);
    let ids = identities(&[&a, &b, &c]);
    fs::remove_file(&c).unwrap();

    let organizer = organizer(&tmp.path().join("journals"));
    let report = organizer.find_duplicates(&ids, None, &SilentSink);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].members.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0.path, c);
    assert_eq!(report.failures[0].1.kind(), ErrorKind::IoFailure);
}

#[test]
fn test_quarantine_moves_duplicates_and_rolls_back() {
    let tmp = tempdir().unwrap();
    let library = tmp.path().join("library");
    let keep = write_file(&library.join("2020/keep.jpg"), b"holiday photo");
    let copy = write_file(&library.join("inbox/keep.jpg"), b"holiday photo");
    let other = write_file(&library.join("inbox/other.jpg"), b"something else");
    set_mtime(&keep, 1_500_000_000);
    set_mtime(&copy, 1_600_000_000);
    let before = snapshot(&library);

    let organizer = organizer(&tmp.path().join("journals"));
    let report = organizer.find_duplicates(&identities(&[&keep, &copy, &other]), None, &SilentSink);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].primary.path, keep);

    let quarantine = tmp.path().join("quarantine");
    let plan = organizer.removal_plan(&report.groups, &quarantine, Operation::Move);
    assert_eq!(plan.len(), 1);

    let mut execution = organizer
        .execute(&plan, &CancellationToken::new(), &SilentSink)
        .unwrap();
    assert_eq!(execution.state, BatchState::Completed);
    assert!(!copy.exists());
    assert!(keep.exists());
    let moved = snapshot(&quarantine);
    assert_eq!(moved.len(), 1);
    assert!(moved
        .keys()
        .next()
        .unwrap()
        .ends_with(Path::new("library/inbox/keep.jpg")));

    organizer
        .rollback(&mut execution.journal, &SilentSink)
        .unwrap();
    assert_eq!(snapshot(&library), before);
    assert!(!quarantine.exists());
}
