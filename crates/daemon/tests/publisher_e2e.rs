// End-to-end publisher tests against a real git binary and a local bare
// remote.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::NaiveDate;
use confsync_common::identity::IdentityMap;
use confsync_common::types::RevisionRecord;
use confsync_daemon::git::{CommitOutcome, GitPublisher};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git binary should be available");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Bare remote plus a working clone seeded with one pushed commit.
fn seeded_repos(root: &TempDir) -> (PathBuf, PathBuf) {
    let remote = root.path().join("remote.git");
    let work = root.path().join("work");
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&work).unwrap();

    git(&remote, &["init", "--bare"]);
    git(&work, &["init", "-b", "master"]);
    git(&work, &["config", "user.name", "Seeder"]);
    git(&work, &["config", "user.email", "seed@example.com"]);
    git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
    std::fs::write(work.join("README.md"), "seed\n").unwrap();
    git(&work, &["add", "--all"]);
    git(&work, &["commit", "-m", "seed"]);
    git(&work, &["push", "-u", "origin", "master"]);

    (work, remote)
}

fn identities() -> IdentityMap {
    let mut raw = HashMap::new();
    raw.insert("Default".to_string(), "Sync Bot <sync@example.com>".to_string());
    raw.insert("Ivanov".to_string(), "Ivan Ivanov <ivanov@example.com>".to_string());
    IdentityMap::from_entries(&raw).unwrap()
}

fn record(number: u64, author: &str, comment: &str) -> RevisionRecord {
    RevisionRecord {
        number,
        author: author.to_string(),
        comment: comment.to_string(),
        created_at: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap().and_hms_opt(10, 30, 45),
    }
}

#[test]
fn publishes_a_new_revision_to_the_remote() {
    let root = TempDir::new().unwrap();
    let (work, remote) = seeded_repos(&root);
    let publisher = GitPublisher::new(&work, identities());

    publisher.prepare("master").unwrap();
    std::fs::write(work.join("Configuration.xml"), "<Configuration/>").unwrap();
    let outcome = publisher.commit_and_push(&record(5, "Ivanov", "Правка заказов"), "master").unwrap();

    assert_eq!(outcome, CommitOutcome::Created);
    let head = git(&remote, &["log", "-1", "--format=%an|%ae|%s"]);
    assert_eq!(head.trim(), "Ivan Ivanov|ivanov@example.com|Правка заказов");
}

#[test]
fn commit_carries_the_revision_timestamp() {
    let root = TempDir::new().unwrap();
    let (work, remote) = seeded_repos(&root);
    let publisher = GitPublisher::new(&work, identities());

    publisher.prepare("master").unwrap();
    std::fs::write(work.join("dump.txt"), "v7").unwrap();
    publisher.commit_and_push(&record(7, "Ivanov", "x"), "master").unwrap();

    let stamp = git(&remote, &["log", "-1", "--format=%ad", "--date=format:%Y-%m-%d %H:%M:%S"]);
    assert_eq!(stamp.trim(), "2020-02-01 10:30:45");
}

#[test]
fn identical_tree_publishes_as_nothing_to_commit() {
    let root = TempDir::new().unwrap();
    let (work, _remote) = seeded_repos(&root);
    let publisher = GitPublisher::new(&work, identities());

    publisher.prepare("master").unwrap();
    let outcome = publisher.commit_and_push(&record(6, "Ivanov", "no changes"), "master").unwrap();
    assert_eq!(outcome, CommitOutcome::NothingToCommit);
}

#[test]
fn unknown_author_falls_back_to_the_default_identity() {
    let root = TempDir::new().unwrap();
    let (work, remote) = seeded_repos(&root);
    let publisher = GitPublisher::new(&work, identities());

    publisher.prepare("master").unwrap();
    std::fs::write(work.join("dump.txt"), "v8").unwrap();
    publisher.commit_and_push(&record(8, "Somebody Else", "y"), "master").unwrap();

    let head = git(&remote, &["log", "-1", "--format=%an|%ae"]);
    assert_eq!(head.trim(), "Sync Bot|sync@example.com");
}

#[test]
fn prepare_syncs_the_working_tree_to_the_remote_tip() {
    let root = TempDir::new().unwrap();
    let (work, remote) = seeded_repos(&root);

    // Another clone pushes a commit behind our back.
    let other = root.path().join("other");
    git(root.path(), &["clone", remote.to_str().unwrap(), other.to_str().unwrap()]);
    git(&other, &["config", "user.name", "Other"]);
    git(&other, &["config", "user.email", "other@example.com"]);
    std::fs::write(other.join("late.txt"), "late").unwrap();
    git(&other, &["add", "--all"]);
    git(&other, &["commit", "-m", "late change"]);
    git(&other, &["push", "origin", "master"]);

    let publisher = GitPublisher::new(&work, identities());
    publisher.prepare("master").unwrap();

    assert!(work.join("late.txt").is_file());
}

#[test]
fn empty_comment_still_produces_a_commit() {
    let root = TempDir::new().unwrap();
    let (work, remote) = seeded_repos(&root);
    let publisher = GitPublisher::new(&work, identities());

    publisher.prepare("master").unwrap();
    std::fs::write(work.join("dump.txt"), "v9").unwrap();
    let outcome = publisher.commit_and_push(&record(9, "Ivanov", ""), "master").unwrap();

    assert_eq!(outcome, CommitOutcome::Created);
    let head = git(&remote, &["log", "-1", "--format=%s"]);
    assert_eq!(head.trim(), "");
}
