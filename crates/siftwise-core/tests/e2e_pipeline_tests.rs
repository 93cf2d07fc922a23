use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use siftwise_core::execute::{Journal, JournalStatus};
use siftwise_core::plan::refine::StopReason;
use siftwise_core::state::SiftDir;
use siftwise_core::storage::Database;
use siftwise_core::{Action, AppConfig, DraftOptions, Error, SiftEngine};

fn count_files_recursive(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files_recursive(&path);
            } else if path.is_file() {
                count += 1;
            }
        }
    }
    count
}

/// Layout:
///   inbox/
///     alpha.txt
///     beta.txt
///     a/doc.txt
///     b/doc.txt
///     photos/holiday.png   (PNG magic bytes)
fn create_inbox(root: &Path) -> PathBuf {
    let inbox = root.join("inbox");
    fs::create_dir_all(inbox.join("a")).unwrap();
    fs::create_dir_all(inbox.join("b")).unwrap();
    fs::create_dir_all(inbox.join("photos")).unwrap();

    fs::write(inbox.join("alpha.txt"), "first loose text file").unwrap();
    fs::write(inbox.join("beta.txt"), "second loose text file").unwrap();
    fs::write(inbox.join("a/doc.txt"), "doc in folder a").unwrap();
    fs::write(inbox.join("b/doc.txt"), "doc in folder b").unwrap();

    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend_from_slice(&[0u8; 64]);
    fs::write(inbox.join("photos/holiday.png"), png).unwrap();

    fs::canonicalize(inbox).unwrap()
}

fn flat_inbox(root: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let inbox = root.join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    for (name, content) in files {
        fs::write(inbox.join(name), content).unwrap();
    }
    fs::canonicalize(inbox).unwrap()
}

fn draft(engine: &SiftEngine, inbox: &Path, out: &Path) -> PathBuf {
    engine
        .draft_structure(inbox, out, &DraftOptions::default())
        .unwrap();
    fs::canonicalize(out).unwrap()
}

#[test]
fn test_draft_writes_every_artifact() {
    let dir = tempdir().unwrap();
    let inbox = create_inbox(dir.path());
    let out = dir.path().join("out");
    let engine = SiftEngine::new(AppConfig::default());

    let result = engine
        .draft_structure(&inbox, &out, &DraftOptions::default())
        .unwrap();
    assert_eq!(result.files_scanned, 5);
    assert_eq!(result.entries, 5);
    assert_eq!(result.unscannable, 0);

    let sift = out.join(".sift");
    for name in ["TreePlan.json", "Mapping.csv", "PreviewCounts.csv", "Run.json", "sift.db"] {
        assert!(sift.join(name).is_file(), "{} missing", name);
    }

    // planning never touches the source tree
    assert_eq!(count_files_recursive(&inbox), 5);
    assert!(!out.join("Documents").exists());

    let db = Database::open(&sift.join("sift.db")).unwrap();
    assert_eq!(db.history_count().unwrap(), 5);
}

#[test]
fn test_draft_is_deterministic() {
    let dir = tempdir().unwrap();
    let inbox = create_inbox(dir.path());
    let out = dir.path().join("out");
    let engine = SiftEngine::new(AppConfig::default());

    let out = draft(&engine, &inbox, &out);
    let mapping = fs::read(out.join(".sift/Mapping.csv")).unwrap();
    let tree = fs::read(out.join(".sift/TreePlan.json")).unwrap();
    let preview = fs::read(out.join(".sift/PreviewCounts.csv")).unwrap();

    draft(&engine, &inbox, &out);
    assert_eq!(fs::read(out.join(".sift/Mapping.csv")).unwrap(), mapping);
    assert_eq!(fs::read(out.join(".sift/TreePlan.json")).unwrap(), tree);
    assert_eq!(fs::read(out.join(".sift/PreviewCounts.csv")).unwrap(), preview);
}

#[test]
fn test_same_name_targets_get_numbered() {
    let dir = tempdir().unwrap();
    let inbox = create_inbox(dir.path());
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let mapping = SiftDir::new(&out).read_mapping().unwrap();
    let a = mapping.get(&inbox.join("a/doc.txt")).unwrap();
    let b = mapping.get(&inbox.join("b/doc.txt")).unwrap();
    assert_eq!(a.target_path, Some(out.join("Documents/doc.txt")));
    assert_eq!(b.target_path, Some(out.join("Documents/doc (1).txt")));

    let png = mapping.get(&inbox.join("photos/holiday.png")).unwrap();
    assert_eq!(png.label, "images");
    assert_eq!(png.action, Action::Move);
}

#[test]
fn test_collisions_over_cap_are_reported() {
    let dir = tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    for folder in ["a", "b", "c"] {
        fs::create_dir_all(inbox.join(folder)).unwrap();
        fs::write(inbox.join(folder).join("doc.txt"), folder).unwrap();
    }
    let inbox = fs::canonicalize(inbox).unwrap();
    let out = dir.path().join("out");

    let mut config = AppConfig::default();
    config.planner.collision_cap = 1;
    let err = SiftEngine::new(config)
        .draft_structure(&inbox, &out, &DraftOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::PlanCollision { count: 1 }));
    assert_eq!(err.exit_code(), 4);

    // artifacts are still written so the collision can be reviewed
    let mapping = SiftDir::new(&out).read_mapping().unwrap();
    let c = mapping.get(&inbox.join("c/doc.txt")).unwrap();
    assert!(c.is_residual);
    assert_eq!(c.action, Action::Skip);
}

#[test]
fn test_execute_is_idempotent_and_undo_restores() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(
        dir.path(),
        &[("alpha.txt", b"first loose text file"), ("beta.txt", b"second loose text file")],
    );
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let first = engine.execute(&out, false).unwrap();
    assert_eq!(first.applied, 2);
    assert!(first.failed.is_empty());
    assert!(!inbox.join("alpha.txt").exists());
    assert_eq!(
        fs::read_to_string(out.join("Documents/alpha.txt")).unwrap(),
        "first loose text file"
    );

    let second = engine.execute(&out, false).unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.already_applied, 2);
    assert_eq!(
        engine.review_structure(&out).journal.get(&JournalStatus::Applied),
        Some(&2)
    );

    let journal = Journal::open(&out.join(".sift/sift.db")).unwrap();
    assert_eq!(journal.load().unwrap().row_count(), 4);

    let undo = engine.undo(&out).unwrap();
    assert_eq!(undo.rolled_back, 2);
    assert!(undo.conflicts.is_empty());
    assert_eq!(
        fs::read_to_string(inbox.join("alpha.txt")).unwrap(),
        "first loose text file"
    );
    assert!(inbox.join("beta.txt").exists());
    assert!(!out.join("Documents/alpha.txt").exists());

    let state = journal.load().unwrap();
    assert_eq!(state.count_with_status(JournalStatus::RolledBack), 2);
    assert_eq!(state.count_with_status(JournalStatus::Planned), 0);
}

#[test]
fn test_what_if_touches_nothing() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(dir.path(), &[("alpha.txt", b"first loose text file")]);
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let report = engine.execute(&out, true).unwrap();
    assert!(report.what_if);
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].dest, out.join("Documents/alpha.txt"));
    assert!(inbox.join("alpha.txt").exists());
    assert!(!out.join("Documents").exists());

    let journal = Journal::open(&out.join(".sift/sift.db")).unwrap();
    assert_eq!(journal.load().unwrap().row_count(), 0);
}

#[test]
fn test_copy_mode_leaves_sources() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(dir.path(), &[("alpha.txt", b"first loose text file")]);
    let mut config = AppConfig::default();
    config.planner.transfer = siftwise_core::config::TransferMode::Copy;
    let engine = SiftEngine::new(config);
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let report = engine.execute(&out, false).unwrap();
    assert_eq!(report.applied, 1);
    assert!(inbox.join("alpha.txt").exists());
    assert!(out.join("Documents/alpha.txt").exists());

    engine.undo(&out).unwrap();
    assert!(inbox.join("alpha.txt").exists());
    assert!(!out.join("Documents/alpha.txt").exists());
}

#[test]
fn test_promote_suggested_entries() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(
        dir.path(),
        &[("alpha.txt", b"first loose text file"), ("placeholder", b"")],
    );
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));
    let sift = SiftDir::new(&out);

    let before = sift.read_mapping().unwrap();
    let placeholder = before.get(&inbox.join("placeholder")).unwrap();
    assert_eq!(placeholder.label, "empty_files");
    assert_eq!(placeholder.action, Action::Suggest);
    assert!(!placeholder.is_residual);

    assert_eq!(engine.promote_suggested(&out, Some("documents")).unwrap(), 0);
    assert_eq!(engine.promote_suggested(&out, Some("empty_files")).unwrap(), 1);

    let after = sift.read_mapping().unwrap();
    assert_eq!(after.get(&inbox.join("placeholder")).unwrap().action, Action::Move);

    let report = engine.execute(&out, false).unwrap();
    assert_eq!(report.applied, 2);
    assert!(out.join("EmptyFiles/placeholder").is_file());
}

#[test]
fn test_review_after_draft() {
    let dir = tempdir().unwrap();
    let inbox = create_inbox(dir.path());
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let review = engine.review_structure(&out);
    assert!(review.warnings.is_empty(), "{:?}", review.warnings);
    let outline = review.outline.unwrap();
    assert!(outline.contains("Documents"));
    assert_eq!(review.run.unwrap().scan_root, inbox);
    assert_eq!(review.totals.get(&Action::Move), Some(&5));

    fs::remove_file(out.join(".sift/TreePlan.json")).unwrap();
    let degraded = engine.review_structure(&out);
    assert!(degraded.outline.is_none());
    assert_eq!(degraded.warnings.len(), 1);
    assert!(!degraded.preview.is_empty());
}

#[test]
fn test_refinement_resolves_from_context() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(
        dir.path(),
        &[("mystery.txt", b"some readable text"), ("mystery.qqq", b"unknown payload")],
    );
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));
    let sift = SiftDir::new(&out);

    let drafted = sift.read_mapping().unwrap();
    assert_eq!(drafted.residual_count(), 1);
    assert!(drafted.get(&inbox.join("mystery.qqq")).unwrap().is_residual);

    let summary = engine.refine_residuals(&out, None).unwrap();
    assert_eq!(summary.initial_residuals, 1);
    assert_eq!(summary.final_residuals, 0);
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.passes.len(), 1);

    let refined = sift.read_mapping().unwrap();
    let entry = refined.get(&inbox.join("mystery.qqq")).unwrap();
    assert_eq!(entry.label, "documents");
    assert_eq!(entry.pass_id, 2);
    assert!(!entry.is_residual);
    // resolved entries are never touched
    assert_eq!(refined.get(&inbox.join("mystery.txt")), drafted.get(&inbox.join("mystery.txt")));

    assert_eq!(sift.read_refine_summary().unwrap(), summary);
    assert_eq!(sift.read_run().unwrap().pass_id, 2);
}

#[test]
fn test_refinement_stops_at_fixed_point() {
    let dir = tempdir().unwrap();
    let inbox = flat_inbox(dir.path(), &[("zzz.qqq", b"unknown payload")]);
    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let summary = engine.refine_residuals(&out, Some(5)).unwrap();
    assert_eq!(summary.stop_reason, StopReason::FixedPoint);
    assert_eq!(summary.passes.len(), 1);
    assert_eq!(summary.final_residuals, summary.initial_residuals);
}

#[test]
fn test_refinement_requires_a_draft() {
    let dir = tempdir().unwrap();
    let err = SiftEngine::new(AppConfig::default())
        .refine_residuals(dir.path(), None)
        .unwrap_err();
    assert!(matches!(err, Error::MissingArtifact(_)));
}

#[test]
fn test_refinement_never_forms_unit_over_resolved_siblings() {
    let dir = tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(inbox.join("bundle")).unwrap();
    fs::write(inbox.join("bundle/widget.py"), "print('widget')").unwrap();
    fs::write(inbox.join("bundle/widget.qqq"), "opaque").unwrap();
    fs::write(inbox.join("bundle/widget.zzz"), "opaque too").unwrap();
    let inbox = fs::canonicalize(inbox).unwrap();

    let mut config = AppConfig::default();
    config.cohesion.min_evidence = 0.1;
    let engine = SiftEngine::new(config);
    let out = draft(&engine, &inbox, &dir.path().join("out"));
    let sift = SiftDir::new(&out);

    let drafted = sift.read_mapping().unwrap();
    assert_eq!(drafted.residual_count(), 2);
    assert_eq!(drafted.get(&inbox.join("bundle/widget.py")).unwrap().label, "code");

    engine.refine_residuals(&out, None).unwrap();
    let refined = sift.read_mapping().unwrap();
    for name in ["bundle/widget.qqq", "bundle/widget.zzz"] {
        let entry = refined.get(&inbox.join(name)).unwrap();
        assert!(!entry.reason.starts_with("intact unit"), "{}: {}", name, entry.reason);
        assert!(entry.confidence < 0.85, "{}: {}", name, entry.confidence);
        assert_ne!(entry.action, Action::Move);
    }
    assert_eq!(
        refined.get(&inbox.join("bundle/widget.py")),
        drafted.get(&inbox.join("bundle/widget.py"))
    );
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_becomes_unscannable_residual() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let inbox = flat_inbox(
        dir.path(),
        &[("alpha.txt", b"first loose text file"), ("locked.pdf", b"%PDF-1.7")],
    );
    let locked = inbox.join("locked.pdf");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // permissions are not enforced for this user
        return;
    }

    let engine = SiftEngine::new(AppConfig::default());
    let result = engine
        .draft_structure(&inbox, &dir.path().join("out"), &DraftOptions::default())
        .unwrap();
    assert_eq!(result.unscannable, 1);
    assert_eq!(result.entries, 2);

    let out = fs::canonicalize(dir.path().join("out")).unwrap();
    let mapping = SiftDir::new(&out).read_mapping().unwrap();
    let entry = mapping.get(&locked).unwrap();
    assert!(entry.is_residual);
    assert_eq!(entry.action, Action::Skip);
    assert!(entry.target_path.is_none());
    assert!(entry.reason.starts_with("unscannable:"), "{}", entry.reason);
    assert!(!mapping.get(&inbox.join("alpha.txt")).unwrap().is_residual);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn test_residuals_shrink_monotonically_across_passes() {
    let dir = tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(inbox.join("invoices/inner")).unwrap();
    fs::write(inbox.join("invoices/y.qqq"), "opaque").unwrap();
    fs::write(inbox.join("invoices/inner/x.qqq"), "opaque too").unwrap();
    let inbox = fs::canonicalize(inbox).unwrap();

    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));
    let sift = SiftDir::new(&out);
    assert_eq!(sift.read_mapping().unwrap().residual_count(), 2);

    // each pass reads one more parent folder: y.qqq resolves first, x.qqq next
    let summary = engine.refine_residuals(&out, None).unwrap();
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.passes.len(), 2);
    let after: Vec<usize> = summary.passes.iter().map(|p| p.residual_after).collect();
    assert_eq!(after, vec![1, 0]);
    for (pass, next) in summary.passes.iter().zip(summary.passes.iter().skip(1)) {
        assert!(pass.residual_after <= pass.residual_before);
        assert_eq!(pass.residual_after, next.residual_before);
    }

    let refined = sift.read_mapping().unwrap();
    let y = refined.get(&inbox.join("invoices/y.qqq")).unwrap();
    let x = refined.get(&inbox.join("invoices/inner/x.qqq")).unwrap();
    assert_eq!((y.label.as_str(), y.pass_id), ("finance", 2));
    assert_eq!((x.label.as_str(), x.pass_id), ("finance", 3));

    // y.qqq was never re-planned once resolved
    let db = Database::open(&out.join(".sift/sift.db")).unwrap();
    let y_history = db
        .history_for(&inbox.join("invoices/y.qqq").to_string_lossy())
        .unwrap();
    assert!(y_history.iter().all(|h| h.pass_id <= 2));
}

#[test]
fn test_review_suggests_entity_folders() {
    let dir = tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(inbox.join("Chase")).unwrap();
    for name in ["card_2023.pdf", "card_2024.pdf", "mortgage.pdf"] {
        fs::write(inbox.join("Chase").join(name), "%PDF-1.7").unwrap();
    }
    fs::write(inbox.join("irs_letter.pdf"), "%PDF-1.7").unwrap();
    let inbox = fs::canonicalize(inbox).unwrap();

    let engine = SiftEngine::new(AppConfig::default());
    let out = draft(&engine, &inbox, &dir.path().join("out"));

    let review = engine.review_structure(&out);
    assert_eq!(review.entity_folders.len(), 1);
    assert_eq!(review.entity_folders[0].name, "Chase");
    assert_eq!(review.entity_folders[0].files, 3);
}
