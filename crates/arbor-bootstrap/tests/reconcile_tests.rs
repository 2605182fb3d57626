//! Reconciliation lifecycle integration tests
//!
//! Tests full bootstrap runs against unpacked extensions including:
//! - Idempotence of repeated runs
//! - Version-driven reload and its blockers
//! - Downstream cascades
//! - Cleanup of records whose extension disappeared
//! - Dry runs
//! - Fatal store unavailability

mod common;

use arbor_core::types::Status;
use arbor_core::HierarchicalConfigLoader;
use arbor_store::Property;
use camino::Utf8PathBuf;
use common::*;
use serial_test::serial;

fn seed(version: &str) -> DescriptorBuilder {
    DescriptorBuilder::new().item(
        ItemBuilder::content(
            "seed-content",
            30000,
            CONTENT_ROOT,
            "name: docs\nproperties:\n  title: Docs\n",
        )
        .version(version)
        .reload(),
    )
}

#[test]
fn test_second_run_applies_nothing() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "demo",
        &seed("1.0.0").item(ItemBuilder::new("demo-ns", 100).namespace("demo", "http://example.org/demo/1.0")),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let first = engine.run(&mut session).unwrap();
    assert_eq!(first.applied, vec!["demo-ns", "seed-content"]);
    assert!(first.failed.is_empty());
    assert_eq!(first.pending_after, 0);

    let second = engine.run(&mut session).unwrap();
    assert!(second.applied.is_empty());
    assert!(second.swept.is_empty());
    assert_eq!(second.touched, 2);
    assert_status(&session, "seed-content", Status::Done);
    assert_eq!(session.children(CONTENT_ROOT).unwrap().len(), 1);
}

#[test]
fn test_newer_item_version_is_reapplied() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.add_extension(
        "demo",
        &DescriptorBuilder::new().item(
            ItemBuilder::content(
                "seed-content",
                30000,
                CONTENT_ROOT,
                "name: docs\nproperties:\n  title: Docs v2\n",
            )
            .version("1.1.0")
            .reload(),
        ),
    );
    let summary = engine.run(&mut session).unwrap();

    assert_eq!(summary.applied, vec!["seed-content"]);
    assert_eq!(record(&session, "seed-content").item_version.as_deref(), Some("1.1.0"));
    assert_eq!(
        session.property_at("/content/docs/title").unwrap().strings(),
        vec!["Docs v2"]
    );
    assert_eq!(session.nodes_at("/content/docs").unwrap().len(), 1);
}

#[test]
fn test_older_item_version_is_not_reapplied() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.add_extension("demo", &seed("0.9.0"));
    let summary = engine.run(&mut session).unwrap();

    assert!(summary.applied.is_empty());
    assert_eq!(record(&session, "seed-content").item_version.as_deref(), Some("1.0.0"));
}

#[test]
fn test_disabled_record_is_never_applied() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "demo",
        &DescriptorBuilder::new().item(
            ItemBuilder::content("seed-content", 1, CONTENT_ROOT, "name: docs\n")
                .version("1.0")
                .reload()
                .disabled(),
        ),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let first = engine.run(&mut session).unwrap();
    assert!(first.applied.is_empty());
    assert_status(&session, "seed-content", Status::Disabled);

    bed.add_extension(
        "demo",
        &DescriptorBuilder::new().item(
            ItemBuilder::content("seed-content", 1, CONTENT_ROOT, "name: docs\n")
                .version("9.0")
                .reload(),
        ),
    );
    let second = engine.run(&mut session).unwrap();
    assert!(second.applied.is_empty());
    assert_status(&session, "seed-content", Status::Disabled);
    assert!(!session.node_exists("/content/docs").unwrap());
}

#[test]
fn test_disabling_an_applied_record_blocks_reload() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.tree()
        .set_status(&mut session, "seed-content", Status::Disabled)
        .unwrap();
    session.save().unwrap();

    bed.add_extension("demo", &seed("2.0.0"));
    let summary = engine.run(&mut session).unwrap();
    assert!(summary.applied.is_empty());
    assert_status(&session, "seed-content", Status::Disabled);
    assert_eq!(record(&session, "seed-content").item_version.as_deref(), Some("1.0.0"));
}

#[test]
fn test_combine_directive_never_reloads() {
    let bed = TestBed::with_content_root();
    let combine = |version: &str| {
        DescriptorBuilder::new().item(
            ItemBuilder::content("merged", 1, CONTENT_ROOT, "name: docs\n")
                .version(version)
                .reload()
                .delta_directive("combine"),
        )
    };
    bed.add_extension("demo", &combine("1.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    assert_eq!(engine.run(&mut session).unwrap().applied, vec!["merged"]);

    bed.add_extension("demo", &combine("2.0"));
    let summary = engine.run(&mut session).unwrap();
    assert!(summary.applied.is_empty());
    assert_eq!(record(&session, "merged").item_version.as_deref(), Some("1.0"));
}

#[test]
fn test_merge_hint_in_content_header_blocks_reload() {
    let bed = TestBed::with_content_root();
    let overlay = |version: &str| {
        DescriptorBuilder::new().item(
            ItemBuilder::content("overlaid", 1, CONTENT_ROOT, "name: docs\nmerge: overlay\n")
                .version(version)
                .reload(),
        )
    };
    bed.add_extension("demo", &overlay("1.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    let stored = record(&session, "overlaid");
    assert_eq!(stored.context_node_name.as_deref(), Some("docs"));
    assert_eq!(stored.delta_directive.map(|d| d.to_string()).as_deref(), Some("overlay"));

    bed.add_extension("demo", &overlay("2.0"));
    assert!(engine.run(&mut session).unwrap().applied.is_empty());
}

#[test]
fn test_reload_cascades_to_records_beneath() {
    let bed = TestBed::new();
    let layout = |parent_version: &str| {
        DescriptorBuilder::new()
            .item(ItemBuilder::content("x", 10, "/", "name: x\n"))
            .item(
                ItemBuilder::content("parent", 20, "/", "name: a\n")
                    .version(parent_version)
                    .reload(),
            )
            .item(ItemBuilder::content("child", 30, "/a", "name: b\n"))
            .item(ItemBuilder::content("other", 40, "/x", "name: a\n"))
    };
    bed.add_extension("layout", &layout("1.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    let first = engine.run(&mut session).unwrap();
    assert_eq!(first.applied, vec!["x", "parent", "child", "other"]);

    bed.add_extension("layout", &layout("1.1"));
    let second = engine.run(&mut session).unwrap();

    assert_eq!(second.applied, vec!["parent", "child"]);
    assert!(session.node_exists("/a/b").unwrap());
    assert!(session.node_exists("/x/a").unwrap());
    assert_status(&session, "other", Status::Done);
}

#[test]
fn test_rolled_back_reload_does_not_cascade() {
    let bed = TestBed::new();
    let layout = |parent_version: &str| {
        DescriptorBuilder::new()
            .item(
                ItemBuilder::content("parent", 20, "/", "name: a\n")
                    .version(parent_version)
                    .reload(),
            )
            .item(ItemBuilder::content("child", 30, "/a", "name: b\n"))
            .item(ItemBuilder::content("late", 40, "/", "name: late\n"))
    };
    bed.add_extension("layout", &layout("1.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    // An unreadable record makes integration of the extension fail after
    // the parent reload was staged
    let late = format!("{}/late", RECORD_ROOT);
    session
        .set_property(&late, "arbor:status", Property::single("bogus"))
        .unwrap();
    session.save().unwrap();

    bed.add_extension("layout", &layout("1.1"));
    let second = engine.run(&mut session).unwrap();

    assert_eq!(second.failed_extensions.len(), 1);
    assert!(second.applied.is_empty());
    assert_eq!(record(&session, "parent").item_version.as_deref(), Some("1.0"));
    assert_status(&session, "child", Status::Done);
    assert_eq!(session.nodes_at("/a/b").unwrap().len(), 1);
}

#[test]
fn test_root_delete_is_reported_and_store_untouched() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "wipe",
        &DescriptorBuilder::new().item(ItemBuilder::new("wipe-all", 1).content_delete("/")),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let summary = engine.run(&mut session).unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].name, "wipe-all");
    assert!(session.node_exists(CONTENT_ROOT).unwrap());
    assert_status(&session, "wipe-all", Status::Pending);
    assert!(record(&session, "wipe-all").error_message.is_some());
    assert_eq!(summary.pending_after, 1);
}

#[test]
fn test_dry_run_leaves_records_untouched() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0.0"));
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.add_extension(
        "extra",
        &DescriptorBuilder::new()
            .item(ItemBuilder::content("extra-content", 40000, CONTENT_ROOT, "name: extra\n"))
            .item(ItemBuilder::new("extra-ns", 50).namespace("extra", "http://example.org/extra/1.0")),
    );
    bed.add_extension("demo", &seed("2.0.0"));
    let before = statuses(&session);

    let summary = engine.dry_run(&mut session).unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.applied, vec!["extra-ns", "seed-content", "extra-content"]);

    assert_eq!(statuses(&session), before);
    assert_eq!(statuses(&bed.session()), before);
    assert!(!session.node_exists("/content/extra").unwrap());
    assert!(session.namespace_uri("extra").unwrap().is_none());
    assert_eq!(record(&session, "seed-content").item_version.as_deref(), Some("1.0.0"));
    let scratch = session
        .children("/")
        .unwrap()
        .iter()
        .filter(|n| n.name().starts_with("arbor:dryrun"))
        .count();
    assert_eq!(scratch, 0);
}

#[test]
fn test_dry_run_refuses_what_a_real_run_refuses() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "wipe",
        &DescriptorBuilder::new()
            .item(ItemBuilder::new("wipe-records", 1).content_delete("/arbor:configuration"))
            .item(ItemBuilder::content("docs", 2, CONTENT_ROOT, "name: docs\n")),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let dry = engine.dry_run(&mut session).unwrap();
    let real = engine.run(&mut session).unwrap();

    assert_eq!(dry.applied, real.applied);
    assert_eq!(dry.applied, vec!["docs"]);
    let names = |summary: &arbor_bootstrap::RunSummary| {
        summary.failed.iter().map(|f| f.name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&dry), vec!["wipe-records"]);
    assert_eq!(names(&real), vec!["wipe-records"]);
    assert!(session.node_exists(RECORD_ROOT).unwrap());
}

#[test]
fn test_dry_run_on_empty_store_leaves_no_records() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0.0"));
    let mut session = bed.session();

    let summary = bed.engine().dry_run(&mut session).unwrap();
    assert_eq!(summary.applied, vec!["seed-content"]);
    assert!(!session.node_exists(RECORD_ROOT).unwrap());
    assert!(!session.node_exists("/content/docs").unwrap());
}

#[test]
fn test_same_operation_from_two_extensions_converges_on_newest() {
    let bed = TestBed::with_content_root();
    let declare = |module_version: &str| {
        DescriptorBuilder::new().module_version(module_version).item(
            ItemBuilder::content("seed-content", 30000, CONTENT_ROOT, "name: docs\n").reload(),
        )
    };
    bed.add_extension("ext-a", &declare("1.0"));
    bed.add_extension("ext-b", &declare("2.0"));
    let engine = bed.engine();
    let mut session = bed.session();

    engine.run(&mut session).unwrap();
    engine.run(&mut session).unwrap();

    assert_eq!(record_names(&session), vec!["seed-content"]);
    let stored = record(&session, "seed-content");
    assert_eq!(stored.status, Status::Done);
    assert_eq!(stored.module_version.as_deref(), Some("2.0"));
    let tags = bed.tree().version_tags(&session).unwrap();
    assert_eq!(tags, vec!["1.0", "2.0"]);
}

#[test]
fn test_removed_extension_records_are_swept() {
    let bed = TestBed::with_content_root();
    bed.add_extension("keep", &seed("1.0"));
    bed.add_extension(
        "gone",
        &DescriptorBuilder::new().item(ItemBuilder::new("gone-ns", 1).namespace("gone", "http://example.org/gone/1.0")),
    );
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();
    assert_eq!(record_names(&session).len(), 2);

    bed.remove_extension("gone");
    let summary = engine.run(&mut session).unwrap();
    assert_eq!(summary.swept, vec!["gone-ns"]);
    assert_eq!(record_names(&session), vec!["seed-content"]);
    assert_eq!(record_names(&bed.session()), vec!["seed-content"]);
}

#[test]
fn test_cascaded_orphan_is_still_swept() {
    let bed = TestBed::new();
    let parent = |version: &str| {
        DescriptorBuilder::new().item(
            ItemBuilder::content("parent", 20, "/", "name: a\n")
                .version(version)
                .reload(),
        )
    };
    bed.add_extension("keep", &parent("1.0"));
    bed.add_extension(
        "gone",
        &DescriptorBuilder::new().item(ItemBuilder::content("child", 30, "/a", "name: b\n")),
    );
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.remove_extension("gone");
    bed.add_extension("keep", &parent("1.1"));
    let summary = engine.run(&mut session).unwrap();

    assert_eq!(summary.applied, vec!["parent", "child"]);
    assert_eq!(summary.swept, vec!["child"]);
    assert_eq!(record_names(&session), vec!["parent"]);
}

#[test]
fn test_cleanup_skipped_when_an_extension_fails_to_load() {
    let bed = TestBed::with_content_root();
    bed.add_extension("good", &seed("1.0"));
    bed.add_extension(
        "flaky",
        &DescriptorBuilder::new().item(ItemBuilder::new("flaky-ns", 1).namespace("flaky", "http://example.org/flaky/1.0")),
    );
    let engine = bed.engine();
    let mut session = bed.session();
    engine.run(&mut session).unwrap();

    bed.add_raw_extension("flaky", "items: [this is: not valid");
    let summary = engine.run(&mut session).unwrap();
    assert_eq!(summary.failed_extensions.len(), 1);
    assert!(summary.swept.is_empty());
    assert!(record_names(&session).contains(&"flaky-ns".to_string()));
}

#[test]
fn test_failed_operation_is_retried_next_run() {
    let bed = TestBed::new();
    bed.add_extension(
        "demo",
        &DescriptorBuilder::new().item(ItemBuilder::content("late", 1, CONTENT_ROOT, "name: docs\n")),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let first = engine.run(&mut session).unwrap();
    assert_eq!(first.failed.len(), 1);
    assert_status(&session, "late", Status::Pending);

    session.add_node("/", "content", None).unwrap();
    session.save().unwrap();

    let second = engine.run(&mut session).unwrap();
    assert_eq!(second.applied, vec!["late"]);
    assert_status(&session, "late", Status::Done);
    assert!(record(&session, "late").error_message.is_none());
}

#[test]
fn test_one_failure_does_not_stop_the_run() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "mixed",
        &DescriptorBuilder::new()
            .item(ItemBuilder::content("broken", 1, "/missing", "name: docs\n"))
            .item(ItemBuilder::content("fine", 2, CONTENT_ROOT, "name: docs\n")),
    );
    let mut session = bed.session();

    let summary = bed.engine().run(&mut session).unwrap();
    assert_eq!(summary.applied, vec!["fine"]);
    assert_eq!(summary.failed[0].name, "broken");
    assert!(session.node_exists("/content/docs").unwrap());
}

#[test]
fn test_closed_session_aborts_the_run() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0"));
    let mut session = bed.session();
    session.logout();

    let err = bed.engine().run(&mut session).unwrap_err();
    assert!(err.is_fatal());
    assert!(!bed.session().node_exists(RECORD_ROOT).unwrap());
}

#[test]
fn test_process_named_items_only() {
    let bed = TestBed::with_content_root();
    bed.add_extension(
        "demo",
        &DescriptorBuilder::new()
            .item(ItemBuilder::content("one", 1, CONTENT_ROOT, "name: one\n"))
            .item(ItemBuilder::content("two", 2, CONTENT_ROOT, "name: two\n")),
    );
    let engine = bed.engine();
    let mut session = bed.session();

    let touched = engine.load_extensions(&mut session).unwrap();
    assert_eq!(touched, vec!["one", "two"]);

    let report = engine
        .process_initialize_items(&mut session, Some(&["two".to_string()]))
        .unwrap();
    assert_eq!(report.applied, vec!["two"]);
    assert_status(&session, "one", Status::Pending);
    assert_status(&session, "two", Status::Done);

    let rest = engine.process_initialize_items(&mut session, None).unwrap();
    assert_eq!(rest.applied, vec!["one"]);
}

#[test]
fn test_load_single_extension() {
    let bed = TestBed::with_content_root();
    let dir = bed.add_extension("demo", &seed("1.0"));
    let origin = url::Url::from_file_path(dir.join(DESCRIPTOR_NAME)).unwrap();
    let mut session = bed.session();

    let touched = bed.engine().load_extension(&mut session, origin.as_str()).unwrap();
    assert_eq!(touched, vec!["seed-content"]);
    let stored = record(&session, "seed-content");
    assert_eq!(stored.origin_url.as_deref(), Some(origin.as_str()));
    assert_eq!(stored.context_node_name.as_deref(), Some("docs"));
}

#[test]
#[serial]
fn test_engine_from_hierarchical_config() {
    let bed = TestBed::with_content_root();
    bed.add_extension("demo", &seed("1.0"));
    let config_dir = bed.root().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("bootstrap.yaml"), "commit-grouping: per-operation\n").unwrap();

    std::env::set_var(
        "ARBOR_SEARCH_PATH",
        format!("{}/extensions/*", bed.root().display()),
    );
    let loader = HierarchicalConfigLoader::with_dir(Utf8PathBuf::from_path_buf(config_dir).unwrap());
    let config = loader.load_bootstrap_config();
    std::env::remove_var("ARBOR_SEARCH_PATH");
    let config = config.unwrap();

    assert_eq!(config.record_root, RECORD_ROOT);
    let engine = arbor_bootstrap::ReconciliationEngine::new(config);
    let mut session = bed.session();
    let summary = engine.run(&mut session).unwrap();
    assert_eq!(summary.applied, vec!["seed-content"]);
}
