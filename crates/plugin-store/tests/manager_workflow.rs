//! Integration tests for the plugin manager workflow
//!
//! These tests drive the public API end to end against a temporary root
//! and check that disk and registry stay consistent.

use plugin_core::{PluginSource, ResourceKind};
use plugin_store::{
    CreatePluginInput, DeleteOptions, ImportPathInput, PluginFilter, PluginManager, PluginPatch,
    PluginStoreError,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Routes store logs to the test output; filter with `RUST_LOG`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn open(temp: &TempDir) -> PluginManager {
    PluginManager::open(temp.path())
        .await
        .expect("failed to open store")
}

/// Tests the full lifecycle: create, list, update, delete
#[tokio::test]
async fn test_plugin_lifecycle_e2e() {
    init_tracing();
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    // 1. Create plugin with one skill
    let created = manager
        .create(
            CreatePluginInput::new("example-plugin")
                .with_description("Example")
                .with_skill("hello.md", "# Hello"),
        )
        .await
        .expect("failed to create plugin");
    assert_eq!(created.id.as_str(), "example-plugin");
    assert_eq!(created.source, PluginSource::LocalCreated);

    // 2. Verify files on disk
    let dir = temp.path().join("plugins/example-plugin");
    assert!(dir.join("plugin.json").is_file());
    assert_eq!(
        fs::read_to_string(dir.join("skills/hello.md")).expect("failed to read skill"),
        "# Hello"
    );

    // 3. Listed exactly once
    let listed = manager.list(&PluginFilter::new()).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], created);

    // 4. Version bump
    let updated = manager
        .update("example-plugin", PluginPatch::new().with_version("1.1.0"))
        .await
        .expect("failed to update plugin");
    assert_eq!(updated.version, "1.1.0");
    assert_eq!(updated.description, "Example");

    // 5. Delete
    manager
        .delete("example-plugin", DeleteOptions::forced())
        .await
        .expect("failed to delete plugin");
    assert!(manager.get("example-plugin").await.is_none());
    assert!(!dir.exists());
    assert!(manager.list(&PluginFilter::new()).await.is_empty());
}

/// Tests that state survives reopening the store
#[tokio::test]
async fn test_reopen_restores_registry() {
    let temp = TempDir::new().expect("failed to create temp dir");

    let before = {
        let manager = open(&temp).await;
        manager
            .create(
                CreatePluginInput::new("persisted")
                    .with_version("2.3.4")
                    .with_tags(["a", "b"])
                    .with_agent("reviewer.md", "agent body")
                    .with_mcp_server("db.json", r#"{"command": "db-server"}"#),
            )
            .await
            .expect("failed to create plugin")
    };

    let manager = open(&temp).await;
    let after = manager.get("persisted").await.expect("plugin not reloaded");
    assert_eq!(after, before);

    assert_eq!(
        manager
            .list_resources("persisted", ResourceKind::Agent)
            .await
            .expect("failed to list agents"),
        vec!["reviewer.md"]
    );
    assert_eq!(
        manager
            .read_resource("persisted", ResourceKind::McpServer, "db.json")
            .await
            .expect("failed to read mcp server"),
        r#"{"command": "db-server"}"#
    );
}

/// Tests id uniqueness and force replacement
#[tokio::test]
async fn test_ids_stay_unique() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    manager
        .create(CreatePluginInput::new("Unique Plugin"))
        .await
        .expect("failed to create plugin");

    let err = manager
        .create(CreatePluginInput::new("unique plugin"))
        .await
        .expect_err("duplicate id accepted");
    assert!(matches!(err, PluginStoreError::AlreadyExists { ref id } if id == "unique-plugin"));
    assert!(err.is_recoverable());

    manager
        .create(CreatePluginInput::new("unique plugin").with_force(true))
        .await
        .expect("force create failed");

    let ids: Vec<String> = manager
        .list(&PluginFilter::new())
        .await
        .into_iter()
        .map(|meta| meta.id.into_inner())
        .collect();
    assert_eq!(ids, vec!["unique-plugin"]);
}

/// Tests that a missing collection reads as empty
#[tokio::test]
async fn test_missing_collection_is_empty() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    manager
        .create(CreatePluginInput::new("bare"))
        .await
        .expect("failed to create plugin");

    for kind in ResourceKind::ALL {
        assert!(
            manager
                .list_resources("bare", kind)
                .await
                .expect("failed to list resources")
                .is_empty(),
            "{kind} collection should be empty"
        );
    }
}

/// Tests filtering by tag, source and free text
#[tokio::test]
async fn test_list_filters() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    manager
        .create(
            CreatePluginInput::new("Lint Helpers")
                .with_description("Formatting and linting")
                .with_tags(["rust", "lint"]),
        )
        .await
        .expect("failed to create plugin");
    manager
        .create(CreatePluginInput::new("Deploy Kit").with_tags(["ops"]))
        .await
        .expect("failed to create plugin");

    let source = TempDir::new().expect("failed to create source dir");
    let imported = source.path().join("imported-one");
    fs::create_dir_all(&imported).expect("failed to create import dir");
    manager
        .import_from_path(ImportPathInput::new(&imported))
        .await
        .expect("failed to import plugin");

    assert_eq!(
        manager
            .list(&PluginFilter::new().with_tag("rust").with_tag("lint"))
            .await
            .len(),
        1
    );
    assert_eq!(
        manager
            .list(&PluginFilter::new().with_query("LINTING"))
            .await
            .len(),
        1
    );
    let imported_only = manager
        .list(&PluginFilter::new().with_source(PluginSource::ImportedPath))
        .await;
    assert_eq!(imported_only.len(), 1);
    assert_eq!(imported_only[0].id.as_str(), "imported-one");
}

/// Tests that concurrent creates of one id yield exactly one winner
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_same_id() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = Arc::new(open(&temp).await);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .create(
                        CreatePluginInput::new("contended")
                            .with_description(format!("writer {i}")),
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => created += 1,
            Err(PluginStoreError::AlreadyExists { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(rejected, 7);
    assert_eq!(manager.list(&PluginFilter::new()).await.len(), 1);
}

/// Tests that concurrent writes to one plugin are all applied
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resource_writes() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = Arc::new(open(&temp).await);
    manager
        .create(CreatePluginInput::new("busy"))
        .await
        .expect("failed to create plugin");

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .write_resource(
                        "busy",
                        ResourceKind::Command,
                        &format!("cmd-{i:02}.md"),
                        &format!("command {i}"),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle
            .await
            .expect("task panicked")
            .expect("write failed");
    }

    let names = manager
        .list_resources("busy", ResourceKind::Command)
        .await
        .expect("failed to list commands");
    assert_eq!(names.len(), 10);
    assert_eq!(names[0], "cmd-00.md");
    assert!(!manager.locks().is_locked("busy"));

    let leftovers: Vec<_> = fs::read_dir(temp.path().join("plugins/busy/commands"))
        .expect("failed to read commands dir")
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind");
}

/// Tests that reload agrees with what the manager wrote
#[tokio::test]
async fn test_reload_matches_disk() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    for name in ["one", "two", "three"] {
        manager
            .create(CreatePluginInput::new(name))
            .await
            .expect("failed to create plugin");
    }
    manager
        .delete("two", DeleteOptions::default())
        .await
        .expect("failed to delete plugin");

    let before = manager.snapshot().await;
    assert_eq!(manager.reload().await.expect("reload failed"), 2);
    let after = manager.snapshot().await;

    let mut before_ids: Vec<_> = before.plugins.iter().map(|m| m.id.clone()).collect();
    let mut after_ids: Vec<_> = after.plugins.iter().map(|m| m.id.clone()).collect();
    before_ids.sort();
    after_ids.sort();
    assert_eq!(before_ids, after_ids);
}

/// Tests copying a local plugin directory into the store
#[tokio::test]
async fn test_import_from_path_copies_tree() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    let source = TempDir::new().expect("failed to create source dir");
    let plugin = source.path().join("team-tools");
    fs::create_dir_all(plugin.join("skills/nested")).expect("failed to create dirs");
    fs::write(
        plugin.join("plugin.json"),
        r#"{"id": "team-tools", "name": "Team Tools", "description": "Shared", "version": "0.4.0", "tags": ["team"]}"#,
    )
    .expect("failed to write manifest");
    fs::write(plugin.join("skills/review.md"), "review").expect("failed to write skill");
    fs::write(plugin.join("skills/nested/extra.md"), "extra").expect("failed to write file");
    fs::write(plugin.join("README.md"), "readme").expect("failed to write readme");

    let meta = manager
        .import_from_path(ImportPathInput::new(&plugin))
        .await
        .expect("failed to import");

    assert_eq!(meta.id.as_str(), "team-tools");
    assert_eq!(meta.name, "Team Tools");
    assert_eq!(meta.description, "Shared");
    assert_eq!(meta.version, "0.4.0");
    assert_eq!(meta.tags, vec!["team".to_string()]);
    assert_eq!(meta.source, PluginSource::ImportedPath);

    let dest = temp.path().join("plugins/team-tools");
    assert!(dest.join("README.md").is_file());
    assert!(dest.join("skills/nested/extra.md").is_file());
    assert_eq!(
        manager.list_skills("team-tools").await.expect("list failed"),
        vec!["review.md"]
    );

    // Second import collides unless forced
    let err = manager
        .import_from_path(ImportPathInput::new(&plugin))
        .await
        .expect_err("duplicate import accepted");
    assert!(matches!(err, PluginStoreError::AlreadyExists { .. }));

    let renamed = manager
        .import_from_path(ImportPathInput::new(&plugin).with_id("team-tools-copy"))
        .await
        .expect("import under new id failed");
    assert_eq!(renamed.id.as_str(), "team-tools-copy");

    // Imported files are part of the plugin; files added later are not
    assert_eq!(meta.imported_entries, vec!["README.md".to_string()]);
    manager
        .delete("team-tools-copy", DeleteOptions::default())
        .await
        .expect("imported files blocked delete");

    fs::write(dest.join("NOTES.md"), "local notes").expect("failed to write notes");
    let err = manager
        .delete("team-tools", DeleteOptions::default())
        .await
        .expect_err("unmanaged content ignored");
    match err {
        PluginStoreError::UnmanagedContent { entries, .. } => {
            assert_eq!(entries, vec!["NOTES.md".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Tests that a packaged plugin can be deleted without force after import
#[tokio::test]
async fn test_packaged_import_deletes_cleanly() {
    let temp = TempDir::new().expect("failed to create temp dir");
    let manager = open(&temp).await;

    let source = TempDir::new().expect("failed to create source dir");
    let plugin = source.path().join("pkg");
    fs::create_dir_all(plugin.join(".claude-plugin")).expect("failed to create dirs");
    fs::write(
        plugin.join(".claude-plugin/plugin.json"),
        r#"{"name": "pkg", "version": "1.0.0"}"#,
    )
    .expect("failed to write manifest");

    let meta = manager
        .import_from_path(ImportPathInput::new(&plugin))
        .await
        .expect("failed to import");
    assert_eq!(meta.id.as_str(), "pkg");
    assert_eq!(meta.imported_entries, vec![".claude-plugin".to_string()]);

    // The record survives a reopen
    drop(manager);
    let manager = open(&temp).await;
    assert_eq!(
        manager.get("pkg").await.expect("plugin not reloaded").imported_entries,
        vec![".claude-plugin".to_string()]
    );

    manager
        .delete("pkg", DeleteOptions::default())
        .await
        .expect("plain delete of imported plugin failed");
    assert!(manager.get("pkg").await.is_none());
    assert!(!temp.path().join("plugins/pkg").exists());
}
