use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use agent_provider::RunMessage;
use pretty_assertions::assert_eq;
use serde_json::json;
use session_store::{
    CompactOptions, Entry, EntryKind, FixedClock, IdSource, LeafState, NewMessage, Role,
    SessionHeader, SessionStore, SessionStoreError, StoreConfig, SummaryFormat, TurnMarker,
    CURRENT_VERSION,
};
use tempfile::TempDir;

fn scratch_store() -> (TempDir, SessionStore) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut store = SessionStore::open(dir.path().join("session.jsonl"))
        .with_clock(FixedClock::epoch())
        .with_id_source(IdSource::sequential("e"));
    store.ensure(dir.path()).expect("ensure should write a header");
    (dir, store)
}

fn write_session_file(lines: &[String]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("session.jsonl");
    let mut file = File::create(&path).expect("session file should be created");

    for line in lines {
        writeln!(file, "{line}").expect("line should be written");
    }

    (dir, path)
}

fn header_line(version: u32) -> String {
    json!({
        "type": "session",
        "version": version,
        "id": "session-1",
        "timestamp": "2026-02-14T00:00:00Z",
        "cwd": "/work",
    })
    .to_string()
}

fn user(store: &mut SessionStore, text: &str) -> String {
    store
        .append_message(Role::User, text)
        .expect("append should succeed")
}

fn context_ids(store: &SessionStore) -> Vec<String> {
    store
        .build_context_entries()
        .expect("context should build")
        .iter()
        .filter_map(Entry::id)
        .map(str::to_owned)
        .collect()
}

fn raw_lines(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .expect("session file should be readable")
        .lines()
        .map(|line| serde_json::from_str(line).expect("every written line is valid json"))
        .collect()
}

#[test]
fn ensure_writes_header_once() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("nested").join("session.jsonl");
    let mut store = SessionStore::open(&path).with_clock(FixedClock::epoch());

    assert!(store.ensure(dir.path()).expect("first ensure"));
    assert!(!store.ensure(dir.path()).expect("second ensure"));

    let lines = raw_lines(&path);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["type"], "session");
    assert_eq!(lines[0]["version"], CURRENT_VERSION);
    assert_eq!(lines[0]["cwd"], dir.path().display().to_string());
}

#[test]
fn every_append_writes_entry_then_leaf() {
    let (_dir, mut store) = scratch_store();
    let id = user(&mut store, "hi");

    let lines = raw_lines(store.path());
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["type"], "message");
    assert_eq!(lines[1]["id"], id.as_str());
    assert_eq!(lines[1]["parentId"], json!(null));
    assert_eq!(lines[1]["message"]["content"], "hi");
    assert_eq!(lines[2], json!({"type": "leaf", "targetId": id, "timestamp": "1970-01-01T00:00:01Z"}));
}

#[test]
fn parent_of_each_append_is_the_head_before_it() {
    let (_dir, mut store) = scratch_store();
    let mut previous_head = None;

    for step in 0..6 {
        let lines_before = raw_lines(store.path()).len();
        let id = match step {
            0 => user(&mut store, "one"),
            1 => store.append_tool_call("echo", "two").expect("tool call"),
            2 => store
                .append_turn_start(TurnMarker {
                    turn: 1,
                    ..TurnMarker::default()
                })
                .expect("turn start"),
            3 => store
                .append_thinking_level_change("high")
                .expect("thinking level change"),
            4 => store
                .append_model_change("mock", "mock-2")
                .expect("model change"),
            _ => store
                .append_custom_message("note", "remember this", true)
                .expect("custom message"),
        };

        let lines = raw_lines(store.path());
        assert_eq!(lines.len(), lines_before + 2);
        assert_eq!(lines[lines_before]["id"], id.as_str());
        assert_eq!(lines[lines_before + 1]["type"], "leaf");
        assert_eq!(lines[lines_before + 1]["targetId"], id.as_str());

        let entries = store.load_entries().expect("entries");
        let entry = entries
            .iter()
            .find(|entry| entry.id() == Some(id.as_str()))
            .expect("appended entry is readable");
        assert_eq!(entry.parent_id(), previous_head.as_deref());
        previous_head = Some(id);
    }
}

#[test]
fn branch_to_root_empties_context() {
    let (_dir, mut store) = scratch_store();
    user(&mut store, "a");
    user(&mut store, "b");

    store.branch_to(None).expect("root navigation");
    assert!(store.build_context_entries().expect("context").is_empty());
    assert_eq!(store.leaf().expect("leaf"), LeafState::Root);

    let fresh = user(&mut store, "new root");
    let entries = store.load_entries().expect("entries");
    let entry = entries
        .iter()
        .find(|entry| entry.id() == Some(fresh.as_str()))
        .expect("fresh entry");
    assert_eq!(entry.parent_id(), None);
    assert_eq!(context_ids(&store), vec![fresh]);
}

#[test]
fn branching_isolates_abandoned_entries() {
    let (_dir, mut store) = scratch_store();
    let a = user(&mut store, "A");
    user(&mut store, "B");
    let c = user(&mut store, "C");

    store.branch_to(Some(&a)).expect("branch to A");
    let d = user(&mut store, "D");

    assert_eq!(context_ids(&store), vec![a, d]);
    let all = store.load_entries().expect("entries");
    assert!(all.iter().any(|entry| entry.id() == Some(c.as_str())));
}

#[test]
fn branch_to_unknown_id_is_rejected_without_writing() {
    let (_dir, mut store) = scratch_store();
    user(&mut store, "a");
    let before = raw_lines(store.path()).len();

    let error = store.branch_to(Some("ghost")).expect_err("unknown id");
    assert!(matches!(error, SessionStoreError::EntryNotFound { ref id, .. } if id == "ghost"));
    assert_eq!(raw_lines(store.path()).len(), before);
}

#[test]
fn compaction_keeps_the_requested_tail() {
    let (_dir, mut store) = scratch_store();
    let ids = ["m1", "m2", "m3", "m4", "m5"]
        .map(|text| user(&mut store, text));

    let outcome = store
        .compact(CompactOptions {
            keep_last: 2,
            ..CompactOptions::default()
        })
        .expect("compaction");

    assert_eq!(outcome.first_kept_entry_id.as_deref(), Some(ids[3].as_str()));
    assert_eq!(outcome.summarized, 3);
    assert_eq!(outcome.kept, 2);
    assert_eq!(
        context_ids(&store),
        vec![outcome.summary_id.clone(), ids[3].clone(), ids[4].clone()]
    );

    let after = user(&mut store, "m6");
    assert_eq!(
        context_ids(&store),
        vec![outcome.summary_id, ids[3].clone(), ids[4].clone(), after]
    );
}

#[test]
fn second_compaction_folds_the_first_summary() {
    let (_dir, mut store) = scratch_store();
    let ids = ["m1", "m2", "m3", "m4", "m5"].map(|text| user(&mut store, text));
    let keep_two = || CompactOptions {
        keep_last: 2,
        ..CompactOptions::default()
    };

    let first = store.compact(keep_two()).expect("first compaction");
    let m6 = user(&mut store, "m6");
    let second = store.compact(keep_two()).expect("second compaction");

    assert_eq!(second.summarized, 2);
    assert_eq!(second.kept, 2);
    assert_eq!(second.first_kept_entry_id.as_deref(), Some(ids[4].as_str()));
    let context = context_ids(&store);
    assert_eq!(context, vec![second.summary_id, ids[4].clone(), m6]);
    assert!(!context.contains(&first.summary_id));
}

#[test]
fn compaction_never_rewrites_existing_lines() {
    let (_dir, mut store) = scratch_store();
    for text in ["a", "b", "c"] {
        user(&mut store, text);
    }
    let before = std::fs::read_to_string(store.path()).expect("readable");

    store
        .compact(CompactOptions {
            keep_last: 1,
            label: Some("checkpoint".to_string()),
            ..CompactOptions::default()
        })
        .expect("compaction");

    let after = std::fs::read_to_string(store.path()).expect("readable");
    assert!(after.starts_with(&before));
    let kinds = raw_lines(store.path())
        .into_iter()
        .skip(before.lines().count())
        .map(|line| line["type"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["compaction", "leaf", "label"]);
}

#[test]
fn compaction_with_nothing_to_fold_fails() {
    let (_dir, mut store) = scratch_store();
    let error = store
        .compact(CompactOptions::default())
        .expect_err("empty context");
    assert!(matches!(error, SessionStoreError::NothingToCompact { .. }));

    user(&mut store, "only one");
    let error = store
        .compact(CompactOptions {
            keep_last: 1,
            ..CompactOptions::default()
        })
        .expect_err("everything is kept");
    assert!(matches!(error, SessionStoreError::NothingToCompact { .. }));
}

#[test]
fn merge_patches_previous_markdown_summary() {
    let (_dir, mut store) = scratch_store();
    for text in ["goal: ship", "a", "b"] {
        user(&mut store, text);
    }
    let first = store
        .compact(CompactOptions {
            keep_last: 1,
            format: SummaryFormat::Md,
            ..CompactOptions::default()
        })
        .expect("first compaction");
    assert!(!first.merged);

    store
        .append_message(Role::Assistant, "done with b")
        .expect("assistant");
    user(&mut store, "next");

    let second = store
        .compact(CompactOptions {
            keep_last: 1,
            merge: true,
            ..CompactOptions::default()
        })
        .expect("merge compaction");
    assert!(second.merged);

    let context = store.build_context_entries().expect("context");
    let Entry::Compaction(summary) = &context[0] else {
        panic!("context must start with the summary");
    };
    assert_eq!(summary.format, SummaryFormat::Md);
    assert!(summary.summary.starts_with("## Goal\ngoal: ship"));
    assert!(summary
        .summary
        .contains("## Next Steps\n1. Continue from the most recent retained entry."));
    assert!(summary.summary.contains("- assistant: done with b"));
}

#[test]
fn labels_upsert_and_delete() {
    let (_dir, mut store) = scratch_store();
    let x = user(&mut store, "x");

    store.set_label(&x, Some("checkpoint")).expect("set");
    assert_eq!(store.label_of(&x).expect("label").as_deref(), Some("checkpoint"));

    store.set_label(&x, None).expect("clear");
    assert_eq!(store.label_of(&x).expect("label"), None);
    assert!(store.labels().expect("labels").is_empty());

    let error = store.set_label("ghost", Some("nope")).expect_err("unknown target");
    assert!(matches!(error, SessionStoreError::EntryNotFound { .. }));
}

#[test]
fn message_round_trips_role_and_content() {
    let (_dir, mut store) = scratch_store();
    let id = store
        .append_message_with(NewMessage::new(Role::User, "hi").model("mock", "mock-1"))
        .expect("append");

    let entries = store.load_entries().expect("entries");
    let entry = entries
        .iter()
        .find(|entry| entry.id() == Some(id.as_str()))
        .expect("message");
    assert_eq!(entry.role(), Some(Role::User));
    assert_eq!(entry.content(), Some("hi"));
    let Entry::Message(message) = entry else {
        panic!("expected a message");
    };
    assert_eq!(message.model.as_deref(), Some("mock-1"));
}

#[test]
fn structural_context_keeps_bookkeeping() {
    let (_dir, mut store) = scratch_store();
    store
        .append_turn_start(TurnMarker {
            turn: 1,
            ..TurnMarker::default()
        })
        .expect("turn start");
    user(&mut store, "hello");
    store.append_session_info(Some("demo".to_string())).expect("info");
    store.append_custom("ext", Some(json!({"k": 1}))).expect("custom");

    let kinds = store
        .build_context_entries_verbose()
        .expect("verbose context")
        .iter()
        .map(Entry::kind)
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            EntryKind::TurnStart,
            EntryKind::Message,
            EntryKind::SessionInfo,
            EntryKind::Custom,
        ]
    );
    assert_eq!(store.build_context_entries().expect("context").len(), 1);
}

#[test]
fn context_messages_project_tool_exchanges() {
    let (_dir, mut store) = scratch_store();
    user(&mut store, "echo hi");
    let call = store.append_tool_call("echo", "hi").expect("call");
    store.append_tool_result("echo", true, "hi").expect("result");
    store
        .append_message(Role::Assistant, "said hi")
        .expect("reply");

    assert_eq!(
        store.context_messages().expect("messages"),
        vec![
            RunMessage::UserText {
                text: "echo hi".to_string()
            },
            RunMessage::ToolCall {
                call_id: call.clone(),
                tool_name: "echo".to_string(),
                arguments: "hi".to_string(),
            },
            RunMessage::ToolResult {
                call_id: call,
                tool_name: "echo".to_string(),
                content: "hi".to_string(),
                is_error: false,
            },
            RunMessage::AssistantText {
                text: "said hi".to_string()
            },
        ]
    );
}

#[test]
fn version_one_index_resolves_after_full_scan() {
    let (_dir, path) = write_session_file(&[
        header_line(1),
        json!({"type": "message", "role": "user", "content": "first"}).to_string(),
        json!({"type": "message", "role": "assistant", "content": "second"}).to_string(),
        json!({"type": "compaction", "summary": "folded", "firstKeptEntryIndex": 1}).to_string(),
        json!({"type": "message", "role": "user", "content": "after"}).to_string(),
    ]);
    let store = SessionStore::open(&path);

    let loaded = store.load().expect("load");
    assert_eq!(loaded.version, 1);
    let second_id = loaded.entries[2].id().expect("synthesized id").to_string();
    let Entry::Compaction(compaction) = &loaded.entries[3] else {
        panic!("expected the compaction record");
    };
    assert_eq!(compaction.first_kept_entry_id.as_deref(), Some(second_id.as_str()));

    let contents = store
        .build_context_entries()
        .expect("context")
        .iter()
        .filter_map(|entry| entry.content().map(str::to_owned))
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["folded", "second", "after"]);
}

#[test]
fn legacy_summary_without_tail_drops_the_prefix() {
    let (_dir, path) = write_session_file(&[
        header_line(2),
        json!({"type": "message", "id": "m1", "parentId": null, "role": "user", "content": "old"}).to_string(),
        json!({"type": "summary", "id": "s1", "parentId": "m1", "summary": "folded"}).to_string(),
        json!({"type": "message", "id": "m2", "parentId": "s1", "role": "user", "content": "new"}).to_string(),
    ]);

    assert_eq!(
        context_ids(&SessionStore::open(&path)),
        vec!["s1".to_string(), "m2".to_string()]
    );
}

#[test]
fn corrupt_lines_are_skipped_and_appends_recover() {
    let (_dir, path) = write_session_file(&[
        header_line(3),
        json!({"type": "message", "id": "m1", "parentId": null, "role": "user", "content": "kept"}).to_string(),
        "{ this is not json".to_string(),
        json!({"type": "hologram", "id": "h1"}).to_string(),
        json!({"type": "message", "id": "m2", "parentId": "m1", "role": "user"}).to_string(),
    ]);
    let mut store = SessionStore::open(&path).with_id_source(IdSource::sequential("n"));

    assert_eq!(context_ids(&store), vec!["m1".to_string()]);
    let next = user(&mut store, "more");
    assert_eq!(context_ids(&store), vec!["m1".to_string(), next]);
}

#[test]
fn dangling_leaf_falls_back_to_last_entry() {
    let (_dir, path) = write_session_file(&[
        header_line(3),
        json!({"type": "message", "id": "m1", "parentId": null, "role": "user", "content": "a"}).to_string(),
        json!({"type": "message", "id": "m2", "parentId": "m1", "role": "user", "content": "b"}).to_string(),
        json!({"type": "leaf", "targetId": "truncated"}).to_string(),
    ]);

    assert_eq!(
        context_ids(&SessionStore::open(&path)),
        vec!["m1".to_string(), "m2".to_string()]
    );
}

#[test]
fn oversized_files_are_rejected() {
    let (_dir, mut store) = scratch_store();
    user(&mut store, "some content that pushes the file past the cap");
    let store = store.with_config(StoreConfig {
        max_file_bytes: 16,
        ..StoreConfig::default()
    });

    let error = store.load_entries().expect_err("oversized file");
    assert!(matches!(error, SessionStoreError::FileTooLarge { limit: 16, .. }));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = SessionStore::open(dir.path().join("absent.jsonl"));
    let error = store.load_entries().expect_err("missing file");
    assert!(error.is_not_found());
}

#[test]
fn create_new_places_file_under_session_root() {
    let cwd = tempfile::tempdir().expect("tempdir should be created");
    let store = SessionStore::create_new(cwd.path()).expect("create_new should succeed");

    let expected_root = cwd.path().join(".agent").join("sessions");
    assert!(store.path().starts_with(&expected_root));
    assert_eq!(
        SessionStore::latest_session_path(cwd.path()).expect("latest"),
        store.path()
    );

    let text = std::fs::read_to_string(store.path()).expect("readable");
    let header: SessionHeader =
        serde_json::from_str(text.lines().next().expect("header line")).expect("header");
    assert_eq!(header.version, CURRENT_VERSION);
    assert_eq!(header.cwd, cwd.path().display().to_string());
}

#[test]
fn latest_session_path_reports_empty_root() {
    let cwd = tempfile::tempdir().expect("tempdir should be created");
    let error = SessionStore::latest_session_path(cwd.path()).expect_err("no sessions");
    assert!(matches!(error, SessionStoreError::NoSessionsFound { .. }));
}

#[test]
fn should_compact_uses_latest_usage_total() {
    let (_dir, mut store) = scratch_store();
    user(&mut store, "abcd");
    store
        .append_message_with(NewMessage::new(Role::Assistant, "ok").usage_total(100))
        .expect("assistant");
    user(&mut store, "abcdefgh");

    assert_eq!(store.estimate_context_tokens().expect("estimate"), 102);
    assert!(store.should_compact(101).expect("check"));
    assert!(!store.should_compact(102).expect("check"));
    assert!(!store.should_compact(0).expect("disabled"));
}

#[test]
fn branch_summary_requires_existing_origin() {
    let (_dir, mut store) = scratch_store();
    let a = user(&mut store, "a");

    let summary = store
        .append_branch_summary(&a, "explored an alternative", false)
        .expect("branch summary");
    assert_eq!(context_ids(&store), vec![a, summary]);

    let error = store
        .append_branch_summary("ghost", "nope", false)
        .expect_err("unknown origin");
    assert!(matches!(error, SessionStoreError::EntryNotFound { .. }));
}
