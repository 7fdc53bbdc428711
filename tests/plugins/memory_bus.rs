use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use switchyard::core::error::SwitchyardError;
use switchyard::core::store::Store;
use switchyard::plugins::documents::{DocumentStore, FsDocumentStore};
use switchyard::plugins::governance::{GovernanceEventKind, GovernanceMonitor};
use switchyard::plugins::index::{Metadata, SemanticIndex, SqliteSemanticIndex};
use switchyard::plugins::memory_bus::{
    BusObserver, HitSource, IntentJournal, IntentPhase, MemoryBus, MemoryHit, content_sha256,
};
use tempfile::{TempDir, tempdir};

/// Document store whose writes can be switched to fail.
struct FlakyDocs {
    inner: FsDocumentStore,
    fail: Arc<AtomicBool>,
}

impl DocumentStore for FlakyDocs {
    fn read(&self, key: &str) -> Result<Option<String>, SwitchyardError> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), SwitchyardError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SwitchyardError::IoError(io::Error::other("disk full")));
        }
        self.inner.write(key, text)
    }

    fn list(&self, folder: &str) -> Result<Vec<String>, SwitchyardError> {
        self.inner.list(folder)
    }
}

struct Harness {
    _tmp: TempDir,
    store: Store,
    governance: Arc<GovernanceMonitor>,
    fail: Arc<AtomicBool>,
    bus: MemoryBus<SqliteSemanticIndex, FlakyDocs>,
}

fn harness(threshold: u32) -> Harness {
    harness_with_dirs(threshold, &[])
}

fn harness_with_dirs(threshold: u32, dirs: &[&str]) -> Harness {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("store");
    let governance = Arc::new(
        GovernanceMonitor::new(threshold, &store.governance_log_path(), 64).expect("monitor"),
    );
    let fail = Arc::new(AtomicBool::new(false));
    let docs = FlakyDocs {
        inner: FsDocumentStore::open(&store, "md").expect("docs"),
        fail: Arc::clone(&fail),
    };
    let index = SqliteSemanticIndex::open(&store, 16).expect("index");
    let bus = MemoryBus::new(index, docs, Arc::clone(&governance))
        .with_intent_journal(&store.intent_journal_path())
        .with_search_dirs(dirs.iter().map(|d| d.to_string()).collect());
    Harness {
        _tmp: tmp,
        store,
        governance,
        fail,
        bus,
    }
}

fn keys(hits: &[MemoryHit]) -> Vec<&str> {
    hits.iter().map(|h| h.key.as_str()).collect()
}

#[test]
fn write_then_exact_read_round_trips() {
    let h = harness(3);
    let result = h
        .bus
        .write("notes/plan.md", "ship the router", Metadata::new())
        .expect("write");
    assert_eq!(result.key, "notes/plan.md");
    assert_eq!(result.content_sha256, content_sha256("ship the router"));
    assert!(result.total_latency_ms >= result.index_latency_ms);

    let hits = h.bus.read("anything", Some("notes/plan.md"), 3).expect("read");
    assert_eq!(hits[0].source, HitSource::Exact);
    assert_eq!(hits[0].key, "notes/plan.md");
    assert_eq!(hits[0].content, "ship the router");
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(keys(&hits).iter().filter(|k| **k == "notes/plan.md").count(), 1);
}

#[test]
fn write_normalises_key_and_records_metadata() {
    let h = harness(3);
    let mut meta = Metadata::new();
    meta.insert("author".to_string(), serde_json::json!("planner"));
    let result = h
        .bus
        .write("./Agent Outputs\\report 1.md", "quarterly numbers", meta)
        .expect("write");

    assert_eq!(result.key, "Agent_Outputs/report_1.md");
    assert!(h.store.documents_dir().join("Agent_Outputs/report_1.md").is_file());

    let (content, stored) = h
        .bus
        .index()
        .get("Agent_Outputs/report_1.md")
        .expect("get")
        .expect("indexed");
    assert_eq!(content, "quarterly numbers");
    assert_eq!(stored["author"], "planner");
    assert_eq!(stored["path"], "./Agent Outputs\\report 1.md");
    assert_eq!(stored["content_sha256"], content_sha256("quarterly numbers").as_str());
}

#[test]
fn invalid_key_is_rejected_without_touching_governance() {
    let h = harness(1);
    assert!(matches!(
        h.bus.write("../escape.md", "x", Metadata::new()),
        Err(SwitchyardError::ValidationError(_))
    ));
    assert_eq!(h.governance.failure_streak(), 0);
    assert_eq!(h.bus.index().count().expect("count"), 0);
}

#[test]
fn failed_document_write_rolls_back_the_index() {
    let h = harness(3);
    h.bus.write("keep.md", "committed", Metadata::new()).expect("write");
    let before = h.bus.index().count().expect("count");

    h.fail.store(true, Ordering::SeqCst);
    let err = h
        .bus
        .write("lost.md", "never lands", Metadata::new())
        .expect_err("document write fails");
    match err {
        SwitchyardError::WriteConsistencyFailure { key, source } => {
            assert_eq!(key, "lost.md");
            assert!(matches!(*source, SwitchyardError::IoError(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.bus.index().count().expect("count"), before);
    assert!(!h.bus.index().contains("lost.md").expect("contains"));
    assert!(!h.store.documents_dir().join("lost.md").exists());
    assert_eq!(h.governance.failure_streak(), 1);

    let events = h.governance.recent_events(10);
    assert_eq!(events.len(), 1);
    match &events[0].kind {
        GovernanceEventKind::MemoryBusFailure { key, operation, error, .. } => {
            assert_eq!(key, "lost.md");
            assert_eq!(operation, "write.document");
            assert!(error.contains("disk full"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn failed_overwrite_restores_the_committed_version() {
    let h = harness(3);
    h.bus.write("doc.md", "v1", Metadata::new()).expect("write v1");

    h.fail.store(true, Ordering::SeqCst);
    assert!(h.bus.write("doc.md", "v2", Metadata::new()).is_err());

    // The document store is authoritative and still holds v1.
    let hits = h.bus.read("", Some("doc.md"), 1).expect("read");
    assert_eq!(hits[0].content, "v1");
    let (indexed, _) = h.bus.index().get("doc.md").expect("get").expect("still indexed");
    assert_eq!(indexed, "v1");
    assert_eq!(h.bus.index().count().expect("count"), 1);
}

#[test]
fn repeated_failures_alert_and_success_resets() {
    let h = harness(2);
    h.fail.store(true, Ordering::SeqCst);
    for i in 0..3 {
        let _ = h.bus.write(&format!("f{}.md", i), "x", Metadata::new());
    }
    assert_eq!(h.governance.failure_streak(), 3);
    let alerts = h
        .governance
        .recent_events(100)
        .into_iter()
        .filter(|e| e.is_alert())
        .count();
    assert_eq!(alerts, 2);

    h.fail.store(false, Ordering::SeqCst);
    h.bus.write("ok.md", "fine", Metadata::new()).expect("write");
    assert_eq!(h.governance.failure_streak(), 0);
}

#[test]
fn read_tiers_fill_in_order_without_duplicates() {
    let h = harness_with_dirs(3, &["notes"]);
    h.bus
        .write("notes/a.md", "the Router picks agents", Metadata::new())
        .expect("write a");
    h.bus
        .write("notes/b.md", "weights decay slowly", Metadata::new())
        .expect("write b");
    h.bus
        .write("notes/c.md", "router tie-breaks by order", Metadata::new())
        .expect("write c");

    let hits = h.bus.read("ROUTER", Some("notes/c.md"), 3).expect("read");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].source, HitSource::Exact);
    assert_eq!(hits[0].key, "notes/c.md");
    assert_eq!(hits[1].source, HitSource::Keyword);
    assert_eq!(hits[1].key, "notes/a.md");
    assert_eq!(hits[1].score, 1.0);
    assert_eq!(hits[2].source, HitSource::Semantic);
    assert_eq!(hits[2].key, "notes/b.md");
}

#[test]
fn keyword_hits_are_capped_to_max_results() {
    let h = harness_with_dirs(3, &["log"]);
    for i in 0..5 {
        h.bus
            .write(&format!("log/{}.md", i), "status: green", Metadata::new())
            .expect("write");
    }
    let hits = h.bus.read("GREEN", None, 2).expect("read");
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.source == HitSource::Keyword));
}

#[test]
fn semantic_tier_ranks_by_similarity() {
    let h = harness_with_dirs(3, &["mem"]);
    h.bus.write("mem/one.md", "alpha beta", Metadata::new()).expect("write");
    h.bus.write("mem/two.md", "gamma delta", Metadata::new()).expect("write");

    let hits = h.bus.read("alpha beta", None, 5).expect("read");
    // Keyword tier catches the literal match; similarity fills the rest.
    assert_eq!(hits[0].source, HitSource::Keyword);
    assert_eq!(hits[0].key, "mem/one.md");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[1].source, HitSource::Semantic);
    assert_eq!(hits[1].key, "mem/two.md");

    let only_semantic = h.bus.read("zzzz qqqq", None, 2).expect("read");
    assert_eq!(only_semantic.len(), 2);
    assert!(only_semantic.iter().all(|h| h.source == HitSource::Semantic));
    assert!(only_semantic[0].score >= only_semantic[1].score);
}

#[test]
fn search_dirs_limit_the_keyword_scan() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("store");
    let governance = Arc::new(
        GovernanceMonitor::new(3, &store.governance_log_path(), 16).expect("monitor"),
    );
    let bus = MemoryBus::new(
        SqliteSemanticIndex::open(&store, 16).expect("index"),
        FsDocumentStore::open(&store, "md").expect("docs"),
        governance,
    )
    .with_search_dirs(vec!["notes".to_string()]);

    bus.write("notes/in.md", "needle here", Metadata::new()).expect("write");
    bus.write("other/out.md", "needle there", Metadata::new()).expect("write");

    let hits = bus.read("needle", None, 5).expect("read");
    let keyword: Vec<&str> = hits
        .iter()
        .filter(|h| h.source == HitSource::Keyword)
        .map(|h| h.key.as_str())
        .collect();
    assert_eq!(keyword, vec!["notes/in.md"]);
    // The other document can still surface through similarity.
    assert_eq!(hits.len(), 2);
}

#[test]
fn empty_store_and_zero_limit_return_nothing() {
    let h = harness_with_dirs(3, &["."]);
    assert!(h.bus.read("anything", None, 3).expect("read").is_empty());
    h.bus.write("a.md", "text", Metadata::new()).expect("write");
    assert!(h.bus.read("text", Some("a.md"), 0).expect("read").is_empty());
    assert!(h.bus.read("text", Some("missing.md"), 3).expect("read")[0].source != HitSource::Exact);
}

#[test]
fn no_search_dirs_skips_the_keyword_tier() {
    let h = harness(3);
    h.bus.write("any/doc.md", "needle", Metadata::new()).expect("write");
    let hits = h.bus.read("needle", None, 3).expect("read");
    assert_eq!(keys(&hits), vec!["any/doc.md"]);
    assert!(hits.iter().all(|h| h.source == HitSource::Semantic));
}

#[test]
fn keyword_match_uses_the_query_as_given() {
    let h = harness_with_dirs(3, &["log"]);
    h.bus.write("log/a.md", "status: green", Metadata::new()).expect("write");
    h.bus.write("log/b.md", "green light", Metadata::new()).expect("write");

    // The trailing space is part of the literal, so only b.md matches.
    let hits = h.bus.read("GREEN ", None, 1).expect("read");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, HitSource::Keyword);
    assert_eq!(hits[0].key, "log/b.md");

    // A blank query never keyword-matches.
    let blank = h.bus.read("   ", None, 2).expect("read");
    assert!(blank.iter().all(|h| h.source != HitSource::Keyword));
}

/// Document store that cannot read one particular key.
struct UnreadableDocs {
    inner: FsDocumentStore,
    bad_key: &'static str,
}

impl DocumentStore for UnreadableDocs {
    fn read(&self, key: &str) -> Result<Option<String>, SwitchyardError> {
        if key == self.bad_key {
            return Err(SwitchyardError::IoError(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, text: &str) -> Result<(), SwitchyardError> {
        self.inner.write(key, text)
    }

    fn list(&self, folder: &str) -> Result<Vec<String>, SwitchyardError> {
        self.inner.list(folder)
    }
}

#[test]
fn unreadable_document_is_skipped_by_the_keyword_scan() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("store");
    let governance = Arc::new(
        GovernanceMonitor::new(3, &store.governance_log_path(), 16).expect("monitor"),
    );
    let bus = MemoryBus::new(
        SqliteSemanticIndex::open(&store, 16).expect("index"),
        UnreadableDocs {
            inner: FsDocumentStore::open(&store, "md").expect("docs"),
            bad_key: "notes/bad.md",
        },
        Arc::clone(&governance),
    )
    .with_search_dirs(vec!["notes".to_string()]);

    bus.write("notes/bad.md", "needle too", Metadata::new()).expect("write bad");
    bus.write("notes/good.md", "needle", Metadata::new()).expect("write good");
    bus.write("notes/other.md", "a needle again", Metadata::new()).expect("write other");

    let hits = bus.read("needle", Some("notes/good.md"), 3).expect("read survives");
    assert_eq!(hits[0].source, HitSource::Exact);
    assert_eq!(hits[0].key, "notes/good.md");
    assert!(
        hits.iter()
            .any(|h| h.source == HitSource::Keyword && h.key == "notes/other.md")
    );
    assert!(
        !hits
            .iter()
            .any(|h| h.source == HitSource::Keyword && h.key == "notes/bad.md")
    );
    assert_eq!(governance.failure_streak(), 0);
}

#[test]
fn journal_brackets_every_write() {
    let h = harness(3);
    h.bus.write("a.md", "one", Metadata::new()).expect("write");
    h.fail.store(true, Ordering::SeqCst);
    let _ = h.bus.write("b.md", "two", Metadata::new());

    let journal = IntentJournal::new(&h.store.intent_journal_path());
    assert!(journal.dangling().expect("dangling").is_empty());

    let raw = std::fs::read_to_string(h.store.intent_journal_path()).expect("journal");
    let phases: Vec<String> = raw
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).expect("json");
            format!("{}:{}", v["key"].as_str().unwrap_or(""), v["phase"].as_str().unwrap_or(""))
        })
        .collect();
    assert_eq!(phases, vec!["a.md:begin", "a.md:commit", "b.md:begin", "b.md:abort"]);
    assert_eq!(h.bus.recover().expect("recover"), 0);
}

#[test]
fn recover_repairs_interrupted_writes() {
    let h = harness(3);
    let journal = IntentJournal::new(&h.store.intent_journal_path());
    let index = h.bus.index();

    // Crashed after the index write, before the document write.
    let orphan_sha = content_sha256("orphan");
    journal.append(IntentPhase::Begin, "orphan.md", &orphan_sha).expect("begin");
    index.upsert("orphan.md", "orphan", &Metadata::new()).expect("upsert");

    // Crashed after both writes, before the commit record.
    h.bus.write("landed.md", "landed", Metadata::new()).expect("write");
    journal
        .append(IntentPhase::Begin, "landed.md", &content_sha256("landed"))
        .expect("begin");

    // Crashed while overwriting: index has new text, document has the old.
    h.bus.write("stale.md", "old text", Metadata::new()).expect("write");
    journal
        .append(IntentPhase::Begin, "stale.md", &content_sha256("new text"))
        .expect("begin");
    index.upsert("stale.md", "new text", &Metadata::new()).expect("upsert");

    assert_eq!(h.bus.recover().expect("recover"), 3);

    assert!(!index.contains("orphan.md").expect("contains"));
    assert!(index.contains("landed.md").expect("contains"));
    let (content, _) = index.get("stale.md").expect("get").expect("present");
    assert_eq!(content, "old text");

    assert!(journal.dangling().expect("dangling").is_empty());
    assert_eq!(h.bus.recover().expect("recover again"), 0);
}

#[derive(Default)]
struct Counting {
    writes: AtomicUsize,
    failed_writes: AtomicUsize,
    reads: AtomicUsize,
}

struct SharedCounting(Arc<Counting>);

impl BusObserver for SharedCounting {
    fn on_write(&self, _key: &str, ok: bool, _latency_ms: f64) {
        self.0.writes.fetch_add(1, Ordering::SeqCst);
        if !ok {
            self.0.failed_writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_read(&self, _query: &str, _hits: &[MemoryHit], _latency_ms: f64) {
        self.0.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn observer_sees_every_operation() {
    let counts = Arc::new(Counting::default());
    let h = harness(3);
    let fail = Arc::clone(&h.fail);
    let bus = h.bus.with_observer(Box::new(SharedCounting(Arc::clone(&counts))));

    bus.write("a.md", "x", Metadata::new()).expect("write");
    fail.store(true, Ordering::SeqCst);
    let _ = bus.write("b.md", "y", Metadata::new());
    bus.read("x", None, 3).expect("read");

    assert_eq!(counts.writes.load(Ordering::SeqCst), 2);
    assert_eq!(counts.failed_writes.load(Ordering::SeqCst), 1);
    assert_eq!(counts.reads.load(Ordering::SeqCst), 1);
}

/// Index that refuses every upsert.
struct BrokenIndex;

impl SemanticIndex for BrokenIndex {
    fn upsert(&self, _key: &str, _content: &str, _metadata: &Metadata) -> Result<(), SwitchyardError> {
        Err(SwitchyardError::StoreUnavailable("index.db locked".to_string()))
    }

    fn delete(&self, _key: &str) -> Result<(), SwitchyardError> {
        Ok(())
    }

    fn query(&self, _text: &str, _top_k: usize) -> Result<Vec<switchyard::plugins::index::IndexHit>, SwitchyardError> {
        Ok(Vec::new())
    }

    fn count(&self) -> Result<usize, SwitchyardError> {
        Ok(0)
    }

    fn contains(&self, _key: &str) -> Result<bool, SwitchyardError> {
        Ok(false)
    }
}

#[test]
fn index_failure_skips_the_document_and_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("store");
    let governance = Arc::new(
        GovernanceMonitor::new(3, &store.governance_log_path(), 16).expect("monitor"),
    );
    let bus = MemoryBus::new(
        BrokenIndex,
        FsDocumentStore::open(&store, "md").expect("docs"),
        Arc::clone(&governance),
    )
    .with_intent_journal(&store.intent_journal_path());

    let err = bus
        .write("a.md", "text", Metadata::new())
        .expect_err("index write fails");
    assert!(matches!(err, SwitchyardError::StoreUnavailable(_)));
    assert!(!store.documents_dir().join("a.md").exists());
    assert_eq!(governance.failure_streak(), 1);
    assert_eq!(bus.recover().expect("recover"), 0);
}
