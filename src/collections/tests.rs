use super::*;
use crate::database::{DocumentCollection, NativeHit, VectorCollection, VectorPoint};
use crate::identifier::{BackendKind, IdFormat};
use crate::score::ScoreConvention;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Records = Arc<Mutex<HashMap<String, Vec<JsonMap>>>>;

/// In-memory document backend that widens the lookup window to expose races
#[derive(Default)]
struct MemoryDocuments {
    records: Records,
    lookups: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentBackend for MemoryDocuments {
    fn kind(&self) -> BackendKind {
        BackendKind::DocSqlite
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            records: Arc::clone(&self.records),
            lookups: Arc::clone(&self.lookups),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryCollection {
    name: String,
    records: Records,
    lookups: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, id: &RecordId, body: &JsonMap) -> Result<()> {
        let mut body = body.clone();
        body.insert("id".to_string(), id.as_str().into());
        let mut records = self.records.lock().expect("lock should not be poisoned");
        let rows = records.entry(self.name.clone()).or_default();
        rows.retain(|row| row["id"] != id.as_str());
        rows.push(body);
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<JsonMap>> {
        let records = self.records.lock().expect("lock should not be poisoned");
        Ok(records
            .get(&self.name)
            .and_then(|rows| rows.iter().find(|row| row["id"] == id.as_str()).cloned()))
    }

    async fn find_eq(&self, field: &str, value: &str) -> Result<Vec<JsonMap>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let records = self.records.lock().expect("lock should not be poisoned");
        Ok(records
            .get(&self.name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.get(field).and_then(Value::as_str) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(&self, limit: usize) -> Result<Vec<JsonMap>> {
        let records = self.records.lock().expect("lock should not be poisoned");
        Ok(records
            .get(&self.name)
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.records.lock().expect("lock should not be poisoned");
        let rows = records.entry(self.name.clone()).or_default();
        let before = rows.len();
        rows.retain(|row| row["id"] != id.as_str());
        Ok(rows.len() != before)
    }
}

/// Vector backend that only counts collection creation
#[derive(Default)]
struct CountingVectors {
    ensured: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl VectorBackend for CountingVectors {
    fn kind(&self) -> BackendKind {
        BackendKind::VectorQdrant
    }

    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::CosineSimilarity
    }

    fn collection(&self, name: &str) -> Arc<dyn VectorCollection> {
        Arc::new(CountingCollection {
            name: name.to_string(),
            ensured: Arc::clone(&self.ensured),
            failures_left: Arc::clone(&self.failures_left),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct CountingCollection {
    name: String,
    ensured: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl VectorCollection for CountingCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure(&self, _dimension: usize) -> Result<()> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::unavailable("vector_qdrant", "HTTP 503"));
        }
        self.ensured
            .lock()
            .expect("lock should not be poisoned")
            .push(self.name.clone());
        Ok(())
    }

    async fn upsert(&self, _points: &[VectorPoint]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _ids: &[RecordId]) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _vector: &[f32], _limit: usize) -> Result<Vec<NativeHit>> {
        Ok(Vec::new())
    }
}

struct Harness {
    resolver: Arc<CollectionResolver>,
    records: Records,
    ensured: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let documents = MemoryDocuments::default();
    let vectors = CountingVectors::default();
    let records = Arc::clone(&documents.records);
    let ensured = Arc::clone(&vectors.ensured);
    let failures_left = Arc::clone(&vectors.failures_left);

    Harness {
        resolver: Arc::new(CollectionResolver::new(
            Arc::new(documents),
            Arc::new(vectors),
            8,
        )),
        records,
        ensured,
        failures_left,
    }
}

fn metadata_count(records: &Records) -> usize {
    records
        .lock()
        .expect("lock should not be poisoned")
        .get(COLLECTIONS)
        .map_or(0, Vec::len)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolves_create_once() {
    let h = harness();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let resolver = Arc::clone(&h.resolver);
            tokio::spawn(async move { resolver.resolve("faq").await })
        })
        .collect();

    let mut refs = Vec::new();
    for task in tasks {
        refs.push(
            task.await
                .expect("task should not panic")
                .expect("resolve should succeed"),
        );
    }

    assert!(refs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(h.ensured.lock().expect("lock").len(), 1);
    assert_eq!(metadata_count(&h.records), 1);
}

#[tokio::test]
async fn resolve_creates_with_default_attributes() {
    let h = harness();
    let reference = h.resolver.resolve("faq").await.expect("should resolve");

    assert_eq!(reference.logical_name, "faq");
    assert_eq!(reference.id.format(), IdFormat::Uuid);
    assert_eq!(
        h.ensured.lock().expect("lock").as_slice(),
        [reference.vector_collection()]
    );

    let listed = h.resolver.list(10).await.expect("should list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].display_name, "Faq");
    assert_eq!(listed[0].kind, DEFAULT_COLLECTION_TYPE);
    assert_eq!(listed[0].id, reference.id.as_str());
    assert_eq!(listed[0].created_at, listed[0].updated_at);
}

#[tokio::test]
async fn resolve_finds_collection_created_by_another_process() {
    let h = harness();
    h.resolver.resolve("faq").await.expect("should create");

    // A fresh resolver has a cold cache over the same backend state
    let documents = MemoryDocuments {
        records: Arc::clone(&h.records),
        lookups: Arc::new(AtomicUsize::new(0)),
    };
    let vectors = CountingVectors::default();
    let ensured = Arc::clone(&vectors.ensured);
    let resolver = CollectionResolver::new(Arc::new(documents), Arc::new(vectors), 8);

    let first = h.resolver.resolve("faq").await.expect("should resolve");
    let second = resolver.resolve("faq").await.expect("should resolve");

    assert_eq!(first, second);
    assert!(ensured.lock().expect("lock").is_empty());
    assert_eq!(metadata_count(&h.records), 1);
}

#[tokio::test]
async fn cache_hit_skips_backend_lookup() {
    let documents = MemoryDocuments::default();
    let lookups = Arc::clone(&documents.lookups);
    let resolver =
        CollectionResolver::new(Arc::new(documents), Arc::new(CountingVectors::default()), 8);

    resolver.resolve("faq").await.expect("should resolve");
    resolver.resolve(" faq ").await.expect("should resolve");

    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.cached().await.len(), 1);
}

#[tokio::test]
async fn failed_create_is_retried() {
    let h = harness();
    h.failures_left.store(1, Ordering::SeqCst);

    let error = h
        .resolver
        .resolve("faq")
        .await
        .expect_err("first attempt should fail");
    assert!(error.is_transient());
    assert!(h.resolver.cached().await.is_empty());
    assert_eq!(metadata_count(&h.records), 0);

    h.resolver.resolve("faq").await.expect("retry should succeed");
    assert_eq!(metadata_count(&h.records), 1);
}

#[tokio::test]
async fn create_uses_caller_attributes() {
    let h = harness();
    let info = h
        .resolver
        .create(&NewCollection {
            name: "tickets".to_string(),
            kind: Some("support".to_string()),
            description: Some("Helpdesk tickets".to_string()),
        })
        .await
        .expect("should create");

    assert_eq!(info.kind, "support");
    assert_eq!(info.description.as_deref(), Some("Helpdesk tickets"));

    let again = h
        .resolver
        .create(&NewCollection::named("tickets"))
        .await
        .expect("existing collection is returned");
    assert_eq!(again, info);
    assert_eq!(metadata_count(&h.records), 1);
}

#[tokio::test]
async fn blank_names_are_rejected() {
    let h = harness();
    let result = h.resolver.resolve("   ").await;
    assert!(matches!(result, Err(StoreError::InvalidCollectionName(_))));
}

#[test]
fn capitalize_handles_edges() {
    assert_eq!(capitalize("faq"), "Faq");
    assert_eq!(capitalize("éclair"), "Éclair");
    assert_eq!(capitalize(""), "");
    assert_eq!(capitalize("FAQ"), "FAQ");
}
