use super::*;
use crate::config::{BatchingConfig, StorageConfig};
use crate::error::VectorDbError;
use crate::indexer::{Chunk, ChunkMetadata};
use crate::vector_db::{ChunkSink, version_marker_path};
use git2::{Repository, Signature};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const DIM: usize = 8;

/// Deterministic character-histogram embeddings; refuses any batch containing `poison`
struct HashEmbedder {
    poison: Option<&'static str>,
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            poison: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn poisoned(marker: &'static str) -> Self {
        Self {
            poison: Some(marker),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.poison
            && texts.iter().any(|t| t.contains(marker))
        {
            return Err(EmbeddingError::GenerationFailed("rate limited".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.1f32; DIM];
                for b in t.bytes() {
                    v[b as usize % DIM] += 1.0;
                }
                v
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

#[derive(Default)]
struct MemorySink {
    ids: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ChunkSink for MemorySink {
    async fn add_chunks(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> std::result::Result<usize, VectorDbError> {
        assert_eq!(chunks.len(), vectors.len());
        self.ids
            .lock()
            .unwrap()
            .extend(chunks.iter().map(Chunk::id));
        Ok(chunks.len())
    }
}

struct BrokenSink;

#[async_trait::async_trait]
impl ChunkSink for BrokenSink {
    async fn add_chunks(
        &self,
        _chunks: &[Chunk],
        _vectors: Vec<Vec<f32>>,
    ) -> std::result::Result<usize, VectorDbError> {
        Err(VectorDbError::StoreFailed("disk full".to_string()))
    }
}

fn chunks(texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: "src/lib.rs".to_string(),
                repo: "https://github.com/acme/widgets".to_string(),
            },
            index: i,
        })
        .collect()
}

fn commit_file(repo: &Repository, name: &str, content: &str) -> git2::Oid {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(name), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();

    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => vec![],
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, "update", &tree, &parent_refs)
        .unwrap()
}

fn test_config(data_dir: &Path) -> Config {
    Config {
        storage: StorageConfig {
            data_dir: data_dir.to_path_buf(),
            lock_timeout_secs: 0,
        },
        batching: BatchingConfig {
            batch_size: 1,
            max_workers: 2,
            max_attempts: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        },
        ..Config::default()
    }
}

fn silent() -> Arc<ProgressFn> {
    Arc::new(|_: &str, _: u8| {})
}

#[tokio::test]
async fn test_orchestrator_drops_failed_batch_and_keeps_the_rest() {
    let input = chunks(&["alpha", "beta", "POISON gamma", "delta", "epsilon"]);
    let provider = Arc::new(HashEmbedder::poisoned("POISON"));
    let sink = MemorySink::default();
    let orchestrator = EmbeddingOrchestrator::new(2, 2, RetryPolicy::immediate(3));

    let report = orchestrator
        .run(&input, provider.clone(), &sink, &|_: EmbedProgress| {})
        .await
        .unwrap();

    assert_eq!(report.total_chunks, 5);
    assert_eq!(report.stored_chunks, 3);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("batch 2/3"));

    // 2 clean batches + 3 attempts on the poisoned one
    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);

    let mut ids = sink.ids.lock().unwrap().clone();
    ids.sort();
    assert_eq!(ids, vec!["src/lib.rs#0", "src/lib.rs#1", "src/lib.rs#4"]);
}

#[tokio::test]
async fn test_orchestrator_reports_progress_per_batch() {
    let input = chunks(&["a", "b", "c", "d", "e", "f", "g"]);
    let seen = Mutex::new(Vec::new());
    let orchestrator = EmbeddingOrchestrator::new(3, 1, RetryPolicy::immediate(1));

    orchestrator
        .run(
            &input,
            Arc::new(HashEmbedder::new()),
            &MemorySink::default(),
            &|p: EmbedProgress| seen.lock().unwrap().push(p.processed_chunks),
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![3, 6, 7]);
}

#[tokio::test]
async fn test_orchestrator_empty_input() {
    let orchestrator = EmbeddingOrchestrator::new(4, 2, RetryPolicy::immediate(1));
    let report = orchestrator
        .run(
            &[],
            Arc::new(HashEmbedder::new()),
            &MemorySink::default(),
            &|_: EmbedProgress| {},
        )
        .await
        .unwrap();
    assert_eq!(report, EmbedReport::default());
}

#[tokio::test]
async fn test_orchestrator_sink_failure_aborts() {
    let orchestrator = EmbeddingOrchestrator::new(2, 1, RetryPolicy::immediate(1));
    let result = orchestrator
        .run(
            &chunks(&["a", "b", "c"]),
            Arc::new(HashEmbedder::new()),
            &BrokenSink,
            &|_: EmbedProgress| {},
        )
        .await;
    assert!(matches!(result, Err(VectorDbError::StoreFailed(_))));
}

/// Sink whose first write waits until the embedder has been asked for a second batch
struct GatedSink {
    second_request: Arc<tokio::sync::Notify>,
    writes: AtomicUsize,
}

#[async_trait::async_trait]
impl ChunkSink for GatedSink {
    async fn add_chunks(
        &self,
        chunks: &[Chunk],
        _vectors: Vec<Vec<f32>>,
    ) -> std::result::Result<usize, VectorDbError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
            self.second_request.notified().await;
        }
        Ok(chunks.len())
    }
}

struct SignallingEmbedder {
    second_request: Arc<tokio::sync::Notify>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for SignallingEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.second_request.notify_one();
        }
        Ok(texts.iter().map(|_| vec![1.0; DIM]).collect())
    }

    fn model_name(&self) -> &str {
        "signalling-embedder"
    }
}

#[tokio::test]
async fn test_orchestrator_embeds_while_a_write_is_pending() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let sink = GatedSink {
        second_request: Arc::clone(&gate),
        writes: AtomicUsize::new(0),
    };
    let provider = Arc::new(SignallingEmbedder {
        second_request: gate,
        calls: AtomicUsize::new(0),
    });
    let orchestrator = EmbeddingOrchestrator::new(1, 1, RetryPolicy::immediate(1));
    let input = chunks(&["a", "b", "c"]);

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        orchestrator.run(&input, provider.clone(), &sink, &|_: EmbedProgress| {}),
    )
    .await
    .expect("first write must not block embedding")
    .unwrap();

    assert_eq!(report.stored_chunks, 3);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_orchestrator_drops_batch_with_mixed_dimensions() {
    struct Ragged;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Ragged {
        async fn embed_batch(&self, texts: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![1.0; DIM + i])
                .collect())
        }

        fn model_name(&self) -> &str {
            "ragged"
        }
    }

    let sink = MemorySink::default();
    let report = EmbeddingOrchestrator::new(2, 1, RetryPolicy::immediate(1))
        .run(&chunks(&["a", "b", "c"]), Arc::new(Ragged), &sink, &|_: EmbedProgress| {})
        .await
        .unwrap();

    assert_eq!(report.failed_batches, 1);
    assert!(report.errors[0].contains("Invalid embedding dimension"));
    assert_eq!(*sink.ids.lock().unwrap(), vec!["src/lib.rs#2"]);
}

#[test]
fn test_should_skip_requires_matching_marker() {
    let dir = TempDir::new().unwrap();
    let location = RepoLocation::resolve(dir.path(), "https://github.com/acme/widgets");

    // No store yet
    assert!(!should_skip(&location, Some("abc")));

    std::fs::create_dir_all(&location.store_dir).unwrap();
    // Store without a marker
    assert!(!should_skip(&location, Some("abc")));

    write_version_marker(&location.store_dir, "abc").unwrap();
    assert!(should_skip(&location, Some("abc")));
    assert!(!should_skip(&location, Some("def")));
    // Unknown remote version always rebuilds
    assert!(!should_skip(&location, None));
}

#[test]
fn test_force_remove_dir_handles_readonly_files() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("snapshot");
    std::fs::create_dir_all(target.join(".git/objects")).unwrap();
    let object = target.join(".git/objects/pack");
    std::fs::write(&object, "data").unwrap();

    let mut permissions = std::fs::metadata(&object).unwrap().permissions();
    permissions.set_readonly(true);
    std::fs::set_permissions(&object, permissions).unwrap();

    assert!(force_remove_dir(&target).unwrap());
    assert!(!target.exists());
    assert!(!force_remove_dir(&target).unwrap());
}

#[tokio::test]
async fn test_empty_locator_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ingestor = Ingestor::new(test_config(dir.path()));
    let err = ingestor
        .ingest_with_provider("   ", silent(), false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(ValidationError::Empty(_))));
}

#[tokio::test]
async fn test_missing_credential_fails_before_fetch() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "Hello world\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let embedding = EmbeddingConfig {
        provider: crate::embedding::Provider::OpenAI,
        model: String::new(),
        api_key: None,
        base_url: None,
    };
    let locator = origin.path().to_string_lossy().to_string();
    let err = ingestor
        .ingest(&locator, silent(), false, &embedding)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::Embedding(EmbeddingError::MissingCredential(_))
    ));
    let location = ingestor.locate(&locator).unwrap();
    assert!(!location.snapshot_dir.exists());
}

#[tokio::test]
async fn test_busy_when_lock_is_held() {
    let dir = TempDir::new().unwrap();
    let ingestor = Ingestor::new(test_config(dir.path()));
    let location = ingestor.locate("https://github.com/acme/widgets").unwrap();
    let _held = FsLockGuard::try_acquire(&location.lock_path)
        .unwrap()
        .unwrap();

    let err = ingestor
        .remove_repository_data("https://github.com/acme/widgets")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Busy(_)));
}

#[tokio::test]
async fn test_ingest_then_skip_then_force() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "Hello world\n");
    let head = commit_file(&repo, "main.py", "print('hi')\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let locator = origin.path().to_string_lossy().to_string();
    let percents = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&percents);
    let progress: Arc<ProgressFn> = Arc::new(move |_: &str, p: u8| recorder.lock().unwrap().push(p));

    let first = ingestor
        .ingest_with_provider(&locator, progress, false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();
    assert_eq!(first.status, IngestStatus::Updated);
    assert_eq!(first.version.as_deref(), Some(head.to_string().as_str()));
    assert_eq!(first.report.as_ref().unwrap().stored_chunks, 2);
    assert_eq!(
        read_version_marker(&first.store_path).as_deref(),
        Some(head.to_string().as_str())
    );

    let seen = percents.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&100));

    let second = ingestor
        .ingest_with_provider(&locator, silent(), false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();
    assert_eq!(second.status, IngestStatus::Skipped);
    assert!(second.report.is_none());
    assert_eq!(second.store_path, first.store_path);

    let forced = ingestor
        .ingest_with_provider(&locator, silent(), true, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();
    assert_eq!(forced.status, IngestStatus::Updated);
    let store = LanceStore::open(&forced.store_path).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_new_commit_triggers_rebuild() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "Hello world\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let locator = origin.path().to_string_lossy().to_string();
    ingestor
        .ingest_with_provider(&locator, silent(), false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();

    let head = commit_file(&repo, "notes.txt", "more text\n");
    let outcome = ingestor
        .ingest_with_provider(&locator, silent(), false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestStatus::Updated);
    assert_eq!(outcome.version, Some(head.to_string()));
    assert_eq!(outcome.report.unwrap().stored_chunks, 2);
}

#[tokio::test]
async fn test_partial_embedding_failure_still_commits() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "Hello world\n");
    commit_file(&repo, "bad.py", "POISON = True\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let locator = origin.path().to_string_lossy().to_string();
    let outcome = ingestor
        .ingest_with_provider(
            &locator,
            silent(),
            false,
            Arc::new(HashEmbedder::poisoned("POISON")),
        )
        .await
        .unwrap();

    let report = outcome.report.unwrap();
    assert_eq!(outcome.status, IngestStatus::Updated);
    assert_eq!(report.total_chunks, 2);
    assert_eq!(report.stored_chunks, 1);
    assert_eq!(report.failed_batches, 1);
    assert!(version_marker_path(&outcome.store_path).exists());
}

#[tokio::test]
async fn test_total_embedding_failure_leaves_no_marker() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "POISON everywhere\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let locator = origin.path().to_string_lossy().to_string();
    let err = ingestor
        .ingest_with_provider(
            &locator,
            silent(),
            false,
            Arc::new(HashEmbedder::poisoned("POISON")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::Embedding(EmbeddingError::GenerationFailed(_))
    ));
    let location = ingestor.locate(&locator).unwrap();
    assert!(read_version_marker(&location.store_dir).is_none());
}

#[tokio::test]
async fn test_remove_repository_data() {
    let data = TempDir::new().unwrap();
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    commit_file(&repo, "README.md", "Hello world\n");

    let ingestor = Ingestor::new(test_config(data.path()));
    let locator = origin.path().to_string_lossy().to_string();
    let outcome = ingestor
        .ingest_with_provider(&locator, silent(), false, Arc::new(HashEmbedder::new()))
        .await
        .unwrap();
    assert!(outcome.store_path.exists());

    assert!(ingestor.remove_repository_data(&locator).await.unwrap());
    let location = ingestor.locate(&locator).unwrap();
    assert!(!location.store_dir.exists());
    assert!(!location.snapshot_dir.exists());

    assert!(!ingestor.remove_repository_data(&locator).await.unwrap());
}
