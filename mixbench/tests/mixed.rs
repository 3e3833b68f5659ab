use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixbench::{
    AutoTerm, Benchmark, Common, Distribution, Error, Generator, GeneratorConfig, Mixed, ObjectSize,
    OpType, RunOptions, State, run_benchmark, start_gate,
};
use mixbench_storage::{ClientPool, GetOptions, InMemoryStore, LocalFs, StorageClient};
use mixbench_test::faulty::{Call, FaultyStore};
use tokio_util::sync::CancellationToken;

const BUCKET: &str = "bench";

fn generator(size: u64) -> Generator {
    Generator::new(GeneratorConfig {
        buffer_size: 64 * 1024 + 1,
        compressible_chunk_size: 1024,
        seed: Some(7),
        ..GeneratorConfig::new(40, ObjectSize::Fixed(size))
    })
    .unwrap()
}

fn common(clients: ClientPool, concurrency: usize) -> Common {
    Common::new(BUCKET, concurrency, clients, generator(1000))
}

fn mix(put: f64, get: f64, stat: f64, delete: f64) -> Distribution {
    Distribution::new()
        .with(OpType::Put, put)
        .with(OpType::Get, get)
        .with(OpType::Stat, stat)
        .with(OpType::Delete, delete)
}

/// Runs the workload for a short while after preparing it.
async fn run_for(bench: &mut Mixed, duration: Duration) -> mixbench::Result<mixbench::Operations> {
    let token = CancellationToken::new();
    let (trigger, gate) = start_gate();
    let stopper = tokio::spawn({
        let token = token.clone();
        async move {
            trigger.release();
            tokio::select! {
                _ = tokio::time::sleep(duration) => token.cancel(),
                _ = token.cancelled() => {}
            }
        }
    });
    let result = bench.start(token.clone(), gate).await;
    token.cancel();
    stopper.await.unwrap();
    result
}

#[tokio::test]
async fn prepare_uploads_initial_dataset() {
    mixbench_test::tracing::init();
    let store = InMemoryStore::new("memory");
    store.insert(BUCKET, "leftover", "stale");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let mut common = common(ClientPool::single(store.clone()), 8);
    common.prepare_progress = Some(Arc::new({
        let progress = Arc::clone(&progress);
        move |fraction| progress.lock().unwrap().push(fraction)
    }));

    let mut bench = Mixed::new(common, 100, mix(1.0, 1.0, 0.0, 0.0)).unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    assert_eq!(bench.state(), State::Preparing);
    assert_eq!(bench.distribution().objects().len(), 100);
    assert_eq!(store.len(BUCKET), 100);
    assert!(!store.contains(BUCKET, "leftover"));

    for name in store.list_objects(BUCKET).await.unwrap() {
        assert!(name.ends_with(".crnd"), "{name}");
        assert!(bench.distribution().objects().contains(&name));
        assert_eq!(store.get_stored(BUCKET, &name).unwrap().len(), 1000);
    }

    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), 100);
    assert_eq!(progress.last().copied(), Some(1.0));
}

#[tokio::test]
async fn prepare_returns_first_upload_error() {
    mixbench_test::tracing::init();
    let store = FaultyStore::new("faulty").fail_every(Call::Put, 10);

    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        50,
        mix(1.0, 1.0, 0.0, 0.0),
    )
    .unwrap();
    let err = bench.prepare(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)), "{err}");
    assert_eq!(bench.state(), State::Failed);
    assert!(store.injected() >= 1);

    // a failing worker stops, but only that worker
    let uploaded = store.inner().len(BUCKET);
    assert!(uploaded < 50);
    assert_eq!(bench.distribution().objects().len(), uploaded);

    bench.cleanup().await;
    assert_eq!(bench.state(), State::Done);
    assert!(store.inner().is_empty(BUCKET));
}

#[tokio::test]
async fn prepare_detects_short_uploads() {
    let store = FaultyStore::new("faulty").short_write_every(5);
    let mut bench = Mixed::new(
        common(ClientPool::single(store), 1),
        20,
        mix(1.0, 0.0, 0.0, 0.0),
    )
    .unwrap();

    let err = bench.prepare(&CancellationToken::new()).await.unwrap_err();
    assert!(
        matches!(err, Error::ShortUpload { want: 1000, got: 500 }),
        "{err}"
    );
    assert_eq!(bench.distribution().objects().len(), 4);
}

#[tokio::test]
async fn mixed_workload_keeps_pool_and_store_in_sync() {
    mixbench_test::tracing::init();
    let store = InMemoryStore::new("memory");
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 8),
        100,
        mix(0.5, 0.3, 0.0, 0.2),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(200)).await.unwrap();
    assert_eq!(bench.state(), State::Running);
    assert!(!ops.is_empty());
    assert_eq!(ops.errors(), 0);

    let counts = ops.count_by_type();
    let puts = counts.get(&OpType::Put).copied().unwrap_or(0);
    let deletes = counts.get(&OpType::Delete).copied().unwrap_or(0);
    assert!(deletes <= puts + 100);
    assert_eq!(bench.distribution().objects().len(), 100 + puts - deletes);
    assert_eq!(store.len(BUCKET), 100 + puts - deletes);

    for op in &ops {
        assert!(op.start <= op.end);
        match op.op_type {
            OpType::Put | OpType::Get => assert_eq!(op.size, 1000),
            OpType::Delete | OpType::Stat => assert_eq!(op.size, 0),
        }
        if op.op_type == OpType::Get {
            assert!(op.time_to_first_byte().is_some());
        }
    }

    // every delete removed a distinct object
    let deleted: HashSet<_> = ops
        .filter_type(OpType::Delete)
        .into_iter()
        .map(|op| op.file)
        .collect();
    assert_eq!(deleted.len(), deletes);
}

#[tokio::test]
async fn failed_calls_are_recorded() {
    mixbench_test::tracing::init();
    let store = FaultyStore::new("faulty")
        .fail_every(Call::Get, 3)
        .fail_every(Call::Stat, 4);
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        20,
        mix(0.0, 1.0, 1.0, 0.0),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(100)).await.unwrap();
    assert!(ops.errors() > 0);
    assert_eq!(ops.errors(), store.injected());
    for op in &ops {
        if let Some(err) = &op.err {
            assert!(err.starts_with("storage error"), "{err}");
        }
    }
}

#[tokio::test]
async fn running_out_of_objects_aborts_the_run() {
    mixbench_test::tracing::init();
    let store = InMemoryStore::new("memory");
    let mut bench = Mixed::new(
        common(ClientPool::single(store), 2),
        3,
        mix(0.0, 0.0, 1.0, 0.0),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    // drain the pool behind the benchmark's back
    bench.distribution().objects().drain();

    let err = run_for(&mut bench, Duration::from_secs(60)).await;
    assert!(matches!(err, Err(Error::PoolExhausted)));
}

#[tokio::test]
async fn auto_term_stops_the_workload() {
    let store = InMemoryStore::new("memory");
    let mut common = common(ClientPool::single(store), 2);
    common.auto_term = Some(AutoTerm {
        samples: 1000,
        max_duration: Duration::from_millis(300),
        ..Default::default()
    });
    let mut bench = Mixed::new(common, 10, mix(0.0, 1.0, 0.0, 0.0)).unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let (trigger, gate) = start_gate();
    trigger.release();
    let ops = bench.start(CancellationToken::new(), gate).await.unwrap();
    assert!(!ops.is_empty());
}

#[tokio::test]
async fn requests_spread_across_endpoints() {
    let stores = [InMemoryStore::new("a"), InMemoryStore::new("b")];
    let clients = ClientPool::from_clients(
        stores
            .iter()
            .map(|store| Arc::new(store.clone()) as Arc<dyn StorageClient>),
    )
    .unwrap();

    // Both clients serve disjoint data, so only PUT can succeed regardless of the endpoint.
    let mut bench = Mixed::new(common(clients, 4), 0, mix(1.0, 0.0, 0.0, 0.0)).unwrap();
    for store in &stores {
        store.make_bucket(BUCKET).await.unwrap();
    }
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(100)).await.unwrap();
    let mut endpoints = ops.endpoints();
    endpoints.sort();
    endpoints.dedup();
    assert_eq!(endpoints, ["a", "b"]);
    assert_eq!(ops.errors(), 0);
}

#[tokio::test]
async fn run_benchmark_on_local_fs() {
    mixbench_test::tracing::init();
    let tempdir = tempfile::tempdir().unwrap();
    let store = LocalFs::new(tempdir.path());

    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        20,
        mix(0.45, 0.15, 0.3, 0.1),
    )
    .unwrap();
    let options = RunOptions {
        duration: Duration::from_millis(200),
        cleanup: true,
    };
    let ops = run_benchmark(&mut bench, options, CancellationToken::new())
        .await
        .unwrap();

    assert!(!ops.is_empty());
    assert_eq!(bench.state(), State::Done);
    assert!(store.list_objects(BUCKET).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_benchmark_cleans_up_after_failed_prepare() {
    let store = FaultyStore::new("faulty").fail_every(Call::Put, 1);
    store.inner().insert(BUCKET, "leftover", "stale");

    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 2),
        10,
        mix(1.0, 1.0, 0.0, 0.0),
    )
    .unwrap();
    let options = RunOptions {
        duration: Duration::from_secs(60),
        cleanup: true,
    };
    let result = run_benchmark(&mut bench, options, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(bench.state(), State::Done);
    assert!(store.inner().is_empty(BUCKET));
}

#[tokio::test]
async fn ranged_gets_check_the_range_length() {
    let store = InMemoryStore::new("memory");
    let mut bench = Mixed::new(
        common(ClientPool::single(store), 2),
        10,
        mix(0.0, 1.0, 0.0, 0.0),
    )
    .unwrap()
    .with_get_options(GetOptions {
        range: Some(100..300),
    });
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(50)).await.unwrap();
    assert!(!ops.is_empty());
    assert_eq!(ops.errors(), 0);
}

#[tokio::test]
async fn interrupted_run_still_cleans_up() {
    mixbench_test::tracing::init();
    let store = InMemoryStore::new("memory");
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        50,
        mix(0.5, 0.3, 0.0, 0.2),
    )
    .unwrap();

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        }
    });

    let options = RunOptions {
        duration: Duration::from_secs(60),
        cleanup: true,
    };
    let ops = run_benchmark(&mut bench, options, token).await.unwrap();

    assert!(!ops.is_empty());
    assert_eq!(bench.state(), State::Done);
    assert!(store.is_empty(BUCKET));
    assert!(bench.distribution().objects().is_empty());
}

#[tokio::test]
async fn failed_puts_stay_out_of_the_pool() {
    mixbench_test::tracing::init();
    let store = FaultyStore::new("faulty").fail_every(Call::Put, 3);
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        0,
        mix(1.0, 0.0, 0.0, 0.0),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(100)).await.unwrap();
    assert!(ops.errors() > 0);
    assert_eq!(ops.errors(), store.injected());

    let pool = bench.distribution().objects();
    assert_eq!(pool.len(), ops.len() - ops.errors());
    assert_eq!(store.inner().len(BUCKET), pool.len());
    for op in &ops {
        assert_eq!(pool.contains(&op.file), !op.is_err(), "{}", op.file);
    }
}

#[tokio::test]
async fn short_writes_fail_the_put() {
    let store = FaultyStore::new("faulty").short_write_every(3);
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        0,
        mix(1.0, 0.0, 0.0, 0.0),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(50)).await.unwrap();
    assert!(ops.errors() > 0);
    assert_eq!(ops.errors(), store.injected());

    let pool = bench.distribution().objects();
    assert_eq!(pool.len(), ops.len() - ops.errors());
    for op in &ops {
        match &op.err {
            Some(err) => {
                assert_eq!(err, "short upload. want: 1000, got: 500");
                assert!(!pool.contains(&op.file));
                // the truncated object still reached the store
                assert!(store.inner().contains(BUCKET, &op.file));
            }
            None => assert!(pool.contains(&op.file)),
        }
    }
}

#[tokio::test]
async fn failed_deletes_are_recorded() {
    mixbench_test::tracing::init();
    let store = FaultyStore::new("faulty").fail_every(Call::Remove, 2);
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        100,
        mix(0.6, 0.0, 0.0, 0.4),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(100)).await.unwrap();
    let deletes = ops.filter_type(OpType::Delete);
    assert!(deletes.errors() > 0);
    assert_eq!(ops.errors(), deletes.errors());
    assert_eq!(deletes.errors(), store.injected());

    for op in &deletes {
        assert!(!bench.distribution().objects().contains(&op.file));
        // only failed deletes leave the object behind
        assert_eq!(store.inner().contains(BUCKET, &op.file), op.is_err());
        if let Some(err) = &op.err {
            assert!(err.starts_with("storage error"), "{err}");
        }
    }
}

#[tokio::test]
async fn size_mismatches_are_recorded() {
    mixbench_test::tracing::init();
    let store = FaultyStore::new("faulty")
        .truncate_gets_every(3)
        .misreport_size_every(4);
    let mut bench = Mixed::new(
        common(ClientPool::single(store.clone()), 4),
        20,
        mix(0.0, 1.0, 1.0, 0.0),
    )
    .unwrap();
    bench.prepare(&CancellationToken::new()).await.unwrap();

    let ops = run_for(&mut bench, Duration::from_millis(100)).await.unwrap();
    assert!(ops.filter_type(OpType::Get).errors() > 0);
    assert!(ops.filter_type(OpType::Stat).errors() > 0);
    assert_eq!(ops.errors(), store.injected());

    for op in &ops {
        let Some(err) = &op.err else { continue };
        match op.op_type {
            OpType::Get => assert_eq!(err, "unexpected GET size. want: 1000, got: 500"),
            OpType::Stat => assert_eq!(err, "unexpected STAT size. want: 1000, got: 1001"),
            other => panic!("unexpected {other} failure: {err}"),
        }
    }

    // corrupted responses do not touch the dataset
    assert_eq!(bench.distribution().objects().len(), 20);
    assert_eq!(store.inner().len(BUCKET), 20);
}
