use chrono::Utc;
use common::{AggregateId, PartitionKey};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    CancellationToken, Commit, EventFeed, EventWriter, FeedFilter, InMemoryEventStore,
    SequenceNumber, SerializedEvent,
};
use feed::{AllStreamIndexer, InMemoryAllStream, IndexerConfig, PagedFeed};

fn create_commit(aggregate_id: AggregateId, sequence: i64) -> Commit {
    Commit::new(
        aggregate_id,
        PartitionKey::from("bench"),
        SequenceNumber::new(sequence),
        Utc::now(),
        vec![SerializedEvent::new(
            "bench.recorded",
            SequenceNumber::new(sequence),
            Utc::now(),
            serde_json::json!({ "seq": sequence }),
        )],
    )
    .unwrap()
}

/// Writes `aggregates` x `commits` commits, interleaved.
fn populate(rt: &tokio::runtime::Runtime, store: &InMemoryEventStore, aggregates: usize, commits: i64) {
    let ids: Vec<AggregateId> = (0..aggregates).map(|_| AggregateId::new()).collect();
    rt.block_on(async {
        for seq in 1..=commits {
            for id in &ids {
                store.write_commit(create_commit(*id, seq)).await.unwrap();
            }
        }
    });
}

fn bench_drain_feed(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new().with_feed_page_size(100);
    populate(&rt, &store, 10, 100);
    let feed = PagedFeed::new(store);
    let cancel = CancellationToken::new();

    c.bench_function("feed/drain_1000_commits_batch_64", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut batch = feed.get(FeedFilter::new(), 64, &cancel).await.unwrap();
                while !batch.commits.is_empty() {
                    batch = feed.get_from(&batch.checkpoint, &cancel).await.unwrap();
                }
            });
        });
    });
}

fn bench_filtered_feed(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new().with_feed_page_size(100);
    populate(&rt, &store, 10, 100);
    let target = rt.block_on(store.commits_after(0, 1))[0].1.aggregate_id;
    let feed = PagedFeed::new(store);
    let cancel = CancellationToken::new();

    c.bench_function("feed/filter_one_aggregate_of_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                feed.get(FeedFilter::for_aggregates([target]), 1000, &cancel)
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_indexer_round(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let east = InMemoryEventStore::new();
    let west = InMemoryEventStore::new();
    populate(&rt, &east, 5, 100);
    populate(&rt, &west, 5, 100);
    let cancel = CancellationToken::new();

    c.bench_function("feed/index_two_inputs_1000_commits", |b| {
        b.iter(|| {
            rt.block_on(async {
                let config = IndexerConfig {
                    batch_size: 500,
                    ..IndexerConfig::default()
                };
                let indexer = AllStreamIndexer::new(InMemoryAllStream::new(), config)
                    .with_input("east", east.clone())
                    .with_input("west", west.clone());
                indexer.run_once(&cancel).await.unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_drain_feed,
    bench_filtered_feed,
    bench_indexer_round,
);
criterion_main!(benches);
