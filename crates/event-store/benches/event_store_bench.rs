use chrono::Utc;
use common::{AggregateId, PartitionKey};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    Commit, CommitRange, EventReader, EventWriter, FeedSource, InMemoryEventStore,
    SequenceNumber, SerializedEvent, validate_commits,
};

fn make_commit(aggregate_id: AggregateId, commit_sequence: i64, events_per_commit: i64) -> Commit {
    let first = (commit_sequence - 1) * events_per_commit + 1;
    let events = (first..first + events_per_commit)
        .map(|seq| {
            SerializedEvent::new(
                "ledger.deposited",
                SequenceNumber::new(seq),
                Utc::now(),
                serde_json::json!({ "amount": 10 }),
            )
        })
        .collect();

    Commit::new(
        aggregate_id,
        PartitionKey::from("bench"),
        SequenceNumber::new(commit_sequence),
        Utc::now(),
        events,
    )
    .unwrap()
}

fn populate(rt: &tokio::runtime::Runtime, store: &InMemoryEventStore, aggregate_id: AggregateId, commits: i64) {
    rt.block_on(async {
        for seq in 1..=commits {
            store
                .write_commit(make_commit(aggregate_id, seq, 1))
                .await
                .unwrap();
        }
    });
}

fn bench_write_single_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/write_single_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .write_commit(make_commit(AggregateId::new(), 1, 1))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_write_commit_of_10_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/write_commit_10_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .write_commit(make_commit(AggregateId::new(), 1, 10))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_validate_100_commits(c: &mut Criterion) {
    let aggregate_id = AggregateId::new();
    let commits: Vec<Commit> = (1..=100).map(|seq| make_commit(aggregate_id, seq, 3)).collect();

    c.bench_function("event_store/validate_100_commits", |b| {
        b.iter(|| {
            validate_commits(
                &commits,
                aggregate_id,
                SequenceNumber::initial(),
                SequenceNumber::initial(),
            )
            .unwrap();
        });
    });
}

fn bench_read_commits(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let aggregate_id = AggregateId::new();
    populate(&rt, &store, aggregate_id, 100);

    c.bench_function("event_store/read_100_commits", |b| {
        b.iter(|| {
            rt.block_on(async {
                let range = CommitRange::new(
                    aggregate_id,
                    PartitionKey::from("bench"),
                    SequenceNumber::first(),
                    SequenceNumber::MAX,
                    100,
                );
                store.read_commits(range).await.unwrap();
            });
        });
    });
}

fn bench_fetch_feed_pages(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new().with_feed_page_size(100);

    // 1000 commits across 10 aggregates
    for _ in 0..10 {
        populate(&rt, &store, AggregateId::new(), 100);
    }

    c.bench_function("event_store/fetch_1000_feed_commits", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut continuation = None;
                let mut count = 0;
                loop {
                    let page = store.fetch_page(0, continuation.as_deref()).await.unwrap();
                    count += page.commits.len();
                    match page.next {
                        Some(next) => continuation = Some(next),
                        None => break,
                    }
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_write_single_commit,
    bench_write_commit_of_10_events,
    bench_validate_100_commits,
    bench_read_commits,
    bench_fetch_feed_pages,
);
criterion_main!(benches);
