// Transaction and reply decoding benchmarks for kvscript

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvscript::handler::decode_entities;
use kvscript::keys::{model_key, string_index_key, string_index_member};
use kvscript::transport::Args;
use kvscript::{
    Catalog, Client, EntityMaterializer, MemoryStore, OrderKind, Reply, ReplyHandler, ReplySlot,
};
use std::hint::black_box;
use std::sync::Arc;

fn setup() -> (Arc<MemoryStore>, Client) {
    let catalog = Arc::new(Catalog::builtin().unwrap());
    let store = Arc::new(MemoryStore::new());
    catalog.preload(store.as_ref()).unwrap();
    (Arc::clone(&store), Client::new(catalog, store))
}

fn seed_users(store: &MemoryStore, count: usize) {
    use rand::Rng;
    let mut rng = rand::rng();

    for i in 0..count {
        let id = format!("{:08}", i);
        let name = format!("user{:08}", rng.random::<u32>());
        store.execute_command(
            "HSET",
            Args::new().arg(model_key("User", &id)).arg("name").arg(name.as_str()).arg("age").arg(i),
        );
        store.execute_command("SADD", Args::new().arg("User:all").arg(id.as_str()));
        store.execute_command(
            "ZADD",
            Args::new()
                .arg(string_index_key("User", "name"))
                .arg(0)
                .arg(string_index_member(&name, &id)),
        );
    }
}

fn benchmark_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (_store, client) = setup();
            b.iter(|| {
                let mut tx = client.transaction();
                for i in 0..size {
                    let id = i.to_string();
                    tx.save_model_fields("User", &id, [("name", "bench")]).unwrap();
                    tx.enqueue("SADD", Args::new().arg("User:all").arg(id.as_str())).unwrap();
                }
                tx.execute().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_find_models_by_set_ids(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_models_by_set_ids");

    for size in [10, 100, 1000].iter() {
        let (store, client) = setup();
        seed_users(&store, *size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let materializer = Arc::new(EntityMaterializer);
            b.iter(|| {
                let users = ReplySlot::new();
                let mut tx = client.transaction();
                tx.find_models_by_set_ids(
                    "User:all",
                    "User",
                    0,
                    0,
                    ReplyHandler::entities("User", Arc::clone(&materializer), &users),
                )
                .unwrap();
                tx.execute().unwrap();
                black_box(users.take());
            });
        });
    }

    group.finish();
}

fn benchmark_extract_ids(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_ids_from_string_index");
    let (store, client) = setup();
    seed_users(&store, 1000);
    let index = string_index_key("User", "name");

    for order in [OrderKind::Ascending, OrderKind::Descending] {
        group.bench_function(order.as_str(), |b| {
            b.iter(|| {
                let ids = ReplySlot::new();
                let mut tx = client.transaction();
                tx.extract_ids_from_string_index(&index, order, ReplyHandler::ids(&ids)).unwrap();
                tx.execute().unwrap();
                black_box(ids.take());
            });
        });
    }

    group.finish();
}

fn benchmark_decode_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_entities");

    for size in [100, 1000].iter() {
        let reply = Reply::Array(
            (0..*size)
                .map(|i| {
                    Reply::Array(vec![
                        Reply::bulk("id"),
                        Reply::bulk(i.to_string()),
                        Reply::bulk("name"),
                        Reply::bulk(format!("user{}", i)),
                    ])
                })
                .collect(),
        );

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &reply, |b, reply| {
            b.iter(|| black_box(decode_entities(reply.clone()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_batched_writes,
    benchmark_find_models_by_set_ids,
    benchmark_extract_ids,
    benchmark_decode_entities
);
criterion_main!(benches);
