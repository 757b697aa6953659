/*
    Measures the cost of turning OTLP resource logs into table rows.

    Run with:
    cargo bench --bench transform
*/

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use opentelemetry_exporter_cassandra::transform;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, KeyValueList};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;
use std::hint::black_box;

fn kv(key: &str, value: Value) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

fn record(i: usize) -> LogRecord {
    LogRecord {
        time_unix_nano: 1_700_000_000_000_000_000 + i as u64,
        severity_number: 9,
        severity_text: "INFO".to_string(),
        trace_id: vec![0xab; 16],
        span_id: vec![0xcd; 8],
        flags: 1,
        body: Some(AnyValue {
            value: Some(Value::StringValue(format!("request {i} handled"))),
        }),
        attributes: vec![
            kv("http.method", Value::StringValue("GET".to_string())),
            kv("http.status_code", Value::IntValue(200)),
            kv(
                "http.request",
                Value::KvlistValue(KeyValueList {
                    values: vec![
                        kv("path", Value::StringValue("/checkout".to_string())),
                        kv("size", Value::IntValue(512)),
                    ],
                }),
            ),
        ],
        ..Default::default()
    }
}

fn batch(records: usize) -> Vec<ResourceLogs> {
    vec![ResourceLogs {
        resource: Some(Resource {
            attributes: vec![
                kv("service.name", Value::StringValue("checkout".to_string())),
                kv("host.name", Value::StringValue("node-1".to_string())),
            ],
            ..Default::default()
        }),
        scope_logs: vec![ScopeLogs {
            log_records: (0..records).map(record).collect(),
            ..Default::default()
        }],
        ..Default::default()
    }]
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");

    for size in [1, 100] {
        let input = batch(size);
        group.bench_function(format!("{size}_records"), |b| {
            b.iter(|| black_box(transform(black_box(&input)).count()));
        });
    }

    group.bench_function("100_records_collect", |b| {
        b.iter_batched(
            || batch(100),
            |input| transform(&input).collect::<Vec<_>>(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
