use criterion::{Criterion, black_box, criterion_group, criterion_main};
use govingest_core::coerce::{FieldKind, clean_value, parse_date};
use govingest_core::contract::SchemaField;
use govingest_core::hash::content_hash;
use govingest_core::record::{RawRow, RecordBatch, Value};
use govingest_core::validate::SchemaValidator;

fn registry_batch(rows: usize) -> RecordBatch {
    let mut batch = RecordBatch::new();
    for i in 0..rows {
        let row: RawRow = [
            ("name".to_string(), Value::text(format!("Product {i}"))),
            ("vendor_inn".to_string(), Value::text(format!("77{i:08}"))),
            ("price".to_string(), Value::Number(i as f64 * 1.5)),
            ("is_domestic".to_string(), Value::Bool(i % 3 != 0)),
        ]
        .into_iter()
        .collect();
        batch.push(row);
    }
    batch
}

fn bench_coercion(c: &mut Criterion) {
    c.bench_function("clean_identifier", |b| {
        b.iter(|| clean_value(black_box(" 77-01 234 567 "), FieldKind::Identifier))
    });

    c.bench_function("clean_date_fallback", |b| {
        b.iter(|| clean_value(black_box("2024-03-15"), FieldKind::Date))
    });

    c.bench_function("parse_date_invalid", |b| {
        b.iter(|| parse_date(black_box("31.02.2024")))
    });

    c.bench_function("clean_boolean", |b| {
        b.iter(|| clean_value(black_box("Да"), FieldKind::Boolean))
    });
}

fn bench_content_hash(c: &mut Criterion) {
    let small = registry_batch(100);
    let large = registry_batch(10_000);

    c.bench_function("content_hash_100_rows", |b| {
        b.iter(|| content_hash(black_box(&small)))
    });

    c.bench_function("content_hash_10k_rows", |b| {
        b.iter(|| content_hash(black_box(&large)))
    });
}

fn bench_validation(c: &mut Criterion) {
    let batch = registry_batch(10_000);
    let schema = vec![
        SchemaField::required("name"),
        SchemaField::required("vendor_inn"),
        SchemaField::optional("price"),
    ];
    let validator = SchemaValidator::new(0.0);

    c.bench_function("validate_10k_rows", |b| {
        b.iter(|| validator.validate(black_box("reestr_po"), black_box(&batch), &schema))
    });
}

criterion_group!(benches, bench_coercion, bench_content_hash, bench_validation);
criterion_main!(benches);
