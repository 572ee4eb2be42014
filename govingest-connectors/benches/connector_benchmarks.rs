use criterion::{Criterion, black_box, criterion_group, criterion_main};
use govingest_connectors::delimited::{decode, parse_delimited};
use govingest_connectors::document::rules::{CompiledRule, apply_rules};
use govingest_connectors::paged_api::{extract_items, flatten_item};
use govingest_core::contract::{DelimitedOptions, ExtractionRule};
use serde_json::json;

fn csv_export(rows: usize) -> String {
    let mut text = String::from("Реестровый номер;ИНН заказчика;Цена контракта;Дата заключения\n");
    for i in 0..rows {
        text.push_str(&format!(
            "0373100{i:012};77{i:08};{}.50;15.03.2024\n",
            1000 + i
        ));
    }
    text
}

fn bench_delimited(c: &mut Criterion) {
    let options = DelimitedOptions {
        delimiter: ";".into(),
        ..DelimitedOptions::default()
    };
    let text = csv_export(5_000);
    let (cp1251, _, _) = encoding_rs::WINDOWS_1251.encode(&text);

    c.bench_function("decode_windows_1251", |b| {
        b.iter(|| decode(black_box(&cp1251), "windows-1251"))
    });

    c.bench_function("parse_delimited_5k_rows", |b| {
        b.iter(|| parse_delimited(black_box(&text), &options))
    });
}

fn bench_paged_api(c: &mut Criterion) {
    let items: Vec<_> = (0..1000)
        .map(|i| {
            json!({
                "region": {"code": format!("{:02}", i % 89), "name": "Республика Дагестан"},
                "period": 2023,
                "value": i as f64 * 0.5,
                "tags": ["a", "b"],
            })
        })
        .collect();
    let page = json!({"data": items, "has_next": true});

    c.bench_function("flatten_page_1000_items", |b| {
        b.iter(|| {
            extract_items(black_box(&page))
                .into_iter()
                .map(flatten_item)
                .count()
        })
    });
}

fn bench_document_rules(c: &mut Criterion) {
    let rules: Vec<_> = [
        (r"Извещение\s+№\s*(\d{11,19})", "notice_number", None),
        (r"Заказчик:\s*(.+)$", "customer", None),
        (r"Дата\s+размещения:\s*(\d{2}\.\d{2}\.\d{4})", "publication_date", Some("%d.%m.%Y")),
    ]
    .into_iter()
    .map(|(pattern, field, format)| {
        CompiledRule::compile(&ExtractionRule {
            pattern: pattern.into(),
            field: field.into(),
            format: format.map(String::from),
        })
        .unwrap()
    })
    .collect();
    let text = "Извещение № 0373100012324000123\nЗаказчик: ГБУ Центр\n\
                Дата размещения: 15.03.2024\n"
        .repeat(50);

    c.bench_function("apply_rules_notice_text", |b| {
        b.iter(|| apply_rules(black_box(&text), &rules))
    });
}

criterion_group!(benches, bench_delimited, bench_paged_api, bench_document_rules);
criterion_main!(benches);
