use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use orderflow_core::{BoxId, DimensionUnit, Dimensions, OrderItemId, Weight, WeightUnit};
use orderflow_packaging::{BoxDefinition, DivideItem, DividerSettings, divide};

fn boxes() -> Vec<BoxDefinition> {
    [24u32, 48, 96, 144]
        .into_iter()
        .map(|max_quantity| BoxDefinition {
            id: BoxId::new(),
            name: format!("{max_quantity}-count"),
            max_quantity,
            dimensions: Dimensions::new(18.0, 12.0, 10.0, DimensionUnit::In),
        })
        .collect()
}

fn items(lines: usize) -> Vec<DivideItem> {
    (0..lines)
        .map(|i| DivideItem {
            order_item_id: OrderItemId::new(),
            sku_quantity: (i % 6 + 1) as u32,
            quantity: 40 + (i as u32 * 7) % 90,
            unit_weight: Weight::new(0.35, WeightUnit::Kg),
        })
        .collect()
}

fn bench_divide(c: &mut Criterion) {
    let boxes = boxes();
    let settings = DividerSettings::default();
    let mut group = c.benchmark_group("divide");
    for lines in [1usize, 10, 100] {
        let items = items(lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &items, |b, items| {
            b.iter(|| divide(black_box(items), black_box(&boxes), &settings))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_divide);
criterion_main!(benches);
