use criterion::{Criterion, criterion_group, criterion_main};
use dirsift::analyzer::{FeatureRow, get_features, preprocess};
use dirsift::cluster::identify_not_found;

fn sample_rows() -> Vec<FeatureRow> {
    let mut rows = Vec::new();
    for i in 0..300 {
        let body = format!(
            "<html><head><title>Not Found</title></head><body>page {i} is missing</body></html>"
        );
        rows.push(FeatureRow {
            features: get_features(
                b"http://example.com/missing",
                200,
                body.len(),
                body.as_bytes(),
            ),
            url: format!("http://example.com/missing{i}"),
            content_type: "text/html".to_string(),
        });
    }
    rows
}

fn bench_feature_extraction(c: &mut Criterion) {
    let body =
        br#"<html><head><title>404 Not Found</title></head><body>404 Not Found</body></html>"#;

    c.bench_function("feature_extraction", |b| {
        b.iter(|| get_features(b"http://example.com/some/path", 404, body.len(), body))
    });
}

fn bench_clustering(c: &mut Criterion) {
    let matrix = preprocess(&sample_rows());

    c.bench_function("dbscan_clustering", |b| b.iter(|| identify_not_found(&matrix)));
}

criterion_group!(benches, bench_feature_extraction, bench_clustering);
criterion_main!(benches);
