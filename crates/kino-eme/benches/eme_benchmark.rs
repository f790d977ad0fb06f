//! Benchmark tests for kino-eme operations
//!
//! Run with: cargo bench -p kino-eme

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kino_eme::config::{normalize, EmeOptions, KeySystemConfig};
use kino_eme::fairplay::{concat_init_data_id_and_certificate, split_init_data_id_and_certificate};
use kino_eme::http::{merge_headers, HeaderOverrides};
use kino_eme::negotiate::supported_configurations;

// ============================================================================
// Helpers
// ============================================================================

fn header_layer(prefix: &str, count: usize) -> HeaderOverrides {
    (0..count)
        .map(|i| (format!("X-{}-{}", prefix, i), Some(format!("value-{}", i))))
        .collect()
}

fn detailed_config() -> KeySystemConfig {
    KeySystemConfig::license_url("https://license.example.com/widevine")
        .with_certificate_uri("https://license.example.com/cert")
        .with_license_header("X-Custom-Data", "token")
        .with_video("video/mp4; codecs=\"avc1.640028\"", Some("SW_SECURE_DECODE"))
        .with_audio("audio/mp4; codecs=\"mp4a.40.2\"", Some("SW_SECURE_CRYPTO"))
}

// ============================================================================
// Configuration
// ============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Normalize");

    group.bench_function("bare_url", |b| {
        b.iter(|| black_box(normalize("com.widevine.alpha", "https://license.example.com").unwrap()))
    });

    let config = detailed_config();
    group.bench_function("detailed", |b| {
        b.iter(|| black_box(normalize("com.widevine.alpha", config.clone()).unwrap()))
    });

    let json = r#"{
        "key_systems": {
            "com.widevine.alpha": "https://wv.example.com/license",
            "com.microsoft.playready": { "url": "https://pr.example.com/license" },
            "org.w3.clearkey": { "license_uri": "https://ck.example.com" }
        },
        "eme_headers": { "X-Session": "abc" }
    }"#;
    group.bench_function("options_from_json", |b| {
        b.iter(|| {
            let options = EmeOptions::from_json(black_box(json)).unwrap();
            black_box(options.normalize_key_systems().unwrap())
        })
    });

    group.finish();
}

fn bench_capabilities(c: &mut Criterion) {
    let config = detailed_config();
    c.bench_function("supported_configurations", |b| {
        b.iter(|| black_box(supported_configurations("com.widevine.alpha", &config)))
    });
}

// ============================================================================
// Headers
// ============================================================================

fn bench_merge_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Merge Headers");

    for &count in &[1, 8, 32] {
        let defaults = header_layer("default", count);
        let global = header_layer("global", count);
        let per_system = header_layer("default", count);
        group.bench_with_input(BenchmarkId::new("three_layers", count), &count, |b, _| {
            b.iter(|| black_box(merge_headers([&defaults, &global, &per_system])))
        });
    }

    group.finish();
}

// ============================================================================
// FairPlay
// ============================================================================

fn bench_fairplay(c: &mut Criterion) {
    let mut group = c.benchmark_group("FairPlay Init Data");

    for &cert_size in &[1024usize, 4096, 16384] {
        let init_data = vec![0x42u8; 256];
        let certificate = vec![0x7fu8; cert_size];

        group.bench_with_input(BenchmarkId::new("concat", cert_size), &cert_size, |b, _| {
            b.iter(|| {
                black_box(concat_init_data_id_and_certificate(
                    &init_data,
                    "skd://asset-1",
                    &certificate,
                ))
            })
        });

        let packed = concat_init_data_id_and_certificate(&init_data, "skd://asset-1", &certificate);
        group.bench_with_input(BenchmarkId::new("split", cert_size), &cert_size, |b, _| {
            b.iter(|| black_box(split_init_data_id_and_certificate(&packed, init_data.len()).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(config_benches, bench_normalize, bench_capabilities);

criterion_group!(header_benches, bench_merge_headers);

criterion_group!(fairplay_benches, bench_fairplay);

criterion_main!(config_benches, header_benches, fairplay_benches);
