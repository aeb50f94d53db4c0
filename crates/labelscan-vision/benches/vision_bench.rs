// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the labelscan-vision crate: the preprocessing
// pipeline on a label-sized photo and the native linear decoder.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, Rgba, RgbaImage};

use labelscan_core::config::PreprocessConfig;
use labelscan_core::types::BarcodeFormat;
use labelscan_vision::barcode::linear::{LinearEngine, synthesize_ean13};
use labelscan_vision::{ImageSource, preprocess};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Full pipeline on a 2000x1200 colour image with text-like stripes, so the
/// resize, threshold and rotation scorer all do real work.
fn bench_preprocess(c: &mut Criterion) {
    let (width, height) = (2000u32, 1200u32);
    let img = RgbaImage::from_fn(width, height, |x, y| {
        if (y / 24) % 2 == 0 && x < width * 7 / 10 && ((x / 5) * 31 + (y / 5) * 17) % 7 < 3 {
            Rgba([20, 20, 30, 255])
        } else {
            Rgba([235, 230, 220, 255])
        }
    });
    let source = ImageSource::Image(DynamicImage::ImageRgba8(img));
    let config = PreprocessConfig::default();

    c.bench_function("preprocess (2000x1200 rgba)", |b| {
        b.iter(|| {
            let out = preprocess(black_box(&source), &config).unwrap();
            black_box(out.meta);
        });
    });
}

/// Linear decode of a clean synthesized EAN-13 at 3 px per module.
fn bench_linear_decode(c: &mut Criterion) {
    let frame = synthesize_ean13("5901234123457", 3, 120).unwrap();
    let formats = BarcodeFormat::ALL;

    c.bench_function("linear_decode (ean13, 345x120)", |b| {
        b.iter(|| {
            black_box(LinearEngine::decode(black_box(&frame), &formats));
        });
    });
}

criterion_group!(benches, bench_preprocess, bench_linear_decode);
criterion_main!(benches);
