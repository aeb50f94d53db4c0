// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Native EAN-13 / UPC-A / EAN-8 decoder.
//
// Samples horizontal scanlines, turns each into bar/space run lengths, locates
// guard patterns and matches every 4-run digit against the width tables.
// Symbols read upside-down are handled by decoding the mirrored run order.
// Only codes with a valid check digit are reported; confidence is the share
// of decoded scanlines that agree on the winning code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use image::{GrayImage, Luma};
use labelscan_core::types::BarcodeFormat;
use tracing::debug;

use super::engine::{BarcodeEngine, EngineError, EngineHit};

/// Widths (space, bar, space, bar) of the L-code digits. R-codes share these
/// widths starting with a bar; G-codes are the reversed widths.
const L_WIDTHS: [[u8; 4]; 10] = [
    [3, 2, 1, 1],
    [2, 2, 2, 1],
    [2, 1, 2, 2],
    [1, 4, 1, 1],
    [1, 1, 3, 2],
    [1, 2, 3, 1],
    [1, 1, 1, 4],
    [1, 3, 1, 2],
    [1, 2, 1, 3],
    [3, 1, 1, 2],
];

/// Parity of the six left-hand digits, indexed by the implied first digit.
const FIRST_DIGIT_PARITY: [[Table; 6]; 10] = {
    use Table::{G, L};
    [
        [L, L, L, L, L, L],
        [L, L, G, L, G, G],
        [L, L, G, G, L, G],
        [L, L, G, G, G, L],
        [L, G, L, L, G, G],
        [L, G, G, L, L, G],
        [L, G, G, G, L, G],
        [L, G, L, G, L, G],
        [L, G, L, G, G, L],
        [L, G, G, L, G, L],
    ]
};

/// Largest squared width error a digit match may have (in modules²).
const MAX_DIGIT_ERROR: f32 = 1.2;

/// Minimum contrast (max - min luminance) for a scanline to be considered.
const MIN_CONTRAST: u8 = 40;

/// Scanlines sampled per frame.
const SCANLINES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    L,
    G,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    dark: bool,
    len: f32,
}

/// Scanline decoder for the linear retail symbologies.
#[derive(Debug, Default, Clone)]
pub struct LinearEngine;

impl LinearEngine {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous decode of one frame.
    pub fn decode(image: &GrayImage, formats: &[BarcodeFormat]) -> Option<EngineHit> {
        let (width, height) = image.dimensions();
        if width < 67 || height == 0 {
            return None;
        }

        let lines = SCANLINES.min(height);
        let mut votes: HashMap<(String, BarcodeFormat), usize> = HashMap::new();
        let mut decoded_lines = 0usize;

        for k in 0..lines {
            let y = (height as u64 * (k as u64 + 1) / (lines as u64 + 1)) as u32;
            let row: Vec<u8> = (0..width).map(|x| image.get_pixel(x, y).0[0]).collect();
            if let Some(hit) = decode_row(&row, formats) {
                decoded_lines += 1;
                *votes.entry(hit).or_default() += 1;
            }
        }

        let ((code, format), count) = votes.into_iter().max_by_key(|(_, count)| *count)?;
        let confidence = count as f32 / decoded_lines as f32;
        debug!(%code, %format, count, decoded_lines, "Linear symbol decoded");
        Some(EngineHit {
            code,
            format,
            confidence,
        })
    }
}

#[async_trait]
impl BarcodeEngine for LinearEngine {
    fn id(&self) -> &'static str {
        "linear"
    }

    fn supports(&self, format: BarcodeFormat) -> bool {
        format.is_linear()
    }

    async fn detect(
        &self,
        image: Arc<GrayImage>,
        formats: &[BarcodeFormat],
    ) -> Result<Option<EngineHit>, EngineError> {
        let formats = formats.to_vec();
        let hit = tokio::task::spawn_blocking(move || Self::decode(&image, &formats)).await?;
        Ok(hit)
    }
}

/// Decode one scanline, forwards then mirrored. The mirrored pass reads the
/// same runs; `read_symbol` undoes the reversal.
fn decode_row(row: &[u8], formats: &[BarcodeFormat]) -> Option<(String, BarcodeFormat)> {
    let runs = to_runs(row)?;
    decode_runs(&runs, formats, false).or_else(|| decode_runs(&runs, formats, true))
}

/// Binarize at the row's luminance midpoint and collapse into runs.
fn to_runs(row: &[u8]) -> Option<Vec<Run>> {
    let min = *row.iter().min()?;
    let max = *row.iter().max()?;
    if max - min < MIN_CONTRAST {
        return None;
    }
    let mid = ((min as u16 + max as u16) / 2) as u8;

    let mut runs: Vec<Run> = Vec::new();
    for &px in row {
        let dark = px < mid;
        match runs.last_mut() {
            Some(run) if run.dark == dark => run.len += 1.0,
            _ => runs.push(Run { dark, len: 1.0 }),
        }
    }
    Some(runs)
}

fn decode_runs(
    runs: &[Run],
    formats: &[BarcodeFormat],
    mirrored: bool,
) -> Option<(String, BarcodeFormat)> {
    let want_13 = formats
        .iter()
        .any(|f| matches!(f, BarcodeFormat::Ean13 | BarcodeFormat::UpcA));
    let want_8 = formats.contains(&BarcodeFormat::Ean8);

    for i in 1..runs.len().saturating_sub(2) {
        let guard = &runs[i..i + 3];
        if !guard[0].dark {
            continue;
        }
        let module = guard.iter().map(|r| r.len).sum::<f32>() / 3.0;
        if !is_guard(guard, module) || runs[i - 1].len < module * 3.0 {
            continue;
        }
        let body = &runs[i + 3..];

        if want_13 {
            if let Some(digits) = read_symbol(body, module, 6, mirrored) {
                if let Some(found) = finish_ean13(&digits, formats) {
                    return Some(found);
                }
            }
        }
        if want_8 {
            if let Some(digits) = read_symbol(body, module, 4, mirrored) {
                if checksum_ok(&digits) {
                    return Some((digits_to_string(&digits), BarcodeFormat::Ean8));
                }
            }
        }
    }
    None
}

/// Read `half` digits, the centre guard, `half` digits and the end guard.
///
/// Returns the digits in logical order. For EAN-13 the first element is the
/// first digit implied by the left-hand parity; for EAN-8 all digits are
/// explicit.
fn read_symbol(body: &[Run], module: f32, half: usize, mirrored: bool) -> Option<Vec<u8>> {
    let needed = half * 4 + 5 + half * 4 + 3;
    if body.len() < needed {
        return None;
    }

    let first = read_digits(&body[..half * 4], module)?;
    let centre = &body[half * 4..half * 4 + 5];
    if centre[0].dark || !is_guard(centre, module) {
        return None;
    }
    let second_start = half * 4 + 5;
    let second = read_digits(&body[second_start..second_start + half * 4], module)?;
    let end = &body[second_start + half * 4..needed];
    if !is_guard(end, module) {
        return None;
    }

    // Mirrored reading sees the right half first, each R-code reversed (which
    // reads as a G-code) and the left half with L/G swapped.
    let (left, right): (Vec<(u8, Table)>, Vec<(u8, Table)>) = if mirrored {
        let right: Vec<_> = first.into_iter().rev().collect();
        let left: Vec<_> = second
            .into_iter()
            .rev()
            .map(|(d, t)| (d, if t == Table::L { Table::G } else { Table::L }))
            .collect();
        if right.iter().any(|(_, t)| *t != Table::G) {
            return None;
        }
        (left, right)
    } else {
        if second.iter().any(|(_, t)| *t != Table::L) {
            return None;
        }
        (first, second)
    };

    let mut digits = Vec::with_capacity(half * 2 + 1);
    if half == 6 {
        let parity: Vec<Table> = left.iter().map(|(_, t)| *t).collect();
        let lead = FIRST_DIGIT_PARITY
            .iter()
            .position(|p| p.as_slice() == parity.as_slice())?;
        digits.push(lead as u8);
    } else if left.iter().any(|(_, t)| *t != Table::L) {
        return None;
    }
    digits.extend(left.iter().map(|(d, _)| *d));
    digits.extend(right.iter().map(|(d, _)| *d));
    Some(digits)
}

fn read_digits(runs: &[Run], module: f32) -> Option<Vec<(u8, Table)>> {
    runs.chunks(4).map(|chunk| match_digit(chunk, module)).collect()
}

/// Best digit over the L and G width tables.
fn match_digit(chunk: &[Run], module: f32) -> Option<(u8, Table)> {
    let total: f32 = chunk.iter().map(|r| r.len).sum();
    let modules = total / module;
    if !(5.0..=9.0).contains(&modules) {
        return None;
    }
    let scaled: Vec<f32> = chunk.iter().map(|r| r.len * 7.0 / total).collect();

    let mut best: Option<(u8, Table, f32)> = None;
    for (digit, widths) in L_WIDTHS.iter().enumerate() {
        for table in [Table::L, Table::G] {
            let error: f32 = (0..4)
                .map(|j| {
                    let expected = match table {
                        Table::L => widths[j],
                        Table::G => widths[3 - j],
                    };
                    (scaled[j] - expected as f32).powi(2)
                })
                .sum();
            if best.is_none_or(|(_, _, e)| error < e) {
                best = Some((digit as u8, table, error));
            }
        }
    }
    best.filter(|(_, _, e)| *e <= MAX_DIGIT_ERROR)
        .map(|(d, t, _)| (d, t))
}

fn is_guard(runs: &[Run], module: f32) -> bool {
    runs.iter()
        .all(|r| r.len >= module * 0.5 && r.len <= module * 1.6)
}

fn finish_ean13(digits: &[u8], formats: &[BarcodeFormat]) -> Option<(String, BarcodeFormat)> {
    if !checksum_ok(digits) {
        return None;
    }
    if digits[0] == 0 && formats.contains(&BarcodeFormat::UpcA) {
        return Some((digits_to_string(&digits[1..]), BarcodeFormat::UpcA));
    }
    if formats.contains(&BarcodeFormat::Ean13) {
        return Some((digits_to_string(digits), BarcodeFormat::Ean13));
    }
    None
}

/// GS1 mod-10 check over EAN-8 or EAN-13 digits (check digit last).
pub fn checksum_ok(digits: &[u8]) -> bool {
    let Some((check, payload)) = digits.split_last() else {
        return false;
    };
    // Weight 3 falls on the digit adjacent to the check digit, alternating leftwards.
    let sum: u32 = payload
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| *d as u32 * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    (10 - sum % 10) % 10 == *check as u32
}

fn digits_to_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

/// Render a clean EAN-13 symbol with a 10-module quiet zone. The check digit
/// is drawn as given, valid or not. Returns `None` unless `code` is 13 digits.
#[doc(hidden)]
pub fn synthesize_ean13(code: &str, module_px: u32, height: u32) -> Option<GrayImage> {
    let digits: Vec<u8> = code
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<_>>()?;
    if digits.len() != 13 || module_px == 0 {
        return None;
    }

    let mut bars: Vec<bool> = Vec::with_capacity(113);
    let push_widths = |bars: &mut Vec<bool>, widths: [u8; 4], start_dark: bool| {
        let mut dark = start_dark;
        for w in widths {
            bars.extend(std::iter::repeat_n(dark, w as usize));
            dark = !dark;
        }
    };

    bars.extend(std::iter::repeat_n(false, 10));
    bars.extend([true, false, true]);
    let parity = FIRST_DIGIT_PARITY[digits[0] as usize];
    for (i, d) in digits[1..7].iter().enumerate() {
        let w = L_WIDTHS[*d as usize];
        let widths = match parity[i] {
            Table::L => w,
            Table::G => [w[3], w[2], w[1], w[0]],
        };
        push_widths(&mut bars, widths, false);
    }
    bars.extend([false, true, false, true, false]);
    for d in &digits[7..13] {
        push_widths(&mut bars, L_WIDTHS[*d as usize], true);
    }
    bars.extend([true, false, true]);
    bars.extend(std::iter::repeat_n(false, 10));

    let width = bars.len() as u32 * module_px;
    Some(GrayImage::from_fn(width, height, |x, _| {
        if bars[(x / module_px) as usize] {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}
