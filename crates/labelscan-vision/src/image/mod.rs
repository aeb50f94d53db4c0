// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module — source decoding and the preprocessing pipeline.

pub mod preprocess;

pub use preprocess::{ImageMeta, ImageSource, PreprocessedImage, preprocess, preprocess_blocking};
