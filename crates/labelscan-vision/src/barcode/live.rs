// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Live scanner — continuous decoding over a camera-like frame source.
//
// A capture loop pulls frames on a fixed interval and hands them to the
// adapter, with at most one decode in flight. Stopping cancels the loop,
// aborts the in-flight decode and stops the source.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::GrayImage;
use labelscan_core::error::Result;
use labelscan_core::types::BarcodeResult;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::adapter::{BarcodeAdapter, DecodeOptions};

/// Something that produces frames, typically a camera.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next frame, or `None` once the source has ended.
    async fn next_frame(&self) -> Option<GrayImage>;

    /// Release the underlying device.
    async fn stop(&self);
}

/// Invoked for every decoded frame.
pub type DetectionCallback = Arc<dyn Fn(BarcodeResult) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LiveScanOptions {
    /// Frame capture interval.
    pub interval: Duration,
    /// End the loop after the first detection.
    pub stop_on_detect: bool,
    pub decode: DecodeOptions,
}

impl Default for LiveScanOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            stop_on_detect: true,
            decode: DecodeOptions::default(),
        }
    }
}

type Inflight = JoinHandle<Result<Option<BarcodeResult>>>;

/// Handle to a running live scan.
pub struct LiveScanner {
    cancel: CancellationToken,
    busy: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl LiveScanner {
    /// Spawn the capture loop. It also ends when `parent` is cancelled.
    pub fn start(
        adapter: BarcodeAdapter,
        source: Arc<dyn FrameSource>,
        options: LiveScanOptions,
        on_detect: DetectionCallback,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let busy = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(capture_loop(
            adapter,
            source,
            options,
            on_detect,
            cancel.clone(),
            Arc::clone(&busy),
        ));
        Self {
            cancel,
            busy,
            task: Some(task),
        }
    }

    /// Whether a decode is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop scanning and wait until the loop has released everything.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "Live scan task ended abnormally");
            }
        }
    }

    /// Wait for the loop to end on its own (source exhausted or detection
    /// with `stop_on_detect`).
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "Live scan task ended abnormally");
            }
        }
    }
}

impl Drop for LiveScanner {
    fn drop(&mut self) {
        // The loop observes the token and cleans up on its own.
        self.cancel.cancel();
    }
}

#[instrument(skip_all, fields(interval_ms = options.interval.as_millis() as u64))]
async fn capture_loop(
    adapter: BarcodeAdapter,
    source: Arc<dyn FrameSource>,
    options: LiveScanOptions,
    on_detect: DetectionCallback,
    cancel: CancellationToken,
    busy: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inflight: Option<Inflight> = None;
    let mut frames = 0u64;

    info!("Live scan started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            joined = join_inflight(&mut inflight) => {
                inflight = None;
                busy.store(false, Ordering::SeqCst);
                match joined {
                    Ok(Ok(Some(result))) => {
                        info!(code = %result.code, engine = %result.engine, frames, "Live scan detected barcode");
                        on_detect(result);
                        if options.stop_on_detect {
                            break;
                        }
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) => {
                        debug!(%err, "Live decode ended");
                        if err.is_aborted() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "Live decode task failed"),
                }
            }
            _ = ticker.tick() => {
                if busy.load(Ordering::SeqCst) {
                    continue;
                }
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = source.next_frame() => frame,
                };
                let Some(frame) = frame else {
                    debug!("Frame source ended");
                    break;
                };
                frames += 1;
                busy.store(true, Ordering::SeqCst);
                let adapter = adapter.clone();
                let decode = options.decode.clone();
                let token = cancel.child_token();
                inflight = Some(tokio::spawn(async move {
                    adapter.decode(Arc::new(frame), &decode, &token).await
                }));
            }
        }
    }

    if let Some(handle) = inflight.take() {
        handle.abort();
        let _ = handle.await;
    }
    busy.store(false, Ordering::SeqCst);
    source.stop().await;
    info!(frames, "Live scan stopped");
}

/// Await the in-flight decode, or never resolve when there is none.
async fn join_inflight(
    inflight: &mut Option<Inflight>,
) -> std::result::Result<Result<Option<BarcodeResult>>, JoinError> {
    match inflight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
