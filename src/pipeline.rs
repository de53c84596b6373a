//! Acquisition pipeline bridging a [`FrameSource`] to the processing
//! stages.
//!
//! One producer thread blocks on the device for frames; one worker
//! thread runs decode and polarimetric compute (never two frames from
//! the same session concurrently, since channel buffers are reused);
//! the consumer pulls finished products from this handle. Every
//! hand-off point is a bounded single-slot channel with a
//! latest-frame-wins policy: if the downstream side has not taken the
//! previous item when a new one arrives, the pending item is dropped
//! and counted. Live viewing prefers low latency over completeness;
//! single-shot captures are exempt and always deliver end to end.

use crate::{
    config::PipelineConfig,
    decode,
    display::{self, DisplayMode},
    error::{CaptureError, PipelineError, ProcessError},
    frame::{CameraType, RawFrame},
    polarimetry::{self, PolarimetricProduct},
    source::{FrameSource, SourceParameter},
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, never, select};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// Consecutive continuous-capture failures tolerated before the device
/// is declared unrecoverable.
const MAX_CAPTURE_FAILURES: u32 = 8;

/// How long a single-shot caller waits for its processed product.
const SINGLE_SHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquisition session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Connected,
    Capturing,
    Paused,
    Disconnected,
}

/// Process one raw frame into a product under a config snapshot.
///
/// The requested display mode is resolved against the camera class
/// first; `Raw` skips the mosaic decode entirely, ordinary Bayer
/// cameras take the pass-through path, and polarization cameras decode
/// into a channel set before the mode-specific compute.
pub fn process_frame(
    frame: RawFrame,
    camera: CameraType,
    config: &PipelineConfig,
) -> Result<PolarimetricProduct, ProcessError> {
    let mode = display::resolve(config.mode, camera)?;
    let product = match mode {
        DisplayMode::Raw => polarimetry::raw_product(&frame, config),
        _ if camera == CameraType::NormalColor => {
            polarimetry::passthrough_product(&frame, mode, config)?
        }
        DisplayMode::Color => {
            let set = decode::decode(frame, camera)?;
            polarimetry::color_product(&set, config)?
        }
        DisplayMode::Grayscale => {
            let set = decode::decode(frame, camera)?;
            polarimetry::grayscale_product(&set, config)
        }
        DisplayMode::Polarization => {
            let set = decode::decode(frame, camera)?;
            polarimetry::polarization_product(&set, config)
        }
    };
    Ok(product)
}

struct Job {
    frame: RawFrame,
    generation: u64,
}

struct SingleJob {
    frame: RawFrame,
    reply: Sender<Result<PolarimetricProduct, ProcessError>>,
}

/// State shared with the producer and worker threads.
struct Shared {
    config: Mutex<PipelineConfig>,
    pending_params: Mutex<Vec<SourceParameter>>,
    single_waiter: Mutex<Option<Sender<Result<PolarimetricProduct, ProcessError>>>>,
    generation: AtomicU64,
    dropped: AtomicU64,
    process_failures: AtomicU64,
    capturing: AtomicBool,
    device_fault: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            config: Mutex::new(PipelineConfig::default()),
            pending_params: Mutex::new(Vec::new()),
            single_waiter: Mutex::new(None),
            generation: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            process_failures: AtomicU64::new(0),
            capturing: AtomicBool::new(false),
            device_fault: AtomicBool::new(false),
        }
    }
}

/// Put `value` into a single-slot channel, superseding a pending item.
fn send_latest<T>(tx: &Sender<T>, rx: &Receiver<T>, value: T, dropped: &AtomicU64) {
    let mut value = value;
    loop {
        match tx.try_send(value) {
            Ok(()) => return,
            Err(TrySendError::Full(v)) => {
                if rx.try_recv().is_ok() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                value = v;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn producer_loop<S: FrameSource>(
    mut source: S,
    shared: Arc<Shared>,
    raw_tx: Sender<Job>,
    raw_rx: Receiver<Job>,
    single_tx: Sender<SingleJob>,
) -> S {
    let mut failures = 0u32;
    while shared.capturing.load(Ordering::Acquire) {
        // Parameter changes land on the next frame boundary, never on
        // a frame already in flight.
        for param in shared
            .pending_params
            .lock()
            .expect("pending params mutex poisoned")
            .drain(..)
        {
            if let Err(err) = source.set_parameter(param) {
                warn!(?param, %err, "failed to apply device parameter");
            }
        }

        // Read before blocking on the device: a pause or disconnect
        // issued while the wait is in progress bumps the generation,
        // and the frame completing under it must carry the stale value
        // so its product is discarded rather than delivered.
        let generation = shared.generation.load(Ordering::Acquire);
        match source.next_frame() {
            Ok(frame) => {
                failures = 0;

                // A waiting single-shot request claims this frame.
                let waiter = shared
                    .single_waiter
                    .lock()
                    .expect("single waiter mutex poisoned")
                    .take();
                if let Some(reply) = waiter {
                    let _ = single_tx.send(SingleJob { frame, reply });
                    continue;
                }

                send_latest(&raw_tx, &raw_rx, Job { frame, generation }, &shared.dropped);
            }
            Err(CaptureError::Timeout) => {
                // Periodic timeouts are how a blocking source yields
                // control; the loop condition decides whether to poll
                // again.
                debug!("frame wait timed out");
            }
            Err(err) => {
                if !shared.capturing.load(Ordering::Acquire) {
                    break;
                }
                failures += 1;
                warn!(%err, failures, "frame capture failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    shared.device_fault.store(true, Ordering::Release);
                    warn!("declaring the device unrecoverable after repeated capture failures");
                    break;
                }
            }
        }
    }

    source.stop();
    source
}

fn worker_loop(
    camera: CameraType,
    shared: Arc<Shared>,
    raw_rx: Receiver<Job>,
    single_rx: Receiver<SingleJob>,
    product_tx: Sender<PolarimetricProduct>,
    product_rx: Receiver<PolarimetricProduct>,
) {
    let mut raw_open = true;
    let mut single_open = true;

    while raw_open || single_open {
        // Single-shot requests jump the queue.
        match single_rx.try_recv() {
            Ok(job) => {
                handle_single(camera, &shared, job);
                continue;
            }
            Err(TryRecvError::Disconnected) => single_open = false,
            Err(TryRecvError::Empty) => {}
        }

        let s_rx = if single_open { single_rx.clone() } else { never() };
        let r_rx = if raw_open { raw_rx.clone() } else { never() };
        select! {
            recv(s_rx) -> msg => match msg {
                Ok(job) => handle_single(camera, &shared, job),
                Err(_) => single_open = false,
            },
            recv(r_rx) -> msg => match msg {
                Ok(job) => handle_stream(camera, &shared, job, &product_tx, &product_rx),
                Err(_) => raw_open = false,
            },
        }
    }

    debug!("processing worker exited");
}

fn handle_stream(
    camera: CameraType,
    shared: &Shared,
    job: Job,
    product_tx: &Sender<PolarimetricProduct>,
    product_rx: &Receiver<PolarimetricProduct>,
) {
    // Snapshot the config at the start of this frame's processing; a
    // concurrent update is first observed by the next frame.
    let snapshot = shared
        .config
        .lock()
        .expect("config mutex poisoned")
        .clone();

    let seq = job.frame.seq();
    let started = Instant::now();
    match process_frame(job.frame, camera, &snapshot) {
        Ok(mut product) => {
            let elapsed = started.elapsed();
            product.set_elapsed(elapsed);
            if shared.generation.load(Ordering::Acquire) != job.generation {
                // Capture stopped while this frame was in flight.
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(seq, "discarding product of a cancelled capture");
                return;
            }
            debug!(seq, elapsed_us = elapsed.as_micros() as u64, "frame processed");
            send_latest(product_tx, product_rx, product, &shared.dropped);
        }
        Err(err) => {
            // One bad frame never halts the stream.
            shared.process_failures.fetch_add(1, Ordering::Relaxed);
            warn!(seq, %err, "dropping frame that failed to process");
        }
    }
}

fn handle_single(camera: CameraType, shared: &Shared, job: SingleJob) {
    let snapshot = shared
        .config
        .lock()
        .expect("config mutex poisoned")
        .clone();

    let started = Instant::now();
    let result = process_frame(job.frame, camera, &snapshot).map(|mut product| {
        let elapsed = started.elapsed();
        product.set_elapsed(elapsed);
        debug!(seq = product.seq(), elapsed_us = elapsed.as_micros() as u64, "single frame processed");
        product
    });
    let _ = job.reply.send(result);
}

/// Owns the producer/consumer relationship between a [`FrameSource`]
/// and the processing stages.
///
/// ```text
/// Idle -> Connected -> (Capturing <-> Paused) -> Disconnected
/// ```
///
/// The camera type is detected at [`connect`] and latched until
/// [`disconnect`]; `Disconnected` is terminal for a pipeline value.
///
/// [`connect`]: AcquisitionPipeline::connect
/// [`disconnect`]: AcquisitionPipeline::disconnect
pub struct AcquisitionPipeline<S: FrameSource + 'static> {
    state: State,
    camera: Option<CameraType>,
    shared: Arc<Shared>,
    /// Owned here except while a capture session loans it to the
    /// producer thread.
    source: Option<S>,
    producer: Option<JoinHandle<S>>,
    worker: Option<JoinHandle<()>>,
    raw_tx: Option<Sender<Job>>,
    raw_rx: Option<Receiver<Job>>,
    single_tx: Option<Sender<SingleJob>>,
    product_rx: Option<Receiver<PolarimetricProduct>>,
}

impl<S: FrameSource + 'static> AcquisitionPipeline<S> {
    pub fn new(source: S) -> Self {
        Self {
            state: State::Idle,
            camera: None,
            shared: Arc::new(Shared::new()),
            source: Some(source),
            producer: None,
            worker: None,
            raw_tx: None,
            raw_rx: None,
            single_tx: None,
            product_rx: None,
        }
    }

    /// Current session state.
    ///
    /// A device fault raised by the capture thread reads as
    /// `Disconnected` immediately; the backing threads are reaped on
    /// the next mutating call.
    pub fn state(&self) -> State {
        if self.shared.device_fault.load(Ordering::Acquire) && self.state != State::Idle {
            State::Disconnected
        } else {
            self.state
        }
    }

    /// Camera class latched at connect; `None` once disconnected.
    pub fn camera_type(&self) -> Option<CameraType> {
        if self.state() == State::Disconnected {
            None
        } else {
            self.camera
        }
    }

    /// Total frames and products superseded or discarded so far.
    /// Silent loss would be undetectable, so every drop is counted.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Frames that failed decode or compute and were dropped.
    pub fn process_failures(&self) -> u64 {
        self.shared.process_failures.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> PipelineConfig {
        self.shared
            .config
            .lock()
            .expect("config mutex poisoned")
            .clone()
    }

    /// Open the device, detect and latch the camera type, and start
    /// the processing worker.
    pub fn connect(&mut self) -> Result<CameraType, PipelineError> {
        self.reap_fault();
        if self.state != State::Idle {
            return Err(PipelineError::InvalidState {
                op: "connect",
                state: self.state,
            });
        }

        let source = self.source.as_mut().expect("source is owned while Idle");
        let camera = source.open()?;
        info!(?camera, "camera connected");

        let (raw_tx, raw_rx) = bounded::<Job>(1);
        let (single_tx, single_rx) = bounded::<SingleJob>(1);
        let (product_tx, product_rx) = bounded::<PolarimetricProduct>(1);

        let shared = Arc::clone(&self.shared);
        let worker_raw_rx = raw_rx.clone();
        let worker_product_rx = product_rx.clone();
        let worker = thread::Builder::new()
            .name("polcam-worker".into())
            .spawn(move || {
                worker_loop(
                    camera,
                    shared,
                    worker_raw_rx,
                    single_rx,
                    product_tx,
                    worker_product_rx,
                )
            })
            .expect("spawn processing worker");

        self.camera = Some(camera);
        self.worker = Some(worker);
        self.raw_tx = Some(raw_tx);
        self.raw_rx = Some(raw_rx);
        self.single_tx = Some(single_tx);
        self.product_rx = Some(product_rx);
        self.state = State::Connected;
        Ok(camera)
    }

    /// Begin continuous acquisition. Valid from `Connected` or
    /// `Paused`.
    pub fn start_capture(&mut self) -> Result<(), PipelineError> {
        self.reap_fault();
        if !matches!(self.state, State::Connected | State::Paused) {
            return Err(PipelineError::InvalidState {
                op: "start_capture",
                state: self.state,
            });
        }

        let mut source = self
            .source
            .take()
            .expect("source is owned while not capturing");
        if let Err(err) = source.start() {
            self.source = Some(source);
            return Err(err.into());
        }

        self.shared.capturing.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let raw_tx = self.raw_tx.clone().expect("channels exist while connected");
        let raw_rx = self.raw_rx.clone().expect("channels exist while connected");
        let single_tx = self
            .single_tx
            .clone()
            .expect("channels exist while connected");
        self.producer = Some(
            thread::Builder::new()
                .name("polcam-producer".into())
                .spawn(move || producer_loop(source, shared, raw_tx, raw_rx, single_tx))
                .expect("spawn capture producer"),
        );

        self.state = State::Capturing;
        info!("continuous capture started");
        Ok(())
    }

    /// Stop acquisition but keep the connection; parameters may still
    /// be adjusted. In-flight frame results are discarded, buffered
    /// frames are dropped and counted.
    pub fn pause(&mut self) -> Result<(), PipelineError> {
        self.reap_fault();
        if self.state != State::Capturing {
            return Err(PipelineError::InvalidState {
                op: "pause",
                state: self.state,
            });
        }

        self.stop_producer();
        self.drain_buffers();
        if self.shared.device_fault.load(Ordering::Acquire) {
            self.teardown();
        } else {
            self.state = State::Paused;
            info!("capture paused");
        }
        Ok(())
    }

    /// Disconnect from any state: buffered frames are discarded and
    /// the camera type is forgotten. Terminal and idempotent.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    /// Capture exactly one frame end to end and return its product.
    ///
    /// Exempt from the latest-frame-wins drop policy: the product is
    /// always delivered, even under concurrent continuous load (the
    /// request claims the next frame of the running stream).
    pub fn capture_single(&mut self) -> Result<PolarimetricProduct, PipelineError> {
        self.reap_fault();
        let (reply_tx, reply_rx) = bounded(1);

        match self.state {
            State::Capturing => {
                *self
                    .shared
                    .single_waiter
                    .lock()
                    .expect("single waiter mutex poisoned") = Some(reply_tx);
            }
            State::Connected | State::Paused => {
                let source = self
                    .source
                    .as_mut()
                    .expect("source is owned while not capturing");
                for param in self
                    .shared
                    .pending_params
                    .lock()
                    .expect("pending params mutex poisoned")
                    .drain(..)
                {
                    if let Err(err) = source.set_parameter(param) {
                        warn!(?param, %err, "failed to apply device parameter");
                    }
                }

                let frame = source.capture_single()?;
                let single_tx = self
                    .single_tx
                    .as_ref()
                    .expect("channels exist while connected");
                single_tx
                    .send(SingleJob {
                        frame,
                        reply: reply_tx,
                    })
                    .map_err(|_| CaptureError::Driver("processing worker is gone".into()))?;
            }
            state => {
                return Err(PipelineError::InvalidState {
                    op: "capture_single",
                    state,
                });
            }
        }

        match reply_rx.recv_timeout(SINGLE_SHOT_TIMEOUT) {
            Ok(Ok(product)) => Ok(product),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                self.shared
                    .single_waiter
                    .lock()
                    .expect("single waiter mutex poisoned")
                    .take();
                Err(CaptureError::Timeout.into())
            }
        }
    }

    /// Replace the pipeline configuration.
    ///
    /// The display mode is validated against the latched camera type;
    /// an unavailable mode is rejected synchronously with no side
    /// effects. Exposure and gain changes are queued for the device at
    /// the next frame boundary; the processing snapshot changes at the
    /// next frame as well, never retroactively.
    pub fn update_config(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        self.reap_fault();
        if let Some(camera) = self.camera_type() {
            display::resolve(config.mode, camera)?;
        }

        let mut current = self.shared.config.lock().expect("config mutex poisoned");
        let mut pending = self
            .shared
            .pending_params
            .lock()
            .expect("pending params mutex poisoned");
        if current.exposure_us != config.exposure_us {
            pending.push(SourceParameter::ExposureUs(config.exposure_us));
        }
        if current.gain_db != config.gain_db {
            pending.push(SourceParameter::GainDb(config.gain_db));
        }
        *current = config;
        Ok(())
    }

    /// Take the next finished product if one is ready.
    pub fn try_next_product(&self) -> Option<PolarimetricProduct> {
        self.product_rx.as_ref()?.try_recv().ok()
    }

    /// Wait up to `timeout` for the next finished product.
    pub fn next_product(&self, timeout: Duration) -> Option<PolarimetricProduct> {
        self.product_rx.as_ref()?.recv_timeout(timeout).ok()
    }

    /// Reap a device fault raised by the capture thread: tear the
    /// session down so the observed state matches `Disconnected`.
    fn reap_fault(&mut self) {
        if self.shared.device_fault.load(Ordering::Acquire) && self.state != State::Disconnected {
            warn!("reaping unrecoverable device fault");
            self.teardown();
        }
    }

    /// Stop the producer thread and recover the frame source.
    fn stop_producer(&mut self) {
        // Bumping the generation discards the result of any frame
        // still in flight once it finishes processing.
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.capturing.store(false, Ordering::Release);
        self.shared
            .single_waiter
            .lock()
            .expect("single waiter mutex poisoned")
            .take();
        if let Some(handle) = self.producer.take() {
            match handle.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => warn!("capture producer panicked"),
            }
        }
    }

    /// Discard anything buffered at the hand-off points, counting the
    /// losses.
    fn drain_buffers(&self) {
        let mut discarded = 0u64;
        if let Some(rx) = &self.raw_rx {
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        if let Some(rx) = &self.product_rx {
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
        }
        if discarded > 0 {
            self.shared.dropped.fetch_add(discarded, Ordering::Relaxed);
            debug!(discarded, "discarded buffered frames");
        }
    }

    fn teardown(&mut self) {
        let was_active = !matches!(self.state, State::Idle | State::Disconnected);
        self.stop_producer();

        // Closing both input channels ends the worker.
        self.raw_tx.take();
        self.single_tx.take();
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            warn!("processing worker panicked");
        }

        self.drain_buffers();
        self.raw_rx.take();
        self.product_rx.take();
        self.camera = None;
        if was_active {
            info!("camera disconnected");
        }
        self.state = State::Disconnected;
    }
}

impl<S: FrameSource + 'static> Drop for AcquisitionPipeline<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
