use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::luma::Frame;
use crate::pipeline::Pipeline;
use crate::state::{PipelineEvent, Snapshot};

// 帧队列容量；满了直接丢帧，不阻塞采集端
const FRAME_QUEUE: usize = 16;
// 无帧时的轮询间隔（防抖到期检查）
const IDLE_POLL: Duration = Duration::from_millis(20);

/// 采集端交给处理线程的一帧（拥有数据）
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub plane: Vec<u8>,
    pub row_stride: usize,
    pub timestamp: f64,
}

impl OwnedFrame {
    pub fn as_frame(&self) -> Frame<'_> { Frame::new(&self.plane, self.row_stride, self.timestamp) }
}

/// 读数稳定后的持久化出口（例如健康数据存储）；失败只记日志
pub trait ReadingSink: Send {
    fn persist(&mut self, bpm: i64, at: f64) -> Result<()>;
}

enum Control { Start, Stop, Shutdown }

/// 独立处理线程：帧 → Pipeline → 快照/事件
pub struct EstimatorService {
    frames_tx: Sender<OwnedFrame>,
    control_tx: Sender<Control>,
    events_rx: Receiver<PipelineEvent>,
    snapshot: Arc<Mutex<Snapshot>>,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl EstimatorService {
    pub fn spawn(config: PipelineConfig, sink: Option<Box<dyn ReadingSink>>) -> Result<Self> {
        let pipeline = Pipeline::new(config).context("Failed to build pipeline")?;
        let (frames_tx, frames_rx) = bounded::<OwnedFrame>(FRAME_QUEUE);
        let (control_tx, control_rx) = unbounded::<Control>();
        let (events_tx, events_rx) = unbounded::<PipelineEvent>();
        let snapshot = Arc::new(Mutex::new(Snapshot::default()));

        let worker = Worker { pipeline, frames_rx, control_rx, events_tx, snapshot: snapshot.clone(), sink, last_frame: None };
        let handle = thread::Builder::new()
            .name("fingertip-capture".into())
            .spawn(move || worker.run())
            .context("Failed to spawn capture thread")?;
        info!("[INIT] capture thread started queue={}", FRAME_QUEUE);

        Ok(Self { frames_tx, control_tx, events_rx, snapshot, dropped: Arc::new(AtomicU64::new(0)), handle: Some(handle) })
    }

    pub fn start(&self) { let _ = self.control_tx.send(Control::Start); }

    pub fn stop(&self) { let _ = self.control_tx.send(Control::Stop); }

    /// 相机回调用：队列满则丢弃该帧，返回 false
    pub fn submit(&self, frame: OwnedFrame) -> bool {
        match self.frames_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(f)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("[DROP] frame t={:.3}s dropped (total {})", f.timestamp, n);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// 离线数据源用：等待队列空位，不丢帧
    pub fn submit_wait(&self, frame: OwnedFrame) -> Result<()> {
        self.frames_tx.send(frame).map_err(|_| anyhow::anyhow!("capture thread has exited"))
    }

    pub fn snapshot(&self) -> Snapshot { self.snapshot.lock().map(|g| *g).unwrap_or_default() }

    pub fn current_bpm(&self) -> i64 { self.snapshot().current_bpm }

    pub fn events(&self) -> &Receiver<PipelineEvent> { &self.events_rx }

    pub fn dropped_frames(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }

    /// 处理完队列中已有的帧后退出线程，返回最终快照
    pub fn shutdown(mut self) -> Result<Snapshot> {
        self.join()?;
        Ok(self.snapshot())
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else { return Ok(()) };
        let _ = self.control_tx.send(Control::Shutdown);
        handle.join().map_err(|_| anyhow::anyhow!("capture thread panicked"))
    }
}

impl Drop for EstimatorService {
    fn drop(&mut self) {
        if let Err(e) = self.join() { warn!("[RST] {}", e); }
    }
}

struct Worker {
    pipeline: Pipeline,
    frames_rx: Receiver<OwnedFrame>,
    control_rx: Receiver<Control>,
    events_tx: Sender<PipelineEvent>,
    snapshot: Arc<Mutex<Snapshot>>,
    sink: Option<Box<dyn ReadingSink>>,
    // 最近一帧的采集时间与到达时刻，用于无帧时推算当前时间
    last_frame: Option<(f64, Instant)>,
}

impl Worker {
    fn run(mut self) {
        loop {
            if !self.apply_control() { break; }
            match self.frames_rx.recv_timeout(IDLE_POLL) {
                Ok(frame) => {
                    // 控制消息先于它之后发送的帧生效
                    let running = self.apply_control();
                    self.handle_frame(frame);
                    if !running { break; }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some((ts, arrived)) = self.last_frame {
                        let now = ts + arrived.elapsed().as_secs_f64();
                        let events = self.pipeline.poll(now);
                        self.dispatch(events);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.publish();
        }
        // 退出前处理完已入队的帧
        while let Ok(frame) = self.frames_rx.try_recv() { self.handle_frame(frame); }
        self.publish();
        info!("[RST] capture thread exiting");
    }

    fn handle_frame(&mut self, frame: OwnedFrame) {
        match self.pipeline.process_frame(&frame.as_frame()) {
            Ok(events) => self.dispatch(events),
            Err(e) => warn!("[FRAME] skipped t={:.3}s: {}", frame.timestamp, e),
        }
        self.last_frame = Some((frame.timestamp, Instant::now()));
    }

    /// 返回 false 表示收到退出指令
    fn apply_control(&mut self) -> bool {
        while let Ok(c) = self.control_rx.try_recv() {
            match c {
                Control::Start => { self.pipeline.start(); self.last_frame = None; }
                Control::Stop => {
                    self.pipeline.stop();
                    self.last_frame = None;
                    let stale = self.frames_rx.try_iter().count();
                    if stale > 0 { debug!("[RST] discarded {} queued frames", stale); }
                }
                Control::Shutdown => return false,
            }
            self.publish();
        }
        true
    }

    fn dispatch(&mut self, events: Vec<PipelineEvent>) {
        for ev in events {
            if let PipelineEvent::Stabilized { bpm, at } = ev {
                if let Some(sink) = self.sink.as_mut() {
                    match sink.persist(bpm, at) {
                        Ok(()) => info!("[SINK] persisted bpm={} at {:.3}s", bpm, at),
                        Err(e) => warn!("[SINK] persist failed: {:#}", e),
                    }
                }
            }
            let _ = self.events_tx.send(ev);
        }
    }

    fn publish(&self) {
        if let Ok(mut guard) = self.snapshot.lock() { *guard = self.pipeline.snapshot(); }
    }
}
