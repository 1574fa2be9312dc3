use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fingertip_bpm::hmm::baum_welch;
use fingertip_bpm::logging;
use fingertip_bpm::symbolizer::Symbol;
use fingertip_bpm::synth::{luma_plane, PpgWaveform};
use fingertip_bpm::{EstimatorService, LumaStats, OwnedFrame, Pipeline, PipelineConfig, PipelineEvent, ReadingSink};

#[derive(Parser)]
#[command(name = "fingertip-bpm", about = "Camera-fingertip heart rate estimation")]
struct Cli {
    /// JSON 配置文件；未指定时读取 FINGERTIP_BPM_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 回放逐帧统计记录（JSON lines: {"t":..,"mean":..,"std_dev":..}）
    Replay {
        #[arg(long)]
        input: PathBuf,
    },
    /// 用合成的 PPG 帧驱动处理线程
    Simulate {
        #[arg(long, default_value_t = 75.0)]
        bpm: f64,
        #[arg(long, default_value_t = 30.0)]
        seconds: f64,
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
        #[arg(long, default_value_t = 4)]
        stride: usize,
        /// 在该时刻抬起手指 2 秒
        #[arg(long)]
        lift_at: Option<f64>,
        /// 按真实帧率送帧（满队列丢帧），否则尽快送且不丢帧
        #[arg(long)]
        pace: bool,
        /// 稳定读数追加写入的文件
        #[arg(long)]
        readings: Option<PathBuf>,
    },
    /// Baum-Welch 训练（每行一段观测：["rising","peak",...]）
    Train {
        #[arg(long)]
        observations: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 100)]
        max_iter: usize,
        #[arg(long, default_value_t = 1e-5)]
        tolerance: f64,
    },
    /// 输出默认配置 JSON
    DefaultConfig,
}

#[derive(Deserialize)]
struct TraceRecord {
    t: f64,
    mean: f64,
    std_dev: f64,
}

#[derive(Serialize)]
struct Reading {
    bpm: i64,
    at: f64,
    saved_at_ms: u64,
}

struct JsonlSink { path: PathBuf }

impl ReadingSink for JsonlSink {
    fn persist(&mut self, bpm: i64, at: f64) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let line = serde_json::to_string(&Reading { bpm, at, saved_at_ms: logging::now_ms() })?;
        writeln!(f, "{}", line)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    // 本地环境变量文件（配置路径、日志目录）
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    logging::setup_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(p) => PipelineConfig::load(p)?,
        None => PipelineConfig::from_env()?,
    };

    match cli.cmd {
        Commands::Replay { input } => replay(config, &input),
        Commands::Simulate { bpm, seconds, fps, stride, lift_at, pace, readings } => {
            simulate(config, bpm, seconds, fps, stride, lift_at, pace, readings)
        }
        Commands::Train { observations, out, max_iter, tolerance } => train(config, &observations, out.as_deref(), max_iter, tolerance),
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

fn print_event(ev: &PipelineEvent) -> Result<()> {
    println!("{}", serde_json::to_string(ev)?);
    Ok(())
}

fn replay(config: PipelineConfig, input: &Path) -> Result<()> {
    let debounce = config.coverage.debounce_secs;
    let mut pipeline = Pipeline::new(config).context("Failed to build pipeline")?;
    let reader = BufReader::new(File::open(input).with_context(|| format!("Failed to open {}", input.display()))?);
    pipeline.start();

    let mut last_t = None;
    for (no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let rec: TraceRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: bad trace record", input.display(), no + 1))?;
        for ev in pipeline.process_stats(LumaStats { mean: rec.mean, std_dev: rec.std_dev }, rec.t) {
            print_event(&ev)?;
        }
        last_t = Some(rec.t);
    }
    // 结算末尾未到期的防抖
    if let Some(t) = last_t {
        for ev in pipeline.poll(t + debounce) { print_event(&ev)?; }
    }
    println!("{}", serde_json::to_string(&pipeline.snapshot())?);
    info!("[OUT] replay finished bpm={} stabilized={}", pipeline.current_bpm(), pipeline.is_stabilized());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn simulate(config: PipelineConfig, bpm: f64, seconds: f64, fps: f64, stride: usize, lift_at: Option<f64>, pace: bool, readings: Option<PathBuf>) -> Result<()> {
    if !(fps > 0.0) || !(bpm > 0.0) || stride == 0 {
        anyhow::bail!("bpm, fps and stride must be positive");
    }
    let sink: Option<Box<dyn ReadingSink>> = readings.map(|path| Box::new(JsonlSink { path }) as Box<dyn ReadingSink>);
    let svc = EstimatorService::spawn(config, sink)?;
    svc.start();

    let wave = PpgWaveform::new(bpm);
    let frames = (seconds * fps) as usize;
    let started = Instant::now();
    for i in 0..frames {
        let t = i as f64 / fps;
        let lifted = lift_at.map_or(false, |at| t >= at && t < at + 2.0);
        // 抬起手指：画面过亮
        let mean = if lifted { 200.0 } else { wave.luma_at(t) };
        let frame = OwnedFrame { plane: luma_plane(mean, stride), row_stride: stride, timestamp: t };
        if pace {
            let due = Duration::from_secs_f64(t);
            if let Some(wait) = due.checked_sub(started.elapsed()) { std::thread::sleep(wait); }
            svc.submit(frame);
        } else {
            svc.submit_wait(frame)?;
        }
        for ev in svc.events().try_iter() { print_event(&ev)?; }
    }

    let events = svc.events().clone();
    let dropped = svc.dropped_frames();
    let snapshot = svc.shutdown()?;
    for ev in events.try_iter() { print_event(&ev)?; }
    if dropped > 0 { warn!("[DROP] {} frames dropped", dropped); }
    println!("{}", serde_json::to_string(&snapshot)?);
    Ok(())
}

fn train(config: PipelineConfig, observations: &Path, out: Option<&Path>, max_iter: usize, tolerance: f64) -> Result<()> {
    let text = fs::read_to_string(observations).with_context(|| format!("Failed to read {}", observations.display()))?;
    let mut sequences: Vec<Vec<Symbol>> = Vec::new();
    for (no, line) in text.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        let seq: Vec<Symbol> = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: expected an array of symbols", observations.display(), no + 1))?;
        sequences.push(seq);
    }
    info!("[TRAIN] {} sequences, {} observations", sequences.len(), sequences.iter().map(Vec::len).sum::<usize>());

    let report = baum_welch(&config.model, &sequences, max_iter, tolerance)?;
    if !report.converged { warn!("[TRAIN] stopped after {} iterations without converging", report.iterations); }
    match out {
        Some(path) => {
            // 写成完整配置，可直接用 --config 加载
            let trained = PipelineConfig { model: report.model.clone(), ..config };
            trained.save(path)?;
            info!("[TRAIN] wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report.model)?),
    }
    Ok(())
}
