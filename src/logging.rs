use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static LOG_FILE_PATH: OnceLock<PathBuf> = OnceLock::new();

// 日志目录；未设置时写到系统临时目录下
pub const LOG_DIR_ENV: &str = "FINGERTIP_BPM_LOG_DIR";

pub fn append_log_line(line: &str) {
    if let Some(p) = LOG_FILE_PATH.get() {
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(p) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn log_dir() -> PathBuf {
    match std::env::var(LOG_DIR_ENV) {
        Ok(d) if !d.trim().is_empty() => PathBuf::from(d.trim()),
        _ => std::env::temp_dir().join("fingertip-bpm").join("logs"),
    }
}

/// 控制台由 env_logger 输出（RUST_LOG，默认 info），每行同时追加到日志文件；
/// panic 信息单独写入文件
pub fn setup_logging() {
    let dir = log_dir();
    let _ = fs::create_dir_all(&dir);
    let file = dir.join("fingertip-bpm.log");
    if LOG_FILE_PATH.set(file.clone()).is_ok() {
        let _ = OpenOptions::new().create(true).append(true).open(&file);
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let line = format!("ts={}ms {:<5} {}", now_ms(), record.level(), record.args());
            append_log_line(&line);
            writeln!(buf, "{}", line)
        })
        .try_init();
    append_log_line("[BOOT] process starting");

    std::panic::set_hook(Box::new(move |info| {
        let msg = format!("[PANIC] ts={}ms {}", now_ms(), info);
        eprintln!("{}", msg);
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&file) {
            let _ = writeln!(f, "{}", msg);
        }
    }));
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
