use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// 帧缓冲不足 `rows × stride` 或步长为 0；该帧被跳过
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("invalid hmm model: {0}")]
    InvalidModel(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
