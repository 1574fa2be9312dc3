pub mod bpm;
pub mod buffer;
pub mod capture;
pub mod config;
pub mod coverage;
pub mod error;
pub mod hmm;
pub mod logging;
pub mod luma;
pub mod pipeline;
pub mod stability;
pub mod state;
pub mod symbolizer;
pub mod synth;

pub use capture::{EstimatorService, OwnedFrame, ReadingSink};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use luma::{Frame, LumaStats};
pub use pipeline::Pipeline;
pub use state::{PipelineEvent, Snapshot};
