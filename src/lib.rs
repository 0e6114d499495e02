pub mod config;
pub mod model;
pub mod training;

// Re-exports for convenience
pub use config::ModelConfig;
pub use model::{
    ClassifierHead, ClassifierOutput, FeaturePyramid, HeadsOutput, MaskHead, MaskRcnnHeads,
    PyramidLevels, TensorSummary,
};
pub use training::{CallbackList, Logs, ShapeLoggingCallback, TrainingCallback};
