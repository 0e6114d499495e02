pub mod callbacks;

pub use callbacks::{CallbackList, Logs, ShapeLoggingCallback, TrainingCallback};
