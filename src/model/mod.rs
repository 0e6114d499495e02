pub mod blocks;
pub mod classifier;
pub mod fpn;
pub mod inspect;
pub mod mask;
pub mod mrcnn;

pub use classifier::{ClassifierHead, ClassifierHeadConfig, ClassifierOutput};
pub use fpn::{FeaturePyramid, FpnConfig, PyramidLevels};
pub use inspect::{describe_io, TensorSummary};
pub use mask::{MaskHead, MaskHeadConfig};
pub use mrcnn::{HeadsOutput, MaskRcnnHeads};
