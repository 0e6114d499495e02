use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Name and shape of a tensor, detached from its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSummary {
    pub name: String,
    pub dims: Vec<usize>,
}

impl TensorSummary {
    pub fn new(name: impl Into<String>, dims: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            dims: dims.into(),
        }
    }

    pub fn of<B: Backend, const D: usize>(name: impl Into<String>, tensor: &Tensor<B, D>) -> Self {
        Self::new(name, tensor.dims().to_vec())
    }
}

pub fn format_input(index: usize, summary: &TensorSummary) -> String {
    format!("Input {}:  ({:24}) \t  Input shape: {:?}", index, summary.name, summary.dims)
}

pub fn format_output(index: usize, summary: &TensorSummary) -> String {
    format!("Output {}: ({:24}) \t  Output shape: {:?}", index, summary.name, summary.dims)
}

/// Logs the inputs and outputs of a forward pass, one line each.
pub fn describe_io(inputs: &[TensorSummary], outputs: &[TensorSummary]) {
    log::info!("/* Inputs */");
    for (i, input) in inputs.iter().enumerate() {
        log::info!("{}", format_input(i, input));
    }
    log::info!("/* Outputs */");
    for (i, output) in outputs.iter().enumerate() {
        log::info!("{}", format_output(i, output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_summary_of_tensor() {
        let device = Default::default();
        let x = Tensor::<NdArray, 3>::zeros([2, 5, 4], &device);
        let summary = TensorSummary::of("input_rois", &x);
        assert_eq!(summary, TensorSummary::new("input_rois", vec![2, 5, 4]));
    }

    #[test]
    fn test_line_format() {
        let summary = TensorSummary::new("mrcnn_mask", vec![1, 2, 3]);
        let line = format_output(0, &summary);
        assert!(line.starts_with("Output 0: (mrcnn_mask"));
        assert!(line.ends_with("Output shape: [1, 2, 3]"));
    }

    #[test]
    fn test_serializes_to_json() {
        let summary = TensorSummary::new("fpn_p2", vec![1, 256, 256, 256]);
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(json, r#"{"name":"fpn_p2","dims":[1,256,256,256]}"#);
    }
}
