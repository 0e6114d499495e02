use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::inspect::{format_input, TensorSummary};

/// Values handed to the hooks by the loop driving them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Logs {
    /// Number of samples in the current batch, when there is one.
    pub size: Option<usize>,
    /// Named scalars such as `loss`, sorted by name.
    pub values: BTreeMap<String, f32>,
}

impl Logs {
    pub fn batch(size: usize) -> Self {
        Self {
            size: Some(size),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f32) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}

/// Observer of training-loop boundaries. Every hook defaults to a no-op and
/// none of them can alter the loop.
pub trait TrainingCallback {
    fn on_train_begin(&mut self, _logs: &Logs) {}
    fn on_train_end(&mut self, _logs: &Logs) {}
    fn on_epoch_begin(&mut self, _epoch: usize, _logs: &Logs) {}
    fn on_epoch_end(&mut self, _epoch: usize, _logs: &Logs) {}
    fn on_batch_begin(&mut self, _batch: usize, _logs: &Logs) {}
    fn on_batch_end(&mut self, _batch: usize, _logs: &Logs) {}
}

/// Fans each event out to its callbacks in registration order.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: impl TrainingCallback + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl TrainingCallback for CallbackList {
    fn on_train_begin(&mut self, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_train_begin(logs));
    }

    fn on_train_end(&mut self, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_train_end(logs));
    }

    fn on_epoch_begin(&mut self, epoch: usize, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_epoch_begin(epoch, logs));
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_epoch_end(epoch, logs));
    }

    fn on_batch_begin(&mut self, batch: usize, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_batch_begin(batch, logs));
    }

    fn on_batch_end(&mut self, batch: usize, logs: &Logs) {
        self.callbacks.iter_mut().for_each(|c| c.on_batch_end(batch, logs));
    }
}

/// Logs every boundary along with the model's input shapes.
#[derive(Debug, Clone, Default)]
pub struct ShapeLoggingCallback {
    inputs: Vec<TensorSummary>,
}

impl ShapeLoggingCallback {
    pub fn new(inputs: Vec<TensorSummary>) -> Self {
        Self { inputs }
    }

    pub fn epoch_begin_line(epoch: usize) -> String {
        format!(">>> Start epoch {epoch}")
    }

    pub fn epoch_end_line(epoch: usize) -> String {
        format!(">>> End   epoch {epoch}")
    }

    pub fn batch_begin_line(batch: usize, logs: &Logs) -> String {
        match logs.size {
            Some(size) => format!("... Start training of batch {batch} size {size}"),
            None => format!("... Start training of batch {batch} size unknown"),
        }
    }

    /// Header line followed by one line per registered model input.
    pub fn batch_begin_lines(&self, batch: usize, logs: &Logs) -> Vec<String> {
        let mut lines = vec![Self::batch_begin_line(batch, logs)];
        lines.extend(
            self.inputs
                .iter()
                .enumerate()
                .map(|(i, input)| format!("    {}", format_input(i, input))),
        );
        lines
    }

    pub fn batch_end_line(batch: usize, logs: &Logs) -> String {
        let values: Vec<String> = logs
            .values
            .iter()
            .map(|(name, value)| format!("{name}={value:.6}"))
            .collect();
        format!("... End   training of batch {batch} {{{}}}", values.join(", "))
    }

    pub fn train_begin_line(timestamp: f64) -> String {
        format!("*****  Start of Training {timestamp:.3}")
    }

    pub fn train_end_line(timestamp: f64) -> String {
        format!("***** End of Training   {timestamp:.3}")
    }
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

impl TrainingCallback for ShapeLoggingCallback {
    fn on_train_begin(&mut self, _logs: &Logs) {
        log::info!("{}", Self::train_begin_line(unix_timestamp()));
    }

    fn on_train_end(&mut self, _logs: &Logs) {
        log::info!("{}", Self::train_end_line(unix_timestamp()));
    }

    fn on_epoch_begin(&mut self, epoch: usize, _logs: &Logs) {
        log::info!("{}", Self::epoch_begin_line(epoch));
    }

    fn on_epoch_end(&mut self, epoch: usize, _logs: &Logs) {
        log::info!("{}", Self::epoch_end_line(epoch));
    }

    fn on_batch_begin(&mut self, batch: usize, logs: &Logs) {
        for line in self.batch_begin_lines(batch, logs) {
            log::info!("{line}");
        }
    }

    fn on_batch_end(&mut self, batch: usize, logs: &Logs) {
        log::info!("{}", Self::batch_end_line(batch, logs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        tag: &'static str,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl TrainingCallback for Recorder {
        fn on_train_begin(&mut self, _logs: &Logs) {
            self.events.borrow_mut().push(format!("{}:train_begin", self.tag));
        }

        fn on_epoch_begin(&mut self, epoch: usize, _logs: &Logs) {
            self.events.borrow_mut().push(format!("{}:epoch_begin:{epoch}", self.tag));
        }

        fn on_batch_end(&mut self, batch: usize, logs: &Logs) {
            let loss = logs.get("loss").unwrap_or(f32::NAN);
            self.events
                .borrow_mut()
                .push(format!("{}:batch_end:{batch}:{loss}", self.tag));
        }
    }

    #[test]
    fn test_dispatches_in_registration_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut callbacks = CallbackList::new();
        callbacks.push(Recorder {
            tag: "a",
            events: Rc::clone(&events),
        });
        callbacks.push(Recorder {
            tag: "b",
            events: Rc::clone(&events),
        });
        assert_eq!(callbacks.len(), 2);

        callbacks.on_train_begin(&Logs::default());
        callbacks.on_epoch_begin(0, &Logs::default());
        callbacks.on_batch_begin(0, &Logs::batch(4));
        callbacks.on_batch_end(0, &Logs::batch(4).with_value("loss", 0.5));

        assert_eq!(
            *events.borrow(),
            vec![
                "a:train_begin",
                "b:train_begin",
                "a:epoch_begin:0",
                "b:epoch_begin:0",
                "a:batch_end:0:0.5",
                "b:batch_end:0:0.5",
            ]
        );
    }

    #[test]
    fn test_batch_lines() {
        let logs = Logs::batch(8).with_value("loss", 1.25).with_value("acc", 0.5);
        assert_eq!(
            ShapeLoggingCallback::batch_begin_line(3, &logs),
            "... Start training of batch 3 size 8"
        );
        assert_eq!(
            ShapeLoggingCallback::batch_end_line(3, &logs),
            "... End   training of batch 3 {acc=0.500000, loss=1.250000}"
        );
        assert_eq!(
            ShapeLoggingCallback::batch_begin_line(1, &Logs::default()),
            "... Start training of batch 1 size unknown"
        );
    }

    #[test]
    fn test_epoch_and_train_lines() {
        assert_eq!(ShapeLoggingCallback::epoch_begin_line(2), ">>> Start epoch 2");
        assert_eq!(ShapeLoggingCallback::epoch_end_line(2), ">>> End   epoch 2");
        assert_eq!(
            ShapeLoggingCallback::train_begin_line(12.5),
            "*****  Start of Training 12.500"
        );
        assert!(ShapeLoggingCallback::train_end_line(1.0).starts_with("***** End of Training"));
    }

    #[test]
    fn test_batch_begin_lists_registered_inputs() {
        let rois = TensorSummary::new("input_rois", vec![1, 4, 4]);
        let c5 = TensorSummary::new("backbone_c5", vec![1, 2048, 32, 32]);
        let callback = ShapeLoggingCallback::new(vec![rois.clone(), c5.clone()]);

        let lines = callback.batch_begin_lines(0, &Logs::batch(1));
        assert_eq!(
            lines,
            vec![
                "... Start training of batch 0 size 1".to_string(),
                format!("    {}", format_input(0, &rois)),
                format!("    {}", format_input(1, &c5)),
            ]
        );
        assert!(lines[1].contains("input_rois"));
        assert!(lines[2].ends_with("[1, 2048, 32, 32]"));

        let bare = ShapeLoggingCallback::default().batch_begin_lines(2, &Logs::batch(4));
        assert_eq!(bare, vec!["... Start training of batch 2 size 4".to_string()]);
    }
}
