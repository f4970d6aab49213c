use crossbeam_channel::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub current_step: String,
    pub total_steps: Option<usize>,
    pub current_step_number: Option<usize>,
}

/// Fire-and-forget sender of progress updates. Dropped or disconnected
/// receivers are ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn new(sender: Sender<ProgressUpdate>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A reporter that drops every update.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Reporter plus the receiving end of an unbounded channel.
    pub fn channel() -> (Self, Receiver<ProgressUpdate>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    pub fn emit(
        &self,
        progress: f64,
        step: impl Into<String>,
        total_steps: Option<usize>,
        current_step: Option<usize>,
    ) {
        if let Some(sender) = &self.sender {
            let update = ProgressUpdate {
                progress,
                current_step: step.into(),
                total_steps,
                current_step_number: current_step,
            };
            let _ = sender.send(update);
        }
    }
}

/// Renders updates as a console progress bar until every sender is dropped.
pub fn spawn_console_progress(receiver: Receiver<ProgressUpdate>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        for update in receiver.iter() {
            if let Some(total) = update.total_steps {
                pb.set_length(total as u64);
            }
            if let Some(step) = update.current_step_number {
                pb.set_position(step as u64);
            }
            pb.set_message(update.current_step);
        }

        pb.finish_with_message("Shadow calculation complete");
    })
}
