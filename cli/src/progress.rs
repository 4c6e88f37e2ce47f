use indicatif::{ProgressBar, ProgressStyle};
use neural_style::{ProgressUpdate, StyleProgress};

/// A progress bar over the iterations, with the current and best loss as
/// its message
pub struct LossBar {
    pb: ProgressBar,
}

impl LossBar {
    pub fn new(iterations: u32) -> Self {
        let pb = ProgressBar::new(u64::from(iterations));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .progress_chars("##-"),
        );

        Self { pb }
    }
}

impl Drop for LossBar {
    fn drop(&mut self) {
        self.pb.finish();
    }
}

impl StyleProgress for LossBar {
    fn update(&mut self, update: ProgressUpdate<'_>) {
        self.pb.set_position(update.iteration as u64 + 1);
        self.pb.set_message(&format!(
            "loss {:.4e} (style {:.3e}, content {:.3e}) best {:.4e}",
            update.loss.total, update.loss.style, update.loss.content, update.best_loss
        ));
    }
}
