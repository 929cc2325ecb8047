use indicatif::{ProgressBar, ProgressStyle};

use crate::api::ImportSnapshot;

/// Create the percentage bar for import monitoring
pub fn create_import_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb
}

/// Create a spinner for indeterminate waiting
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb
}

/// Position the bar from a progress snapshot (floor-rounded percent)
pub fn update_from_snapshot(pb: &ProgressBar, snapshot: &ImportSnapshot) {
    pb.set_position(snapshot.percent());
    pb.set_message(format!(
        "{}/{} processed",
        snapshot.processed, snapshot.total
    ));
}

/// Finish progress bar with success message
pub fn finish_with_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✅ {}", message));
}

/// Finish progress bar with error message
pub fn finish_with_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("❌ {}", message));
}
