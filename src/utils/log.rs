// src/utils/log.rs

//! Run banners on top of the `log` facade.
//!
//! Keeps step and summary lines consistent between the CLI and Lambda
//! outputs, whichever logger backend is installed.

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {}/{}] {}", step_num, total, message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    for line in format_summary(title, items) {
        log::info!("{}", line);
    }
}

/// Render a summary as the lines [`summary`] logs.
pub fn format_summary(title: &str, items: &[(&str, String)]) -> Vec<String> {
    std::iter::once(format!("[SUMMARY] {title}"))
        .chain(items.iter().map(|(k, v)| format!("    {k}: {v}")))
        .collect()
}
