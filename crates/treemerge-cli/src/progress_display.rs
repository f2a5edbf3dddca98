//! Renders the Coordinator's progress stream as a single `indicatif` bar.

use indicatif::{ProgressBar, ProgressStyle};
use treemerge_core::progress::ProgressReceiver;
use treemerge_core::ProgressSnapshot;

const TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} \
{pos}/{len} applied ({msg})";

/// Drains `rx` on the calling thread, updating one progress bar until the
/// channel closes (the Coordinator dropped its sender when the run ended).
pub fn run(rx: &ProgressReceiver, quiet: bool) {
    if quiet {
        for _ in rx.iter() {}
        return;
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for snapshot in rx.iter() {
        update(&bar, &snapshot);
    }
    bar.finish_and_clear();
}

fn update(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    bar.set_length(snapshot.total_paths);
    bar.set_position(snapshot.applied + snapshot.failed);
    bar.set_message(format!(
        "classified {}, awaiting decision {}, failed {}",
        snapshot.classified, snapshot.awaiting_decision, snapshot.failed
    ));
}
