use crate::fetch::DownloadOutcome;

/// One line describing a batch of downloads, appended to the agent prompt.
///
/// Returns `None` for an empty batch.
pub fn summarize(outcomes: &[DownloadOutcome]) -> Option<String> {
    if outcomes.is_empty() {
        return None;
    }

    let mut saved = Vec::new();
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome {
            DownloadOutcome::Saved {
                filename, bytes, ..
            } => saved.push(format!("{filename} ({bytes} bytes)")),
            DownloadOutcome::Failed { filename, reason } => {
                failed.push(format!("{filename}: {reason}"))
            },
        }
    }

    let noun = |n: usize| if n == 1 { "file" } else { "files" };
    let mut line = format!("({} {} saved to workspace", saved.len(), noun(saved.len()));
    if !saved.is_empty() {
        line.push_str(": ");
        line.push_str(&saved.join(", "));
    }
    if !failed.is_empty() {
        line.push_str("; failed: ");
        line.push_str(&failed.join(", "));
    }
    line.push(')');
    Some(line)
}
