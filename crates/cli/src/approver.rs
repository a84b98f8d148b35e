//! Interactive approval on the terminal.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use runtime::{ApprovalChannel, ApprovalRequest};

/// Asks on stderr, reads the answer from stdin. Anything but `y`/`yes`
/// (including EOF or a read error) is a denial.
pub struct TerminalApprover;

#[async_trait]
impl ApprovalChannel for TerminalApprover {
    async fn confirm(&self, request: &ApprovalRequest) -> bool {
        let prompt = format!(
            "\nApproval required: {}\n  params: {}\nAllow? [y/N] ",
            request.reason, request.params
        );
        tokio::task::spawn_blocking(move || ask(&prompt))
            .await
            .unwrap_or(false)
    }
}

fn ask(prompt: &str) -> bool {
    let mut stderr = io::stderr();
    if write!(stderr, "{prompt}").and_then(|_| stderr.flush()).is_err() {
        return false;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => is_yes(&line),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
