use std::io::{self, BufRead, Write};

use anyhow::Result;
use tracing::warn;

/// Keyword that marks an anti-automation interstitial. Deliberately broad:
/// a false positive costs one manual confirmation, a false negative costs a
/// retry slot on a near-empty record.
const CHALLENGE_MARKER: &str = "captcha";

/// Pure content check, case-insensitive over the full page source.
pub fn detect(content: &str) -> bool {
    content.to_lowercase().contains(CHALLENGE_MARKER)
}

/// Out-of-band operator confirmation. There is no automated solver; the only
/// way forward on a challenge (or a manual login) is a human at the visible
/// browser window.
pub trait Operator {
    /// Block until the operator confirms the prompt. No timeout.
    fn confirm(&self, prompt: &str) -> Result<()>;
}

/// Reads a line from stdin. Bounded only by operator action.
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn confirm(&self, prompt: &str) -> Result<()> {
        warn!("manual step required: {prompt}");
        print!("{prompt} Press Enter when done... ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_keyword_any_case() {
        assert!(detect("please solve this CAPTCHA to continue"));
        assert!(detect("<title>Captcha Check</title><body></body>"));
        assert!(detect("captcha"));
    }

    #[test]
    fn ignores_normal_content() {
        assert!(!detect("<div id=\"productTitle\">A Book</div>"));
        assert!(!detect(""));
    }

    #[test]
    fn detection_depends_only_on_content() {
        let page = "<html><p>robot check captcha</p><div id=\"productTitle\">x</div></html>";
        assert!(detect(page));
        assert!(!detect(&page.replace("captcha", "")));
    }
}
