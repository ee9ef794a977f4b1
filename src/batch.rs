use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::{info, warn};

use crate::browser::{PageEngine, Posture, SCROLL_TO_BOTTOM};
use crate::challenge::{self, Operator};
use crate::extract::{self, Extraction};
use crate::output::{self, RecordSink};
use crate::record::Record;

/// Element whose arrival usually means the product page finished rendering.
/// Missing it is non-fatal; extraction proceeds on whatever has loaded.
const RENDER_ANCHOR: &str = "#reviewFeatureGroup";
const RENDER_WAIT: Duration = Duration::from_secs(30);

pub struct BatchConfig {
    /// Retry attempts per failed target after the main pass.
    pub retry_attempts: u32,
    /// Uniform pacing delay (seconds) after every page fetch. Part of the
    /// operating posture toward the site, not a correctness mechanism.
    pub pause_secs: (f64, f64),
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            pause_secs: (5.0, 10.0),
        }
    }
}

/// The one batch-fatal condition. Field- and target-level failures are
/// absorbed into the record or the failure list and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("challenge page persisted immediately after manual resolution")]
    ChallengeWall,
}

#[derive(Debug)]
pub struct BatchReport {
    pub accepted: usize,
    pub failed: Vec<String>,
}

/// Per-target progress through one attempt. `Resolving` is handled by
/// `resolve_challenge`, which both challenge entry points funnel into.
enum State {
    ChallengeCheck,
    Extracting(String),
    Validating(Record),
}

enum Outcome {
    Accepted(Record),
    Invalid,
}

/// Drive the whole batch: main pass, bounded retry passes over the failure
/// set, incremental appends to `sink`, and the final failure list. On the
/// batch-fatal challenge wall every unwritten target is flushed to
/// `failed_path` before the error propagates.
pub async fn run<E: PageEngine, O: Operator>(
    engine: &mut E,
    operator: &O,
    targets: &[String],
    sink: &mut RecordSink,
    failed_path: &Path,
    cfg: &BatchConfig,
) -> Result<BatchReport> {
    let pb = bar(targets.len())?;
    let mut failures: Vec<String> = Vec::new();

    for (i, url) in targets.iter().enumerate() {
        info!("scraping {url}");
        match attempt_target(engine, operator, url, cfg).await {
            Ok(Outcome::Accepted(record)) => sink.append(&record)?,
            Ok(Outcome::Invalid) => {
                warn!("invalid data scraped for {url}");
                failures.push(url.clone());
            }
            Err(e) if is_fatal(&e) => {
                failures.extend(targets[i..].iter().cloned());
                flush(failed_path, &failures)?;
                pb.finish_and_clear();
                return Err(e);
            }
            Err(e) => {
                warn!("error scraping {url}: {e:#}");
                failures.push(url.clone());
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if !failures.is_empty() {
        info!("retrying {} failed URLs...", failures.len());
        failures = retry_failed(engine, operator, failures, sink, failed_path, cfg).await?;
    }

    flush(failed_path, &failures)?;
    Ok(BatchReport {
        accepted: sink.appended(),
        failed: failures,
    })
}

/// Up to `retry_attempts` further attempts per failed target, in original
/// order, short-circuiting on the first acceptance. Returns the targets
/// still failing.
async fn retry_failed<E: PageEngine, O: Operator>(
    engine: &mut E,
    operator: &O,
    failures: Vec<String>,
    sink: &mut RecordSink,
    failed_path: &Path,
    cfg: &BatchConfig,
) -> Result<Vec<String>> {
    let mut still_failing: Vec<String> = Vec::new();

    for (i, url) in failures.iter().enumerate() {
        let mut accepted = false;
        for attempt in 1..=cfg.retry_attempts {
            info!("retrying {url}, attempt {attempt}/{}", cfg.retry_attempts);
            match attempt_target(engine, operator, url, cfg).await {
                Ok(Outcome::Accepted(record)) => {
                    sink.append(&record)?;
                    accepted = true;
                    break;
                }
                Ok(Outcome::Invalid) => {
                    warn!("invalid data for {url} on retry attempt {attempt}");
                }
                Err(e) if is_fatal(&e) => {
                    let mut rest = still_failing;
                    rest.extend(failures[i..].iter().cloned());
                    flush(failed_path, &rest)?;
                    return Err(e);
                }
                Err(e) => warn!("retry {attempt} failed for {url}: {e:#}"),
            }
        }
        if !accepted {
            still_failing.push(url.clone());
        }
    }

    Ok(still_failing)
}

/// One pass of the per-target state machine:
/// `ChallengeCheck → Extracting → Validating`, with at most one
/// resolve-and-retry cycle before the challenge wall is fatal.
async fn attempt_target<E: PageEngine, O: Operator>(
    engine: &mut E,
    operator: &O,
    url: &str,
    cfg: &BatchConfig,
) -> Result<Outcome> {
    let mut resolved_once = false;
    let mut state = State::ChallengeCheck;

    loop {
        state = match state {
            State::ChallengeCheck => {
                engine.open(url).await?;
                engine.wait_for(RENDER_ANCHOR, RENDER_WAIT).await;
                engine.execute_script(SCROLL_TO_BOTTOM).await?;
                pause(cfg).await;
                let content = engine.content().await?;
                if challenge::detect(&content) {
                    resolve_challenge(engine, operator, url, &mut resolved_once).await?;
                    State::ChallengeCheck
                } else {
                    State::Extracting(content)
                }
            }
            State::Extracting(content) => match extract::extract(&content, url) {
                Extraction::Challenge => {
                    resolve_challenge(engine, operator, url, &mut resolved_once).await?;
                    State::ChallengeCheck
                }
                Extraction::Record(record) => State::Validating(record),
            },
            State::Validating(record) => {
                return Ok(if record.is_valid() {
                    Outcome::Accepted(record)
                } else {
                    Outcome::Invalid
                });
            }
        };
    }
}

/// The `Resolving` transition: tear down the discreet session, hand a
/// visible window to the operator, tear that down, come back discreet.
/// A second challenge in the same check sequence is the challenge wall.
async fn resolve_challenge<E: PageEngine, O: Operator>(
    engine: &mut E,
    operator: &O,
    url: &str,
    resolved_once: &mut bool,
) -> Result<()> {
    if *resolved_once {
        warn!("challenge detected again right after resolution; stopping batch");
        return Err(BatchError::ChallengeWall.into());
    }
    warn!("challenge detected on {url}; switching to interactive posture");
    engine.set_posture(Posture::Interactive).await?;
    engine.open(url).await?;
    operator.confirm("Please solve the challenge in the browser window.")?;
    engine.set_posture(Posture::Discreet).await?;
    *resolved_once = true;
    Ok(())
}

/// Pre-batch sweep of a landing page, with the same one-resolve rule.
pub async fn challenge_sweep<E: PageEngine, O: Operator>(
    engine: &mut E,
    operator: &O,
    url: &str,
) -> Result<()> {
    let mut resolved_once = false;
    loop {
        engine.open(url).await?;
        let content = engine.content().await?;
        if !challenge::detect(&content) {
            return Ok(());
        }
        resolve_challenge(engine, operator, url, &mut resolved_once).await?;
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<BatchError>().is_some()
}

fn flush(failed_path: &Path, failures: &[String]) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    output::write_failures(failed_path, failures)
}

async fn pause(cfg: &BatchConfig) {
    let (lo, hi) = cfg.pause_secs;
    if hi <= 0.0 {
        return;
    }
    let secs = rand::rng().random_range(lo..=hi);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

fn bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

// ── Tests ──
