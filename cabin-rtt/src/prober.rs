//! Collecting probe output from live hosts.

use async_trait::async_trait;
use cabin_core::{HarnessError, Result};
use tokio::process::Command;
use tracing::{info, warn};

/// Separates the output of consecutive targets.
pub const TARGET_DELIMITER: &str = "----";

#[async_trait]
pub trait Prober: Send + Sync {
    /// Raw probe output for one target.
    async fn probe(&self, target: &str) -> Result<String>;
}

/// Runs the system `ping`.
#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
    count: u32,
}

impl Default for PingProber {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            count: 10,
        }
    }
}

impl PingProber {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, target: &str) -> Result<String> {
        info!("Probing {} with {} echo requests", target, self.count);
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(self.count.to_string())
            .arg(target)
            .output()
            .await
            .map_err(|e| HarnessError::sandbox(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            // ping exits non-zero on partial loss; keep whatever replies came back
            warn!(
                "{} {} exited with {}: {}",
                self.program,
                target,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Probes every target in turn and joins the outputs with delimiter lines.
pub async fn probe_all<P: Prober + ?Sized>(prober: &P, targets: &[String]) -> Result<String> {
    let mut outputs = Vec::with_capacity(targets.len());
    for target in targets {
        outputs.push(prober.probe(target).await?);
    }
    Ok(outputs.join(&format!("{}\n", TARGET_DELIMITER)))
}
