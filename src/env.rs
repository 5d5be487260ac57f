//! Notebook host detection and GPU queries.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::process::Command;

/// Hosted notebook environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookHost {
    Colab,
    Kaggle,
    SageMakerStudioLab,
    VastAi,
    Azure,
    Aws,
    Unknown,
}

impl NotebookHost {
    /// Detect the host from a set of environment variables
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let has = |key: &str| vars.contains_key(key);
        let has_prefix = |prefix: &str| vars.keys().any(|k| k.starts_with(prefix));

        if has("COLAB_RELEASE_TAG") || has("COLAB_GPU") {
            NotebookHost::Colab
        } else if has("KAGGLE_KERNEL_RUN_TYPE") || has("KAGGLE_URL_BASE") {
            NotebookHost::Kaggle
        } else if vars
            .get("AWS_EXECUTION_ENV")
            .is_some_and(|v| v.contains("SageMakerNotebook"))
        {
            NotebookHost::SageMakerStudioLab
        } else if has("VAST_CONTAINERLABEL") {
            NotebookHost::VastAi
        } else if has_prefix("AZUREML_") {
            NotebookHost::Azure
        } else if has("AWS_EXECUTION_ENV") {
            NotebookHost::Aws
        } else {
            NotebookHost::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NotebookHost::Colab => "Google Colab",
            NotebookHost::Kaggle => "Kaggle",
            NotebookHost::SageMakerStudioLab => "SageMaker Studio Lab",
            NotebookHost::VastAi => "Vast.ai",
            NotebookHost::Azure => "Azure ML",
            NotebookHost::Aws => "AWS",
            NotebookHost::Unknown => "unknown",
        }
    }
}

/// Host of the running process
pub fn detect_host() -> NotebookHost {
    NotebookHost::from_vars(std::env::vars())
}

fn query_gpu(field: &str) -> Result<String> {
    let nvidia_smi = which::which("nvidia-smi").context("nvidia-smi not found; no NVIDIA GPU?")?;
    let output = Command::new(nvidia_smi)
        .arg(format!("--query-gpu={}", field))
        .arg("--format=csv,noheader,nounits")
        .output()
        .context("Failed to run nvidia-smi")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("nvidia-smi failed: {}", stderr.trim());
    }

    first_line(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("nvidia-smi returned no {}", field))
}

fn first_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Name of the first GPU
pub fn gpu_name() -> Result<String> {
    query_gpu("gpu_name")
}

/// Free memory of the first GPU in MiB
pub fn gpu_free_memory_mib() -> Result<u64> {
    let raw = query_gpu("memory.free")?;
    raw.parse()
        .with_context(|| format!("Unexpected nvidia-smi memory value: {}", raw))
}
