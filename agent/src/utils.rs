//! Utility functions

use std::time::Duration;

use anyhow::{bail, Context};
use colored::*;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::camera::device::list_video_devices;
use crate::storage::settings::{ActivitySourceKind, Settings};

const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(5);

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

fn report(name: &str, result: &anyhow::Result<String>) {
    match result {
        Ok(detail) => println!("  {} {}: {}", "✓".green(), name.bold(), detail),
        Err(e) => println!("  {} {}: {:#}", "✗".red(), name.bold(), e),
    }
}

/// Print ffmpeg availability, local cameras and activity source reachability
pub async fn run_diagnostic(settings: &Settings) {
    let version = version_info();
    println!(
        "{} {} ({})",
        "timelapser".bold(),
        version.version,
        version.git_hash.dimmed()
    );
    println!();

    println!("{}", "Checking encoders...".yellow());
    report("capture ffmpeg", &check_ffmpeg(&settings.camera.ffmpeg_bin).await);
    if settings.video.ffmpeg_bin != settings.camera.ffmpeg_bin {
        report("video ffmpeg", &check_ffmpeg(&settings.video.ffmpeg_bin).await);
    }
    println!();

    println!("{}", "Checking cameras...".yellow());
    let devices = list_video_devices();
    if devices.is_empty() {
        println!("  {} no local video devices found", "✗".red());
    }
    for device in devices {
        println!("  {} {}", "✓".green(), device);
    }
    println!();

    println!("{}", "Checking activity source...".yellow());
    report("activity source", &check_activity_source(settings).await);
    println!("  timelapse dir: {}", settings.timelapse_dir.display().to_string().cyan());
}

async fn check_ffmpeg(bin: &str) -> anyhow::Result<String> {
    let output = tokio::time::timeout(DIAGNOSTIC_TIMEOUT, Command::new(bin).arg("-version").output())
        .await
        .context("timed out")?
        .with_context(|| format!("failed to run {}", bin))?;
    if !output.status.success() {
        bail!("{} -version exited with {}", bin, output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().to_string())
}

async fn check_activity_source(settings: &Settings) -> anyhow::Result<String> {
    match settings.activity_source {
        ActivitySourceKind::Poll => {
            let client = reqwest::Client::builder()
                .timeout(DIAGNOSTIC_TIMEOUT)
                .build()
                .context("failed to build HTTP client")?;
            let response = client
                .get(&settings.poll.url)
                .send()
                .await
                .with_context(|| format!("GET {} failed", settings.poll.url))?;
            Ok(format!("GET {} -> {}", settings.poll.url, response.status()))
        }
        ActivitySourceKind::Stream => {
            let url = url::Url::parse(&settings.stream.url)
                .with_context(|| format!("invalid stream url {}", settings.stream.url))?;
            let host = url.host_str().context("stream url has no host")?;
            let port = url.port_or_known_default().context("stream url has no port")?;
            check_tcp(host, port).await?;
            Ok(format!("{} reachable", settings.stream.url))
        }
        ActivitySourceKind::Mqtt => {
            check_tcp(&settings.mqtt.host, settings.mqtt.port).await?;
            Ok(format!(
                "broker {}:{} reachable (topics {}, {})",
                settings.mqtt.host, settings.mqtt.port, settings.mqtt.running_topic, settings.mqtt.file_topic
            ))
        }
    }
}

async fn check_tcp(host: &str, port: u16) -> anyhow::Result<()> {
    tokio::time::timeout(DIAGNOSTIC_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .with_context(|| format!("connecting to {}:{} timed out", host, port))?
        .with_context(|| format!("failed to connect to {}:{}", host, port))?;
    Ok(())
}
