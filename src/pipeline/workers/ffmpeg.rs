//! ffmpeg/ffprobe plumbing shared by the render and combine workers.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Hardware H.264 encoders in preference order; the last resort is software.
pub const H264_ENCODER_PREFERENCE: [&str; 3] = ["h264_amf", "h264_nvenc", "h264_qsv"];

/// Software fallback encoder.
pub const H264_SOFTWARE_ENCODER: &str = "libx264";

/// Frame rate and geometry of a video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: String,
    #[serde(default)]
    r_frame_rate: String,
}

/// Parse an ffprobe rational frame rate ("30000/1001", "60/1").
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = match raw.split_once('/') {
        Some((num, den)) => (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?),
        None => (raw.parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Probe the first video stream of `path` for width/height/fps.
pub async fn probe_video(ffprobe_path: &str, path: &Path) -> Result<VideoProbe> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate",
            "-print_format",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::missing_input(format!("ffprobe binary not found: {e}"))
            } else {
                Error::worker(format!("Failed to run ffprobe: {e}"))
            }
        })?;

    if !output.status.success() {
        return Err(Error::worker(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| Error::worker(format!("No video stream in {}", path.display())))?;

    let fps = parse_frame_rate(&stream.avg_frame_rate)
        .or_else(|| parse_frame_rate(&stream.r_frame_rate))
        .unwrap_or(30.0);

    Ok(VideoProbe {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
    })
}

/// Pick the preferred available H.264 encoder from `ffmpeg -encoders` output.
pub fn pick_h264_encoder(encoders_output: &str) -> &'static str {
    for candidate in H264_ENCODER_PREFERENCE {
        if encoders_output
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(candidate))
        {
            return candidate;
        }
    }
    H264_SOFTWARE_ENCODER
}

/// Probe the ffmpeg build for its best available H.264 encoder.
/// Falls back to software if the probe fails.
pub async fn detect_h264_encoder(ffmpeg_path: &str) -> &'static str {
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            pick_h264_encoder(&String::from_utf8_lossy(&out.stdout))
        }
        _ => H264_SOFTWARE_ENCODER,
    }
}

/// Run an ffmpeg command configured with `-progress pipe:1`, emitting one
/// status per progress block. Cancellation kills the process.
pub async fn run_ffmpeg_with_progress(
    mut cmd: Command,
    label: &str,
    status_tx: &mpsc::Sender<Result<String>>,
    cancel: &CancellationToken,
) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::missing_input(format!("ffmpeg binary not found: {e}"))
        } else {
            Error::worker(format!("Failed to spawn ffmpeg: {e}"))
        }
    })?;

    enum Line {
        Progress(String),
        Log(String),
    }

    let (line_tx, mut line_rx) = mpsc::channel::<Line>(64);
    if let Some(stdout) = child.stdout.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(Line::Progress(line)).await.is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = line_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(Line::Log(line)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(line_tx);

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut last_error_line: Option<String> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Cancelled);
            }
            line = line_rx.recv() => match line {
                Some(Line::Progress(line)) => {
                    let Some((key, value)) = line.split_once('=') else {
                        continue;
                    };
                    if key == "progress" {
                        let status = format_progress(label, &fields);
                        let _ = status_tx.send(Ok(status)).await;
                        fields.clear();
                    } else {
                        fields.insert(key.to_string(), value.trim().to_string());
                    }
                }
                Some(Line::Log(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!("ffmpeg: {trimmed}");
                    if trimmed.to_ascii_lowercase().contains("error") {
                        last_error_line = Some(trimmed.to_string());
                    }
                }
                None => break,
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::worker(format!("Failed to wait for ffmpeg: {e}")))?;

    if !status.success() {
        let detail = last_error_line.unwrap_or_else(|| "no error output".to_string());
        return Err(Error::worker(format!(
            "ffmpeg exited with code {}: {detail}",
            status.code().unwrap_or(-1)
        )));
    }

    Ok(())
}

fn format_progress(label: &str, fields: &HashMap<String, String>) -> String {
    let mut status = String::from(label);
    for key in ["out_time", "fps", "speed"] {
        if let Some(value) = fields.get(key).filter(|v| !v.is_empty() && *v != "N/A") {
            status.push_str(&format!(" {key}={value}"));
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("60/1"), Some(60.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
    }

    #[test]
    fn test_pick_h264_encoder_preference_order() {
        let all = " V....D h264_amf             AMD AMF H.264 Encoder\n \
                   V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n \
                   V....D h264_qsv             H.264 (Intel Quick Sync Video)\n \
                   V....D libx264              libx264 H.264\n";
        assert_eq!(pick_h264_encoder(all), "h264_amf");

        let nvidia_only = " V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n \
                           V....D libx264              libx264 H.264\n";
        assert_eq!(pick_h264_encoder(nvidia_only), "h264_nvenc");

        let intel_only = " V....D h264_qsv             H.264 (Intel Quick Sync Video)\n";
        assert_eq!(pick_h264_encoder(intel_only), "h264_qsv");

        assert_eq!(pick_h264_encoder(""), H264_SOFTWARE_ENCODER);
    }

    #[test]
    fn test_pick_h264_encoder_ignores_description_mentions() {
        // A description mentioning "h264_nvenc" must not count as available.
        let misleading = " V....D libx264              like h264_nvenc but in software\n";
        assert_eq!(pick_h264_encoder(misleading), H264_SOFTWARE_ENCODER);
    }

    #[test]
    fn test_format_progress_skips_missing_fields() {
        let mut fields = HashMap::new();
        fields.insert("out_time".to_string(), "00:01:02.5".to_string());
        fields.insert("speed".to_string(), "N/A".to_string());
        let status = format_progress("Combining", &fields);
        assert_eq!(status, "Combining out_time=00:01:02.5");
    }

    #[test]
    fn test_ffprobe_json_parsing() {
        let raw = r#"{"streams":[{"width":1920,"height":1080,"avg_frame_rate":"60/1","r_frame_rate":"60/1"}]}"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.streams[0].width, Some(1920));
        assert_eq!(parse_frame_rate(&parsed.streams[0].avg_frame_rate), Some(60.0));
    }
}
