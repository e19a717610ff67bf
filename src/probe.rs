//! 外部媒体工具端口
//!
//! 规范化与帧率分析依赖 ffprobe / ffmpeg / fpcalc。这些调用都被收进
//! [`MediaProbe`] 这个能力接口里：生产环境用 [`FfmpegProbe`]，测试里换成
//! 返回固定数据的替身，核心逻辑从不直接起进程。
//!
//! 每次调用都带超时；超时或失败返回 [`ProbeError`]，由调用方降级。
//! 这里不做重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::ProbeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    /// 容器声明的帧率 (有理数字符串，如 "30000/1001")
    pub declared_frame_rate: String,
    /// 平均帧率 (有理数字符串)
    pub average_frame_rate: String,
    /// 实际解码出的帧数
    pub frame_count: Option<u64>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// 视频规范帧的采样方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampling {
    pub fps: u32,
    pub size: u32,
    pub max_frames: u32,
}

impl Default for FrameSampling {
    fn default() -> Self {
        Self {
            fps: 1,
            size: 32,
            max_frames: 10,
        }
    }
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe_audio(&self, path: &Path) -> Result<AudioStreamInfo, ProbeError>;

    /// Chromaprint 指纹 (对原始文件计算)
    async fn acoustic_fingerprint(&self, path: &Path) -> Result<String, ProbeError>;

    /// 重采样为单声道 s16le PCM
    async fn normalized_waveform(
        &self,
        path: &Path,
        sample_rate: u32,
    ) -> Result<Vec<u8>, ProbeError>;

    async fn probe_video(&self, path: &Path) -> Result<VideoStreamInfo, ProbeError>;

    /// 返回拼接在一起的灰度帧，每帧 size*size 字节
    async fn sample_frames(
        &self,
        path: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<u8>, ProbeError>;
}

// ==========================================
// ffprobe / ffmpeg / fpcalc 实现
// ==========================================

pub struct FfmpegProbe {
    timeout: Duration,
}

impl FfmpegProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ProbeError> {
        tracing::debug!(program, ?args, "调用外部工具");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProbeError::Unavailable(format!("{} not installed", program))
                }
                _ => ProbeError::Unavailable(format!("{}: {}", program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaProbe for FfmpegProbe {
    async fn probe_audio(&self, path: &Path) -> Result<AudioStreamInfo, ProbeError> {
        let path = path_str(path)?;
        let stdout = self
            .run(
                "ffprobe",
                &[
                    "-v", "error",
                    "-select_streams", "a:0",
                    "-show_entries", "stream=sample_rate,channels:format=duration",
                    "-of", "json",
                    path,
                ],
            )
            .await?;
        parse_audio_probe(&stdout)
    }

    async fn acoustic_fingerprint(&self, path: &Path) -> Result<String, ProbeError> {
        let path = path_str(path)?;
        let stdout = self.run("fpcalc", &["-json", path]).await?;

        #[derive(Deserialize)]
        struct FpcalcOutput {
            fingerprint: String,
        }

        let parsed: FpcalcOutput =
            serde_json::from_slice(&stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;
        Ok(parsed.fingerprint)
    }

    async fn normalized_waveform(
        &self,
        path: &Path,
        sample_rate: u32,
    ) -> Result<Vec<u8>, ProbeError> {
        let path = path_str(path)?;
        let rate = sample_rate.to_string();
        let pcm = self
            .run(
                "ffmpeg",
                &["-v", "error", "-i", path, "-ac", "1", "-ar", &rate, "-f", "s16le", "-"],
            )
            .await?;
        if pcm.is_empty() {
            return Err(ProbeError::NoStream("audio"));
        }
        Ok(pcm)
    }

    async fn probe_video(&self, path: &Path) -> Result<VideoStreamInfo, ProbeError> {
        let path = path_str(path)?;
        let stdout = self
            .run(
                "ffprobe",
                &[
                    "-v", "error",
                    "-select_streams", "v:0",
                    "-count_frames",
                    "-show_entries",
                    "stream=r_frame_rate,avg_frame_rate,nb_read_frames,nb_frames,width,height,duration:format=duration",
                    "-of", "json",
                    path,
                ],
            )
            .await?;
        parse_video_probe(&stdout)
    }

    async fn sample_frames(
        &self,
        path: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<u8>, ProbeError> {
        let path = path_str(path)?;
        let filter = format!(
            "fps={},scale={}:{},format=gray",
            sampling.fps, sampling.size, sampling.size
        );
        let max_frames = sampling.max_frames.to_string();
        let frames = self
            .run(
                "ffmpeg",
                &[
                    "-v", "error", "-i", path, "-vf", &filter, "-frames:v", &max_frames,
                    "-f", "rawvideo", "-",
                ],
            )
            .await?;
        if frames.is_empty() {
            return Err(ProbeError::NoStream("video"));
        }
        Ok(frames)
    }
}

fn path_str(path: &Path) -> Result<&str, ProbeError> {
    path.to_str()
        .ok_or_else(|| ProbeError::Failed(format!("non UTF-8 path: {}", path.display())))
}

// ==========================================
// ffprobe JSON 解析
// ==========================================
// ffprobe 把大多数数值输出成字符串，这里统一按字符串收再解析。

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    sample_rate: Option<String>,
    channels: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_read_frames: Option<String>,
    nb_frames: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

pub fn parse_audio_probe(stdout: &[u8]) -> Result<AudioStreamInfo, ProbeError> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or(ProbeError::NoStream("audio"))?;

    Ok(AudioStreamInfo {
        duration: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse().ok()),
        sample_rate: stream.sample_rate.and_then(|r| r.parse().ok()),
        channels: stream.channels,
    })
}

pub fn parse_video_probe(stdout: &[u8]) -> Result<VideoStreamInfo, ProbeError> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or(ProbeError::NoStream("video"))?;

    // 优先用实际解码帧数，其次容器里记录的帧数
    let frame_count = stream
        .nb_read_frames
        .as_deref()
        .and_then(|n| n.parse().ok())
        .or_else(|| stream.nb_frames.as_deref().and_then(|n| n.parse().ok()));

    let duration = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse().ok())
        .or_else(|| {
            parsed
                .format
                .and_then(|f| f.duration)
                .and_then(|d| d.parse().ok())
        });

    Ok(VideoStreamInfo {
        declared_frame_rate: stream.r_frame_rate.unwrap_or_else(|| "0/0".to_string()),
        average_frame_rate: stream.avg_frame_rate.unwrap_or_else(|| "0/0".to_string()),
        frame_count,
        duration,
        width: stream.width,
        height: stream.height,
    })
}
