//! 模块：内容规范化 & 指纹 (Content Canonicalizer)
//!
//! **职责**: 把一份原始媒体变成确定性的指纹记录。
//!
//! 每种媒体都走“两条轨道”：
//! - **精确层**: 对规范化之后的字节做 SHA256。规范字节相同 → 指纹必然相同；
//!   哪怕改动一个采样点，哈希也会雪崩式变化。
//! - **感知层**: pHash / Chromaprint / 帧哈希序列，用来容忍转码、压缩这类良性变化。
//!
//! 规范化工具不可用时退回到“原始字节直接哈希”，并把 `canonicalization`
//! 标成 `none`、`perceptual_robust` 置为 false，调用方一眼能看出没有鲁棒性保障。

use img_hash::image::{DynamicImage, GenericImageView, GrayImage};
use img_hash::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, VerifyError};
use crate::evidence::{DerivedMetadata, Fingerprint, MediaKind};
use crate::probe::{FrameSampling, MediaProbe, VideoStreamInfo};

/// 音频规范形式：单声道 16 kHz s16le
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;
pub const AUDIO_CANONICALIZATION: &str = "mono_16khz_s16le";

/// 视频回退路径的滚动分段大小
pub const SEGMENT_SIZE: usize = 1024 * 1024;
pub const MAX_SEGMENTS: usize = 10;

const NO_CANONICALIZATION: &str = "none";

/// 调用方提供的上下文：文件路径 (外部工具需要) 和原始文件名 (用于推断类型)
#[derive(Debug, Clone, Default)]
pub struct CanonicalizeContext {
    pub path: Option<PathBuf>,
    pub file_name: Option<String>,
}

impl CanonicalizeContext {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            path: Some(path),
            file_name,
        }
    }

    fn extension(&self) -> Option<String> {
        self.file_name
            .as_deref()
            .map(Path::new)
            .or(self.path.as_deref())
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// worker 进程输出的音频指纹 JSON，字段名是对外契约
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFingerprintRecord {
    pub algorithm: String,
    pub chromaprint: Option<String>,
    pub sha256_normalized: String,
    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub canonicalization: String,
}

impl AudioFingerprintRecord {
    pub fn from_fingerprint(fp: &Fingerprint) -> Self {
        Self {
            algorithm: fp.algorithm.clone(),
            chromaprint: fp.perceptual.clone(),
            sha256_normalized: fp.primary_hash.clone(),
            duration: fp.metadata.duration,
            sample_rate: fp.metadata.sample_rate,
            channels: fp.metadata.channels,
            canonicalization: fp.canonicalization.clone(),
        }
    }
}

/// 规范化的完整产物
///
/// 视频的流信息 (`ffprobe -count_frames` 要解码整条流) 在规范化时已经拿到，
/// 帧率检查直接复用，同一份素材只探测一次。
/// `None` 表示根本没有探测 (非视频或没有配置媒体工具)。
#[derive(Debug, Clone)]
pub struct Canonicalized {
    pub fingerprint: Fingerprint,
    pub video_stream: Option<std::result::Result<VideoStreamInfo, String>>,
}

pub struct ContentCanonicalizer {
    probe: Option<Arc<dyn MediaProbe>>,
    sampling: FrameSampling,
}

impl ContentCanonicalizer {
    /// `probe` 为 None 时音视频一律走回退路径
    pub fn new(probe: Option<Arc<dyn MediaProbe>>) -> Self {
        Self {
            probe,
            sampling: FrameSampling::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: FrameSampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub async fn canonicalize(
        &self,
        kind: MediaKind,
        bytes: &[u8],
        ctx: &CanonicalizeContext,
    ) -> Result<Fingerprint> {
        Ok(self.canonicalize_detailed(kind, bytes, ctx).await?.fingerprint)
    }

    /// 同 `canonicalize`，另外带回探测到的视频流信息
    pub async fn canonicalize_detailed(
        &self,
        kind: MediaKind,
        bytes: &[u8],
        ctx: &CanonicalizeContext,
    ) -> Result<Canonicalized> {
        if bytes.is_empty() {
            return Err(VerifyError::InvalidAsset("empty media file".to_string()));
        }

        let mut video_stream = None;
        let fp = match kind {
            MediaKind::Image => {
                // 解码 + 梯度哈希是 CPU 密集型操作，挪到 blocking 线程池
                let owned = bytes.to_vec();
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || canonicalize_image(&owned, &ctx))
                    .await
                    .map_err(|e| VerifyError::InvalidAsset(format!("Task join error: {}", e)))?
            }
            MediaKind::Audio => self.canonicalize_audio(bytes, ctx).await?,
            MediaKind::Video => {
                let (fp, stream) = self.canonicalize_video(bytes, ctx).await?;
                video_stream = stream;
                fp
            }
        };

        tracing::info!(
            kind = %kind,
            algorithm = %fp.algorithm,
            canonicalization = %fp.canonicalization,
            hash = %fp.primary_hash,
            "🧬 指纹生成完成"
        );
        Ok(Canonicalized {
            fingerprint: fp,
            video_stream,
        })
    }

    async fn canonicalize_audio(&self, bytes: &[u8], ctx: &CanonicalizeContext) -> Result<Fingerprint> {
        let Some(probe) = &self.probe else {
            tracing::warn!("未配置媒体工具，音频指纹退回原始字节哈希");
            return Ok(raw_fallback(MediaKind::Audio, bytes, ctx));
        };

        let (path, _spilled) = resolve_path(bytes, ctx)?;

        // 三个探针互不依赖，并发执行
        let (info, chroma, waveform) = tokio::join!(
            probe.probe_audio(&path),
            probe.acoustic_fingerprint(&path),
            probe.normalized_waveform(&path, CANONICAL_SAMPLE_RATE),
        );

        let info = info
            .map_err(|e| tracing::warn!(error = %e, "音频元数据探测失败"))
            .unwrap_or_default();
        let chromaprint = chroma
            .map_err(|e| tracing::warn!(error = %e, "Chromaprint 不可用，感知层留空"))
            .ok();

        // 主哈希只取决于规范波形；algorithm 标签只说明感知层有没有 Chromaprint，
        // 不参与指纹库主键 (见 `Fingerprint::store_key`)
        let mut fp = match waveform {
            Ok(pcm) => Fingerprint {
                algorithm: if chromaprint.is_some() {
                    "chromaprint+sha256_normalized".to_string()
                } else {
                    "sha256_normalized".to_string()
                },
                primary_hash: sha256_hex(&pcm),
                perceptual_robust: chromaprint.is_some(),
                perceptual: chromaprint,
                media_kind: MediaKind::Audio,
                canonicalization: AUDIO_CANONICALIZATION.to_string(),
                metadata: DerivedMetadata::default(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "波形规范化失败，退回原始字节哈希");
                let mut fp = raw_fallback(MediaKind::Audio, bytes, ctx);
                fp.perceptual = chromaprint;
                fp
            }
        };

        fp.metadata.duration = info.duration;
        fp.metadata.sample_rate = info.sample_rate;
        fp.metadata.channels = info.channels;
        Ok(fp)
    }

    async fn canonicalize_video(
        &self,
        bytes: &[u8],
        ctx: &CanonicalizeContext,
    ) -> Result<(Fingerprint, Option<std::result::Result<VideoStreamInfo, String>>)> {
        let Some(probe) = &self.probe else {
            tracing::warn!("未配置媒体工具，视频指纹退回滚动分段哈希");
            return Ok((segment_fallback(bytes, ctx), None));
        };

        let (path, _spilled) = resolve_path(bytes, ctx)?;
        let (info, frames) = tokio::join!(
            probe.probe_video(&path),
            probe.sample_frames(&path, self.sampling),
        );

        let mut fp = match frames {
            Ok(frames) => {
                let frame_len = (self.sampling.size * self.sampling.size) as usize;
                let frame_hashes = hash_gray_frames(&frames, self.sampling.size, frame_len);
                Fingerprint {
                    algorithm: "sha256_frames+gradient_phash".to_string(),
                    primary_hash: sha256_hex(&frames),
                    perceptual_robust: !frame_hashes.is_empty(),
                    perceptual: (!frame_hashes.is_empty()).then(|| frame_hashes.join(",")),
                    media_kind: MediaKind::Video,
                    canonicalization: format!(
                        "gray_{size}x{size}_{fps}fps_frames",
                        size = self.sampling.size,
                        fps = self.sampling.fps
                    ),
                    metadata: DerivedMetadata::default(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "抽帧失败，退回滚动分段哈希");
                segment_fallback(bytes, ctx)
            }
        };

        if let Ok(info) = &info {
            fp.metadata.duration = info.duration;
            fp.metadata.width = info.width;
            fp.metadata.height = info.height;
        }
        Ok((fp, Some(info.map_err(|e| e.to_string()))))
    }
}

/// 图片：规范形式就是原始字节流
///
/// 能解码时附带 8x8 梯度 pHash；解码失败 (HEIC 等不支持的格式) 时退回直接哈希。
pub fn canonicalize_image(bytes: &[u8], ctx: &CanonicalizeContext) -> Fingerprint {
    let sha = sha256_hex(bytes);

    match img_hash::image::load_from_memory(bytes) {
        Ok(img) => {
            let (width, height) = img.dimensions();
            Fingerprint {
                algorithm: "sha256+gradient_phash".to_string(),
                primary_hash: sha,
                perceptual: Some(image_phash(&img)),
                media_kind: MediaKind::Image,
                canonicalization: "raw_bytes".to_string(),
                perceptual_robust: true,
                metadata: DerivedMetadata {
                    width: Some(width),
                    height: Some(height),
                    ..Default::default()
                },
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "图片无法解码，退回原始字节哈希");
            raw_fallback(MediaKind::Image, bytes, ctx)
        }
    }
}

/// 梯度算法比均值算法对明暗变化更鲁棒；输出 64 位，Base64 编码
pub fn image_phash(img: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    hasher.hash_image(img).to_base64()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// 每 `segment_size` 字节一段，输出 `seg_<i>:<16 位 hex>`，最多 `limit` 段
pub fn rolling_segment_hashes(bytes: &[u8], segment_size: usize, limit: usize) -> Vec<String> {
    bytes
        .chunks(segment_size.max(1))
        .take(limit)
        .enumerate()
        .map(|(i, segment)| format!("seg_{}:{}", i, &sha256_hex(segment)[..16]))
        .collect()
}

pub fn infer_mime(extension: &str) -> Option<&'static str> {
    const MIME_TABLE: &[(&str, &str)] = &[
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("heic", "image/heic"),
        ("heif", "image/heif"),
        ("tif", "image/tiff"),
        ("tiff", "image/tiff"),
        ("bmp", "image/bmp"),
        ("mp4", "video/mp4"),
        ("mov", "video/quicktime"),
        ("webm", "video/webm"),
        ("mkv", "video/x-matroska"),
        ("avi", "video/x-msvideo"),
        ("mp3", "audio/mpeg"),
        ("wav", "audio/wav"),
        ("flac", "audio/flac"),
        ("m4a", "audio/mp4"),
        ("ogg", "audio/ogg"),
        ("aac", "audio/aac"),
    ];
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

fn raw_fallback(kind: MediaKind, bytes: &[u8], ctx: &CanonicalizeContext) -> Fingerprint {
    Fingerprint {
        algorithm: "sha256".to_string(),
        primary_hash: sha256_hex(bytes),
        perceptual: None,
        media_kind: kind,
        canonicalization: NO_CANONICALIZATION.to_string(),
        perceptual_robust: false,
        metadata: DerivedMetadata {
            inferred_mime: ctx
                .extension()
                .and_then(|ext| infer_mime(&ext))
                .map(str::to_string),
            ..Default::default()
        },
    }
}

fn segment_fallback(bytes: &[u8], ctx: &CanonicalizeContext) -> Fingerprint {
    let mut fp = raw_fallback(MediaKind::Video, bytes, ctx);
    fp.algorithm = "sha256+rolling_segments".to_string();
    fp.canonicalization = "raw_bytes_rolling_segments".to_string();
    fp.perceptual = Some(rolling_segment_hashes(bytes, SEGMENT_SIZE, MAX_SEGMENTS).join(","));
    fp
}

fn hash_gray_frames(frames: &[u8], size: u32, frame_len: usize) -> Vec<String> {
    if frame_len == 0 {
        return Vec::new();
    }
    frames
        .chunks_exact(frame_len)
        .filter_map(|frame| GrayImage::from_raw(size, size, frame.to_vec()))
        .map(|gray| image_phash(&DynamicImage::ImageLuma8(gray)))
        .collect()
}

/// 外部工具只认文件路径：没有路径时把字节落到临时文件
///
/// 返回的 `NamedTempFile` 必须在探测结束前保持存活。
pub(crate) fn resolve_path(
    bytes: &[u8],
    ctx: &CanonicalizeContext,
) -> Result<(PathBuf, Option<tempfile::NamedTempFile>)> {
    if let Some(path) = &ctx.path {
        return Ok((path.clone(), None));
    }

    let suffix = ctx.extension().map(|e| format!(".{}", e)).unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("yuanjing-")
        .suffix(&suffix)
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok((file.path().to_path_buf(), Some(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probe::{AudioStreamInfo, VideoStreamInfo};
    use async_trait::async_trait;
    use img_hash::image::{ImageBuffer, ImageOutputFormat, Rgb};

    fn png_bytes(seed: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(16, 12, |x, y| {
            Rgb([(x as u8).wrapping_mul(seed), (y as u8).wrapping_mul(7), seed])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out
    }

    /// 固定输出的探针替身
    struct CannedProbe {
        waveform_ok: bool,
    }

    #[async_trait]
    impl MediaProbe for CannedProbe {
        async fn probe_audio(&self, _path: &Path) -> std::result::Result<AudioStreamInfo, ProbeError> {
            Ok(AudioStreamInfo {
                duration: Some(3.0),
                sample_rate: Some(44_100),
                channels: Some(2),
            })
        }

        async fn acoustic_fingerprint(&self, _path: &Path) -> std::result::Result<String, ProbeError> {
            Err(ProbeError::Unavailable("fpcalc not installed".into()))
        }

        async fn normalized_waveform(
            &self,
            _path: &Path,
            _rate: u32,
        ) -> std::result::Result<Vec<u8>, ProbeError> {
            if self.waveform_ok {
                Ok(vec![1, 0, 2, 0, 3, 0])
            } else {
                Err(ProbeError::Timeout(60))
            }
        }

        async fn probe_video(&self, _path: &Path) -> std::result::Result<VideoStreamInfo, ProbeError> {
            Ok(VideoStreamInfo {
                declared_frame_rate: "25/1".into(),
                average_frame_rate: "25/1".into(),
                frame_count: Some(50),
                duration: Some(2.0),
                width: Some(64),
                height: Some(48),
            })
        }

        async fn sample_frames(
            &self,
            _path: &Path,
            sampling: FrameSampling,
        ) -> std::result::Result<Vec<u8>, ProbeError> {
            let frame = (sampling.size * sampling.size) as usize;
            Ok((0..frame * 2).map(|i| (i % 251) as u8).collect())
        }
    }

    #[test]
    fn image_fingerprint_is_deterministic_and_content_sensitive() {
        let ctx = CanonicalizeContext::default();
        let a = canonicalize_image(&png_bytes(3), &ctx);
        let b = canonicalize_image(&png_bytes(3), &ctx);
        let c = canonicalize_image(&png_bytes(5), &ctx);

        assert_eq!(a, b);
        assert_ne!(a.primary_hash, c.primary_hash);
        assert_eq!(a.algorithm, "sha256+gradient_phash");
        assert!(a.perceptual.is_some());
        assert_eq!(a.metadata.width, Some(16));
        assert_eq!(a.metadata.height, Some(12));
    }

    #[test]
    fn undecodable_image_falls_back_and_says_so() {
        let ctx = CanonicalizeContext {
            path: None,
            file_name: Some("IMG_0001.HEIC".into()),
        };
        let fp = canonicalize_image(b"definitely not an image", &ctx);

        assert_eq!(fp.algorithm, "sha256");
        assert_eq!(fp.canonicalization, "none");
        assert!(!fp.perceptual_robust);
        assert!(fp.perceptual.is_none());
        assert_eq!(fp.metadata.inferred_mime.as_deref(), Some("image/heic"));
        assert_eq!(fp.primary_hash, sha256_hex(b"definitely not an image"));
    }

    #[tokio::test]
    async fn empty_input_is_invalid_asset() {
        let canon = ContentCanonicalizer::new(None);
        let err = canon
            .canonicalize(MediaKind::Image, &[], &CanonicalizeContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidAsset(_)));
    }

    #[tokio::test]
    async fn audio_without_chromaprint_is_still_a_valid_fingerprint() {
        let canon = ContentCanonicalizer::new(Some(Arc::new(CannedProbe { waveform_ok: true })));
        let fp = canon
            .canonicalize(MediaKind::Audio, b"RIFF....", &CanonicalizeContext::default())
            .await
            .unwrap();

        assert_eq!(fp.algorithm, "sha256_normalized");
        assert_eq!(fp.canonicalization, AUDIO_CANONICALIZATION);
        assert_eq!(fp.primary_hash, sha256_hex(&[1, 0, 2, 0, 3, 0]));
        assert!(fp.perceptual.is_none());
        assert_eq!(fp.metadata.sample_rate, Some(44_100));
        assert_eq!(fp.metadata.channels, Some(2));

        let record = AudioFingerprintRecord::from_fingerprint(&fp);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("chromaprint").unwrap().is_null());
        assert_eq!(json["sha256_normalized"], fp.primary_hash.as_str());
    }

    /// fpcalc 第一次成功、之后超时
    struct FlakyChromaprint {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl MediaProbe for FlakyChromaprint {
        async fn probe_audio(&self, _path: &Path) -> std::result::Result<AudioStreamInfo, ProbeError> {
            Ok(AudioStreamInfo::default())
        }

        async fn acoustic_fingerprint(&self, _path: &Path) -> std::result::Result<String, ProbeError> {
            match self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                0 => Ok("AQADtJmUaEkSRZEG".into()),
                _ => Err(ProbeError::Timeout(60)),
            }
        }

        async fn normalized_waveform(
            &self,
            _path: &Path,
            _rate: u32,
        ) -> std::result::Result<Vec<u8>, ProbeError> {
            Ok(vec![9, 0, 8, 0])
        }

        async fn probe_video(&self, _path: &Path) -> std::result::Result<VideoStreamInfo, ProbeError> {
            Err(ProbeError::NoStream("video"))
        }

        async fn sample_frames(
            &self,
            _path: &Path,
            _sampling: FrameSampling,
        ) -> std::result::Result<Vec<u8>, ProbeError> {
            Err(ProbeError::NoStream("video"))
        }
    }

    #[tokio::test]
    async fn audio_store_key_survives_chromaprint_flakes() {
        let canon = ContentCanonicalizer::new(Some(Arc::new(FlakyChromaprint {
            calls: Default::default(),
        })));
        let ctx = CanonicalizeContext::default();

        let with_chroma = canon.canonicalize(MediaKind::Audio, b"RIFF", &ctx).await.unwrap();
        let without_chroma = canon.canonicalize(MediaKind::Audio, b"RIFF", &ctx).await.unwrap();

        assert_eq!(with_chroma.algorithm, "chromaprint+sha256_normalized");
        assert_eq!(without_chroma.algorithm, "sha256_normalized");
        assert_eq!(with_chroma.primary_hash, without_chroma.primary_hash);
        assert_eq!(with_chroma.store_key(), without_chroma.store_key());
    }

    #[tokio::test]
    async fn audio_waveform_failure_falls_back_to_raw_hash() {
        let canon = ContentCanonicalizer::new(Some(Arc::new(CannedProbe { waveform_ok: false })));
        let fp = canon
            .canonicalize(MediaKind::Audio, b"ID3 raw", &CanonicalizeContext::default())
            .await
            .unwrap();
        assert_eq!(fp.canonicalization, "none");
        assert_eq!(fp.primary_hash, sha256_hex(b"ID3 raw"));
        assert_eq!(fp.metadata.duration, Some(3.0));
    }

    #[tokio::test]
    async fn video_hashes_sampled_frames() {
        let canon = ContentCanonicalizer::new(Some(Arc::new(CannedProbe { waveform_ok: true })));
        let fp = canon
            .canonicalize(MediaKind::Video, b"\x00\x00\x00\x18ftyp", &CanonicalizeContext::default())
            .await
            .unwrap();

        assert_eq!(fp.canonicalization, "gray_32x32_1fps_frames");
        assert_eq!(fp.perceptual.as_deref().map(|p| p.split(',').count()), Some(2));
        assert_eq!(fp.metadata.width, Some(64));
        assert!(fp.perceptual_robust);
    }

    #[tokio::test]
    async fn video_stream_info_comes_back_with_the_fingerprint() {
        let canon = ContentCanonicalizer::new(Some(Arc::new(CannedProbe { waveform_ok: true })));
        let ctx = CanonicalizeContext::default();

        let video = canon
            .canonicalize_detailed(MediaKind::Video, b"\x00\x00\x00\x18ftyp", &ctx)
            .await
            .unwrap();
        let stream = video.video_stream.expect("video is probed").unwrap();
        assert_eq!(stream.declared_frame_rate, "25/1");
        assert_eq!(stream.frame_count, Some(50));

        let audio = canon
            .canonicalize_detailed(MediaKind::Audio, b"RIFF", &ctx)
            .await
            .unwrap();
        assert!(audio.video_stream.is_none());
    }

    #[tokio::test]
    async fn video_without_tools_uses_rolling_segments() {
        let canon = ContentCanonicalizer::new(None);
        let bytes = vec![7u8; SEGMENT_SIZE + 10];
        let fp = canon
            .canonicalize(MediaKind::Video, &bytes, &CanonicalizeContext::default())
            .await
            .unwrap();

        assert_eq!(fp.canonicalization, "raw_bytes_rolling_segments");
        let segments = fp.perceptual.unwrap();
        assert!(segments.starts_with("seg_0:"));
        assert!(segments.contains(",seg_1:"));
    }

    #[test]
    fn rolling_segments_are_capped() {
        let bytes = vec![0u8; 25];
        let segments = rolling_segment_hashes(&bytes, 2, MAX_SEGMENTS);
        assert_eq!(segments.len(), MAX_SEGMENTS);
        assert_eq!(segments[9].len(), "seg_9:".len() + 16);
    }
}
