//! 端到端核验：所有外部协作方都用固定输出的替身

use async_trait::async_trait;
use chrono::NaiveDate;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use yuanjing_verify::error::ProbeError;
use yuanjing_verify::evidence::{Fingerprint, MetadataFields, Recommendation, VerificationRecord};
use yuanjing_verify::forensics::{GeoPoint, WeatherError, WeatherObservation, WeatherProvider};
use yuanjing_verify::probe::{AudioStreamInfo, FrameSampling, MediaProbe, VideoStreamInfo};
use yuanjing_verify::search::{
    ExternalOutcome, ExternalSearch, ExternalSearchResults, FingerprintStore, SearchError,
    SearchQuery, StoreError,
};
use yuanjing_verify::signer::VerdictSigner;
use yuanjing_verify::{MediaKind, MemoryFingerprintStore, Tier, VerificationRequest, Verifier};

// ==========================================
// 替身
// ==========================================

struct SunnyWeather;

#[async_trait]
impl WeatherProvider for SunnyWeather {
    async fn historical(
        &self,
        _location: GeoPoint,
        _date: NaiveDate,
    ) -> Result<WeatherObservation, WeatherError> {
        Ok(WeatherObservation {
            condition: "Sunny".into(),
            avgtemp_c: 24.0,
            precipitation_mm: 0.0,
        })
    }
}

struct NoMatches;

#[async_trait]
impl ExternalSearch for NoMatches {
    async fn search(&self, _query: &SearchQuery) -> Result<ExternalSearchResults, SearchError> {
        Ok(ExternalSearchResults::default())
    }
}

struct BrokenStore;

#[async_trait]
impl FingerprintStore for BrokenStore {
    async fn lookup(&self, _fp: &Fingerprint) -> Result<Option<VerificationRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn upsert(&self, _record: VerificationRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// 30fps 容器、24fps 平均帧率的视频；记录 probe_video 被调用的次数
#[derive(Default)]
struct SplicedVideoProbe {
    probe_video_calls: AtomicUsize,
}

#[async_trait]
impl MediaProbe for SplicedVideoProbe {
    async fn probe_audio(&self, _path: &Path) -> Result<AudioStreamInfo, ProbeError> {
        Err(ProbeError::NoStream("audio"))
    }

    async fn acoustic_fingerprint(&self, _path: &Path) -> Result<String, ProbeError> {
        Err(ProbeError::Unavailable("fpcalc".into()))
    }

    async fn normalized_waveform(&self, _path: &Path, _rate: u32) -> Result<Vec<u8>, ProbeError> {
        Err(ProbeError::Unavailable("ffmpeg".into()))
    }

    async fn probe_video(&self, _path: &Path) -> Result<VideoStreamInfo, ProbeError> {
        self.probe_video_calls.fetch_add(1, Ordering::SeqCst);
        Ok(VideoStreamInfo {
            declared_frame_rate: "30/1".into(),
            average_frame_rate: "24/1".into(),
            frame_count: Some(240),
            duration: Some(10.0),
            width: Some(1280),
            height: Some(720),
        })
    }

    async fn sample_frames(&self, _path: &Path, sampling: FrameSampling) -> Result<Vec<u8>, ProbeError> {
        let frame = (sampling.size * sampling.size) as usize;
        Ok((0..frame * 3).map(|i| (i % 199) as u8).collect())
    }
}

// ==========================================
// 样本
// ==========================================

fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 128]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out
}

fn camera_metadata() -> MetadataFields {
    [
        ("Make", "Apple"),
        ("Model", "iPhone 15 Pro"),
        ("DateTimeOriginal", "2024:06:01 09:30:00"),
        ("GPSLatitude", "48.8584"),
        ("GPSLongitude", "2.2945"),
        ("FNumber", "1.8"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// ==========================================
// 用例
// ==========================================

#[tokio::test]
async fn nothing_configured_still_yields_a_complete_low_coverage_verdict() {
    let verifier = Verifier::builder(Arc::new(MemoryFingerprintStore::new()))
        .build()
        .unwrap();

    let report = verifier
        .verify(VerificationRequest::new(MediaKind::Image, b"definitely not a png".to_vec()))
        .await
        .unwrap();

    assert_eq!(report.fingerprint.canonicalization, "none");
    assert!(!report.weather.enabled);
    assert_eq!(report.search.external, ExternalOutcome::Skipped);

    let result = &report.result;
    assert_eq!(result.factors.len(), 4);
    assert_eq!(result.max_score, 100.0);
    // 只有内部检索 (8) 和首次出现 (5) 可用
    assert_eq!(result.score, 13.0);
    assert_eq!(result.percentage, 13);
    assert_eq!(result.level.name, "very_low");
    assert!(result.coverage < 0.5);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("Minimal evidence coverage")));
    assert!(!result.recommendations.is_empty());
    assert!(report.signed.is_none());
}

#[tokio::test]
async fn second_submission_is_recognised_from_the_store() {
    let store = Arc::new(MemoryFingerprintStore::new());
    let verifier = Verifier::builder(store.clone()).build().unwrap();
    let bytes = png_bytes();

    let first = verifier
        .verify(VerificationRequest::new(MediaKind::Image, bytes.clone()))
        .await
        .unwrap();
    assert_eq!(first.search.decision.recommendation, Recommendation::AppearsOriginal);

    let second = verifier
        .verify(VerificationRequest::new(MediaKind::Image, bytes))
        .await
        .unwrap();
    assert_eq!(second.search.decision.recommendation, Recommendation::PreviouslyVerified);
    assert!(second.result.percentage > first.result.percentage);

    let record = store.lookup(&second.fingerprint).await.unwrap().unwrap();
    assert_eq!(record.verification_count, 2);
    assert_eq!(store.audit_entries().await.len(), 2);
}

#[tokio::test]
async fn corroborated_photo_scores_high_and_signs() {
    let signer_dir = tempfile::tempdir().unwrap();
    let signer = VerdictSigner::load_or_generate(&signer_dir.path().join("verdict.key")).unwrap();

    let verifier = Verifier::builder(Arc::new(MemoryFingerprintStore::new()))
        .weather_provider(Arc::new(SunnyWeather))
        .external_search(Arc::new(NoMatches))
        .tier(Tier::Pro)
        .signer(signer)
        .build()
        .unwrap();

    let mut request = VerificationRequest::new(MediaKind::Image, png_bytes());
    request.metadata = camera_metadata();
    request.scene_labels = vec!["beach".into(), "blue sky".into()];
    request.ai_score = Some(10.0);
    request.asset_ref = Some("https://cdn.example/photo.png".into());

    let report = verifier.verify(request).await.unwrap();

    assert!(report.weather.verified);
    assert!(matches!(report.search.external, ExternalOutcome::Completed(_)));
    assert_eq!(report.result.coverage, 1.0);
    assert!(report.result.percentage >= 80, "got {}", report.result.percentage);
    assert_eq!(report.result.level.name, "high");

    let signed = report.signed.expect("signer configured");
    assert!(VerdictSigner::verify(&signed).unwrap());
}

#[tokio::test]
async fn spliced_video_is_flagged_as_modified() {
    let probe = Arc::new(SplicedVideoProbe::default());
    let verifier = Verifier::builder(Arc::new(MemoryFingerprintStore::new()))
        .probe(probe.clone())
        .tier(Tier::Pro)
        .build()
        .unwrap();

    let mut request = VerificationRequest::new(MediaKind::Video, b"\x00\x00\x00\x18ftypmp42".to_vec());
    request.ai_score = Some(0.0);
    let report = verifier.verify(request).await.unwrap();

    let frame_rate = report.frame_rate.expect("video runs frame rate analysis");
    assert!(frame_rate.report().unwrap().mixed_frame_rate);
    assert_eq!(report.fingerprint.algorithm, "sha256_frames+gradient_phash");
    // 视频不做反向图片检索
    assert!(matches!(report.search.external, ExternalOutcome::NotApplicable { .. }));
    // 规范化和帧率检查共用一次探测
    assert_eq!(probe.probe_video_calls.load(Ordering::SeqCst), 1);

    assert!(report.result.is_modified);
    assert!(report
        .result
        .modification_details
        .iter()
        .any(|d| d.contains("spliced")));
}

#[tokio::test]
async fn store_outage_degrades_instead_of_failing() {
    let verifier = Verifier::builder(Arc::new(BrokenStore)).build().unwrap();

    let report = verifier
        .verify(VerificationRequest::new(MediaKind::Image, png_bytes()))
        .await
        .unwrap();

    assert!(report.search.internal_error.is_some());
    assert_eq!(report.result.level.name, "very_low");
    assert!(report
        .result
        .warnings
        .iter()
        .any(|w| w.contains("Fingerprint store unavailable")));
}

#[tokio::test]
async fn empty_asset_is_rejected() {
    let verifier = Verifier::builder(Arc::new(MemoryFingerprintStore::new()))
        .build()
        .unwrap();

    let err = verifier
        .verify(VerificationRequest::new(MediaKind::Image, Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_asset");
}
