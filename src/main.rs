use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use yuanjing_verify::evidence::MetadataFields;
use yuanjing_verify::fingerprint::AudioFingerprintRecord;
use yuanjing_verify::{
    evaluation, logging, CanonicalizeContext, Config, ContentCanonicalizer, MediaKind,
    MemoryFingerprintStore, Tier, VerificationRequest, Verifier, VerifyError,
};
use yuanjing_verify::probe::FfmpegProbe;

/// 原镜 核验 worker
///
/// stdout 只输出一个 JSON 对象；失败时 stderr 输出 `{"error", "message"}` 并以非 0 退出。
#[derive(Parser)]
#[command(name = "yuanjing-verify", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 计算规范化内容指纹
    Canonicalize {
        #[arg(long, value_parser = clap::value_parser!(MediaKind))]
        kind: MediaKind,
        path: PathBuf,
    },
    /// 完整核验：指纹 + 检索 + 取证信号 + 评分
    Verify {
        #[arg(long, value_parser = clap::value_parser!(MediaKind))]
        kind: MediaKind,
        path: PathBuf,
        /// EXIF 字段 JSON 文件 ({"Make": "Apple", ...})
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// 外部 AI 检测器分数 (0-100)
        #[arg(long)]
        ai_score: Option<f64>,
        /// 反向图片检索用的公开 URL
        #[arg(long)]
        asset_ref: Option<String>,
        #[arg(long = "scene-label")]
        scene_labels: Vec<String>,
        #[arg(long, value_parser = clap::value_parser!(Tier))]
        tier: Option<Tier>,
    },
    /// 统计目录下 real_*.json / fake_*.json 的检测效果
    Evaluate { dir: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "worker 失败");
            eprintln!(
                "{}",
                serde_json::json!({ "error": e.kind(), "message": e.to_string() })
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<serde_json::Value, VerifyError> {
    let config = Config::from_env()?;

    match command {
        Command::Canonicalize { kind, path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| VerifyError::InvalidAsset(format!("{}: {}", path.display(), e)))?;
            let canonicalizer =
                ContentCanonicalizer::new(Some(Arc::new(FfmpegProbe::new(config.probe_timeout))));
            let fp = canonicalizer
                .canonicalize(kind, &bytes, &CanonicalizeContext::from_path(&path))
                .await?;

            // 音频 worker 的输出字段是固定契约
            if kind == MediaKind::Audio {
                Ok(serde_json::to_value(AudioFingerprintRecord::from_fingerprint(&fp))?)
            } else {
                Ok(serde_json::to_value(&fp)?)
            }
        }
        Command::Verify {
            kind,
            path,
            metadata,
            ai_score,
            asset_ref,
            scene_labels,
            tier,
        } => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| VerifyError::InvalidAsset(format!("{}: {}", path.display(), e)))?;
            let metadata: MetadataFields = match metadata {
                Some(file) => serde_json::from_slice(&tokio::fs::read(&file).await?)?,
                None => MetadataFields::new(),
            };

            let store = Arc::new(MemoryFingerprintStore::new());
            let verifier = Verifier::from_config(&config, store)?;

            let mut request = VerificationRequest::new(kind, bytes);
            request.context = CanonicalizeContext::from_path(&path);
            request.metadata = metadata;
            request.ai_score = ai_score;
            request.asset_ref = asset_ref;
            request.scene_labels = scene_labels;
            request.tier = tier;

            let report = verifier.verify(request).await?;
            Ok(serde_json::to_value(&report)?)
        }
        Command::Evaluate { dir } => {
            // 目录扫描是同步文件 IO，不占用异步 worker 线程
            let report = tokio::task::spawn_blocking(move || evaluation::evaluate_dir(&dir))
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
            Ok(report.summary())
        }
    }
}
