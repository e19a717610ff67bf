//! 原镜 (Yuanjing) 媒体真实性核验核心
//!
//! 指纹 → 内部 / 外部检索 → 取证信号 → 置信度评分，外加签名裁决与 MMR 审计日志。
//! 外部依赖 (媒体工具、天气 API、反向图片检索、指纹库) 全部以 trait 注入。

pub mod clients;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod evidence;
pub mod fingerprint;
pub mod forensics;
pub mod logging;
pub mod mmr_store;
pub mod pipeline;
pub mod probe;
pub mod scoring;
pub mod search;
pub mod signer;

pub use config::Config;
pub use error::{ProbeError, Result, VerifyError};
pub use evidence::{ConfidenceResult, Fingerprint, ForensicSignal, MediaKind, Tier};
pub use fingerprint::{CanonicalizeContext, ContentCanonicalizer};
pub use mmr_store::MemoryFingerprintStore;
pub use pipeline::{VerificationReport, VerificationRequest, Verifier};
pub use scoring::{ConfidenceScoringEngine, VerificationBundle};
pub use search::HybridSearchOrchestrator;
pub use signer::VerdictSigner;
