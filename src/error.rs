//! 错误类型
//!
//! 只有两类错误会让一次核验整体失败：主资产不可读 (`InvalidAsset`)，
//! 以及评分器配置错误。其余外部协作方的失败都在各自的信号里降级处理。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// 主资产为空、损坏或无法读取
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    /// 外部工具 (ffprobe / ffmpeg / fpcalc) 调用失败
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 所有因子的满分之和为 0
    #[error("Scorer misconfigured: {0}")]
    ScorerMisconfigured(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl VerifyError {
    /// 供 worker 进程写入 stderr 的错误标签
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::InvalidAsset(_) => "invalid_asset",
            VerifyError::Probe(_) => "probe_error",
            VerifyError::Io(_) => "io_error",
            VerifyError::Json(_) => "json_error",
            VerifyError::ScorerMisconfigured(_) => "scorer_misconfigured",
            VerifyError::Signing(_) => "signing_error",
            VerifyError::Config(_) => "config_error",
        }
    }
}

/// 外部媒体工具错误
#[derive(Debug, Error)]
pub enum ProbeError {
    /// 工具未安装或无法启动
    #[error("Tool unavailable: {0}")]
    Unavailable(String),

    #[error("Tool timed out after {0}s")]
    Timeout(u64),

    /// 工具退出码非 0
    #[error("Tool failed: {0}")]
    Failed(String),

    #[error("Unparseable tool output: {0}")]
    Parse(String),

    /// 文件里没有对应类型的流 (例如视频里没有视频流)
    #[error("No {0} stream found")]
    NoStream(&'static str),
}

pub type Result<T> = std::result::Result<T, VerifyError>;
