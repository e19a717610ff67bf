//! SerpAPI 风格的反向图片检索客户端
//!
//! 每个引擎单独请求、并发执行，各自受 `timeout` 约束；
//! 单个引擎失败只记在该引擎的结果里，所有引擎都失败才返回错误。
//! 整次检索的耗时约等于最慢的那个引擎，而不是所有引擎之和。

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;

use crate::evidence::SearchEngine;
use crate::search::{
    EngineResult, ExternalMatch, ExternalSearch, ExternalSearchResults, SearchError, SearchQuery,
};

const USER_AGENT: &str = concat!("yuanjing-verify/", env!("CARGO_PKG_VERSION"));

/// (引擎参数, 结果数组所在的字段)
fn engine_params(engine: SearchEngine) -> (&'static str, &'static str) {
    match engine {
        SearchEngine::GoogleLens => ("google_lens", "visual_matches"),
        SearchEngine::BingImages => ("bing_reverse_image", "related_content"),
        SearchEngine::YandexImages => ("yandex_images", "image_results"),
        SearchEngine::TinEye => ("tineye", "matches"),
    }
}

pub struct SerpApiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Other(e.to_string()))?;

        Ok(Self::with_client(http_client, base_url, api_key))
    }

    /// 复用调用方配置好的 HTTP 客户端 (代理、超时由调用方决定)
    pub fn with_client(http_client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn search_engine(&self, engine: SearchEngine, image_url: &str) -> Result<Vec<ExternalMatch>, String> {
        let (engine_param, results_key) = engine_params(engine);
        let url_param = if engine == SearchEngine::BingImages { "image_url" } else { "url" };

        let response = self
            .http_client
            .get(format!("{}/search.json", self.base_url))
            .query(&[
                ("engine", engine_param),
                (url_param, image_url),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
        }

        let value: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(extract_matches(&value, results_key))
    }
}

#[async_trait]
impl ExternalSearch for SerpApiClient {
    async fn search(&self, query: &SearchQuery) -> Result<ExternalSearchResults, SearchError> {
        let image_url = query.asset_ref.as_deref().ok_or(SearchError::NoAssetReference)?;

        let requests = query.engines.iter().map(|engine| async move {
            match self.search_engine(*engine, image_url).await {
                Ok(matches) => {
                    tracing::debug!(engine = engine.as_str(), matches = matches.len(), "引擎检索完成");
                    EngineResult {
                        engine: *engine,
                        matches,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(engine = engine.as_str(), error = %e, "引擎检索失败");
                    EngineResult {
                        engine: *engine,
                        matches: Vec::new(),
                        error: Some(e),
                    }
                }
            }
        });
        // join_all 保持输入顺序，结果和 query.engines 一一对应
        let results = join_all(requests).await;

        if !results.is_empty() && results.iter().all(|r| r.error.is_some()) {
            let errors: Vec<String> = results
                .iter()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.engine.as_str(), e)))
                .collect();
            return Err(SearchError::AllEnginesFailed(errors.join("; ")));
        }

        Ok(ExternalSearchResults::from_engines(results))
    }
}

/// 从引擎响应里抽出匹配项；没有 link 的条目丢弃
pub fn extract_matches(value: &serde_json::Value, results_key: &str) -> Vec<ExternalMatch> {
    value
        .get(results_key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let link = item.get("link").and_then(|l| l.as_str())?;
                    Some(ExternalMatch {
                        title: item.get("title").and_then(|t| t.as_str()).map(str::to_string),
                        link: link.to_string(),
                        source: item.get("source").and_then(|s| s.as_str()).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
