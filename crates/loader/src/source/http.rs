//! # HTTP モジュールソース
//!
//! デプロイ先のサイトからHTTP経由でWASMバイナリを取得する。

use std::future::Future;
use std::pin::Pin;

use wasmlab_types::{ModuleIdentity, ModuleLayout};

use super::{ModuleBinary, ModuleSource};

/// HTTP経由でWASMバイナリを取得するソース。
///
/// URL形式: `{base_url}/{root}/{name}/{name}_bg.wasm`
pub struct HttpSource {
    client: reqwest::Client,
    /// サイトのベースURL（末尾の`/`は除去済み）
    base_url: String,
    layout: ModuleLayout,
}

impl HttpSource {
    /// 新しいHttpSourceを作成する。
    ///
    /// # 引数
    /// - `base_url`: サイトのベースURL（例: "http://localhost:5173"）
    /// - `layout`: モジュール配置規則
    pub fn new(base_url: impl AsRef<str>, layout: ModuleLayout) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, layout)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl AsRef<str>,
        layout: ModuleLayout,
    ) -> Self {
        Self {
            client,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            layout,
        }
    }
}

impl ModuleSource for HttpSource {
    fn fetch<'a>(
        &'a self,
        identity: &'a ModuleIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, String>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, self.layout.binary_path(identity));
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("WASM取得に失敗 ({url}): {e}"))?;
            let status = response.status();
            if !status.is_success() {
                return Err(format!(
                    "WASM取得でHTTPエラー: ステータス {} ({url})",
                    status.as_u16()
                ));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| format!("WASMレスポンスの読み取りに失敗 ({url}): {e}"))?;
            if body.is_empty() {
                return Err(format!("WASM取得: 空のレスポンス ({url})"));
            }
            Ok(ModuleBinary {
                source: url,
                bytes: body.to_vec(),
            })
        })
    }
}
