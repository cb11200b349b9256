//! # ファイルシステム モジュールソース
//!
//! デプロイツリーからWASMバイナリを読み込む。

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use wasmlab_types::{ModuleIdentity, ModuleLayout};

use super::{ModuleBinary, ModuleSource};

/// デプロイツリーからWASMバイナリを読み込むソース。
///
/// ディレクトリ構成: `{dir}/{root}/{name}/{name}_bg.wasm`
pub struct FileSource {
    dir: PathBuf,
    layout: ModuleLayout,
}

impl FileSource {
    /// 新しいFileSourceを作成する。
    ///
    /// # 引数
    /// - `dir`: デプロイツリーのルートディレクトリ
    /// - `layout`: モジュール配置規則
    pub fn new(dir: impl Into<PathBuf>, layout: ModuleLayout) -> Self {
        Self {
            dir: dir.into(),
            layout,
        }
    }
}

impl ModuleSource for FileSource {
    fn fetch<'a>(
        &'a self,
        identity: &'a ModuleIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, String>> + Send + 'a>> {
        Box::pin(async move {
            let relative = self.layout.binary_path(identity);
            let path = self.dir.join(relative.trim_start_matches('/'));
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("WASMバイナリの読み込みに失敗 ({}): {e}", path.display()))?;
            if bytes.is_empty() {
                return Err(format!("WASMバイナリが空です ({})", path.display()));
            }
            Ok(ModuleBinary {
                source: format!("file://{}", path.display()),
                bytes,
            })
        })
    }
}
