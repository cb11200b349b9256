//! # ローダー エラー型
//!
//! `acquire`の失敗を「ロード失敗」と「検証失敗」に分類する。
//! 同一の試行を待っていた全ての呼び出し元に同じエラーを配るため、`Clone`を実装する。

use wasmlab_types::ModuleIdentity;
use wasmlab_wasm_host::{ValidationFailure, WasmError};

/// 取得・インスタンス化の失敗原因。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// バイナリの取得に失敗（ファイル欠落、HTTPエラー等）
    #[error("バイナリ取得に失敗: {0}")]
    Fetch(String),
    /// コンパイル・インスタンス化に失敗
    #[error(transparent)]
    Wasm(#[from] WasmError),
    /// ロード処理がパニックした
    #[error("ロード処理がパニックしました: {0}")]
    Panic(String),
    /// ロードタスクが結果を公開せずに終了した
    #[error("ロードタスクが結果を返さずに終了しました")]
    Abandoned,
}

/// `ModuleLoader::acquire`のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// 取得・インスタンス化の失敗。自動リトライは行わない。
    #[error("モジュール {module} のロードに失敗: {source}")]
    Load {
        module: ModuleIdentity,
        #[source]
        source: LoadError,
    },
    /// インスタンス化は成功したが、エクスポートが契約を満たさない
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
}

impl AcquireError {
    pub(crate) fn load(module: &ModuleIdentity, source: impl Into<LoadError>) -> Self {
        AcquireError::Load {
            module: module.clone(),
            source: source.into(),
        }
    }

    /// 失敗したモジュール名。
    pub fn module(&self) -> &ModuleIdentity {
        match self {
            AcquireError::Load { module, .. } => module,
            AcquireError::Validation(failure) => &failure.module,
        }
    }
}
