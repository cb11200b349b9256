//! # モジュールソース
//!
//! WASMバイナリの取得を抽象化する。
//! 取得先のパスはモジュール名から静的に決まる（`ModuleLayout::binary_path`）。
//! 呼び出し側がパスを組み立てることはない。
//!
//! ## ソース実装
//! - `FileSource`: デプロイツリー（ローカルディレクトリ）から読み込む
//! - `HttpSource`: HTTP経由で取得する

pub mod file;
pub mod http;

pub use file::FileSource;
pub use http::HttpSource;

use std::future::Future;
use std::pin::Pin;

use wasmlab_types::ModuleIdentity;

/// WASMバイナリの取得結果。
pub struct ModuleBinary {
    /// WASMバイナリデータ
    pub bytes: Vec<u8>,
    /// 取得元URI（ログ・診断用）
    pub source: String,
}

/// WASMバイナリを取得するトレイト。
///
/// モジュール名に対応するバイナリの取得方法を抽象化する。
/// `ModuleLoader`のみがこのトレイトを呼び出す。
pub trait ModuleSource: Send + Sync {
    /// モジュール名に対応するWASMバイナリを取得する。
    fn fetch<'a>(
        &'a self,
        identity: &'a ModuleIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, String>> + Send + 'a>>;
}
