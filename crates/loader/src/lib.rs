//! # wasmlab モジュールローダー
//!
//! ページ（呼び出し元）からの要求に応じてWASMモジュールを取得し、
//! エクスポート契約で検証した共有ハンドルを返す。
//!
//! - `ModuleLoader`: シングルフライトのキャッシュ付きローダー
//! - `source`: WASMバイナリの取得元（ファイル、HTTP）
//! - `AcquireError`: ロード失敗・検証失敗の分類

pub mod error;
pub mod loader;
pub mod source;

pub use error::{AcquireError, LoadError};
pub use loader::ModuleLoader;
pub use source::{FileSource, HttpSource, ModuleBinary, ModuleSource};
