//! # wasmlab WASM実行環境
//!
//! wasmtimeを直接使用して、WASMモジュールのインスタンス化と
//! エクスポート契約の検証を行う。
//!
//! ## 処理の流れ
//! 1. `RawExportBag::instantiate`: バイナリをコンパイル・インスタンス化し、生のエクスポートを得る
//! 2. `validate`: 契約に照らして全違反を収集する
//! 3. `ValidatedHandle`: 契約で定義された範囲のみを公開する型付きハンドル
//!
//! ## インポートの扱い
//! wasm-bindgenが生成するグルー側のインポートはホストに存在しないため、
//! 呼び出されるとトラップするスタブとして定義する。
//! エクスポート面の検査と、インポートに依存しない関数の呼び出しは可能。

pub mod bag;
pub mod handle;
pub mod validator;

pub use bag::{ExportSurface, ObservedExport, RawExportBag};
pub use handle::ValidatedHandle;
pub use validator::{check_surface, validate, ValidationFailure, Violation};

pub use wasmtime::{Engine, Val};

/// WASM実行環境のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WasmError {
    /// WASMモジュールのコンパイルエラー
    #[error("WASMコンパイルエラー: {0}")]
    CompileError(String),
    /// WASMモジュールのインスタンス化エラー
    #[error("WASMインスタンス化エラー: {0}")]
    InstantiateError(String),
    /// WASM関数の実行エラー（トラップを含む）
    #[error("WASM実行エラー: {0}")]
    ExecutionError(String),
    /// ハンドルが公開していないシンボル
    #[error("シンボル {0} はハンドルに公開されていません")]
    UnknownExport(String),
    /// シンボルの種別が要求と異なる
    #[error("シンボル {symbol} は {expected} ではありません")]
    KindMismatch { symbol: String, expected: String },
    /// メモリ範囲外アクセス
    #[error("メモリ範囲外アクセス: offset={offset}, len={len}, size={size}")]
    MemoryOutOfBounds { offset: usize, len: usize, size: usize },
}
