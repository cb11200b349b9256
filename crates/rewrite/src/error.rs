//! # ビルド整合性エラー
//!
//! リライタはいずれかの検査に失敗した時点でビルドを中断する。
//! 壊れたデプロイツリーを黙って出力することはない。

use std::path::{Path, PathBuf};

/// ビルドを中断させる整合性エラー。
#[derive(Debug, thiserror::Error)]
pub enum BuildIntegrityError {
    /// グルーコードに契約で宣言されたエクスポートが見つからない
    #[error("モジュール {module} のグルーコードに契約エクスポートがありません: {}", .missing.join(", "))]
    MissingExports { module: String, missing: Vec<String> },

    /// 書き換え後も相対パス・ラッパー付きの参照が残っている
    #[error("{} に未書き換えのモジュール参照が残っています: {reference}", .file.display())]
    UnrewrittenReference { file: PathBuf, reference: String },

    /// グルーコード内のアセットURLをモジュール配下に解決できない
    #[error("{} のアセットURLを解決できません: {reference}", .file.display())]
    UnresolvedAsset { file: PathBuf, reference: String },

    /// 出力ファイルが空
    #[error("出力ファイルが空です: {}", .0.display())]
    EmptyFile(PathBuf),

    /// WASMバイナリがヘッダ長に満たない
    #[error("WASMバイナリが小さすぎます: {} ({size} バイト)", .path.display())]
    TooSmall { path: PathBuf, size: usize },

    /// WASMマジックナンバーが不正
    #[error("WASMマジックナンバーが不正です: {}", .0.display())]
    BadMagic(PathBuf),

    /// 書き込み後の読み戻し内容が一致しない
    #[error("書き込み内容の検証に失敗しました: {}", .0.display())]
    WriteMismatch(PathBuf),

    /// モジュールディレクトリに必須ファイルがない
    #[error("モジュール {module} に {file} がありません")]
    MissingAsset { module: String, file: String },

    /// プリロードヘルパー名がJavaScriptの識別子として不正
    #[error("不正なプリロードヘルパー名: {0:?}")]
    InvalidHelper(String),

    /// モジュールディレクトリ名が識別子として不正
    #[error("不正なモジュールディレクトリです: {}", .0.display())]
    InvalidModuleDir(PathBuf),

    /// ファイルシステム操作の失敗
    #[error("I/Oエラー ({}): {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl BuildIntegrityError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        BuildIntegrityError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}
