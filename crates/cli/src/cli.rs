//! # コマンドライン定義

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// wasmlab - WASMモジュールの配置・検証ツール
#[derive(Debug, Parser)]
#[command(name = "wasmlab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 共通オプション。未指定の項目は環境変数・デフォルト値を使う。
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// 追加のエクスポート契約JSONファイル
    #[arg(long)]
    pub contracts: Option<PathBuf>,

    /// モジュールルート名（デプロイパス `/<root>/<name>/<asset>` の `<root>`）
    #[arg(long)]
    pub modules_root: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// バンドラ出力のインポートパスを書き換え、モジュールを配置する
    Build {
        /// モジュールごとのビルド出力を含むディレクトリ
        #[arg(long)]
        pkg_dir: PathBuf,

        /// バンドラの出力ディレクトリ
        #[arg(long)]
        out_dir: PathBuf,

        /// プリロードヘルパー名（複数指定可）
        #[arg(long = "preload-helper")]
        preload_helpers: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// モジュールをロード・検証し、公開エクスポートをJSONで表示する
    Inspect {
        /// モジュール名（例: wasm_hello）
        identity: String,

        /// デプロイツリーのルートディレクトリ
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        dir: Option<PathBuf>,

        /// デプロイ先のベースURL
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// 実効のエクスポート契約をJSONで表示する
    Contracts {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_arguments() {
        let cli = Cli::try_parse_from([
            "wasmlab",
            "build",
            "--pkg-dir",
            "pkg",
            "--out-dir",
            "dist",
            "--preload-helper",
            "a",
            "--preload-helper",
            "b",
            "--modules-root",
            "wasm",
        ])
        .unwrap();
        match cli.command {
            Commands::Build {
                pkg_dir,
                out_dir,
                preload_helpers,
                common,
            } => {
                assert_eq!(pkg_dir, PathBuf::from("pkg"));
                assert_eq!(out_dir, PathBuf::from("dist"));
                assert_eq!(preload_helpers, vec!["a", "b"]);
                assert_eq!(common.modules_root.as_deref(), Some("wasm"));
                assert!(common.contracts.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_inspect_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["wasmlab", "inspect", "wasm_hello"]).is_err());
        assert!(Cli::try_parse_from([
            "wasmlab",
            "inspect",
            "wasm_hello",
            "--dir",
            "dist",
            "--url",
            "http://localhost:8080"
        ])
        .is_err());
        let url_only = ["wasmlab", "inspect", "wasm_hello", "--url", "http://x"];
        assert!(Cli::try_parse_from(url_only).is_ok());
    }
}
