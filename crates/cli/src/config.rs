//! # CLI設定
//!
//! 環境変数からの設定読み込み。コマンドライン引数が指定された項目は引数を優先する。
//!
//! | 環境変数 | 内容 |
//! |---|---|
//! | `WASMLAB_MODULES_ROOT` | モジュールルート名（デフォルト: `pkg`） |
//! | `WASMLAB_CONTRACTS` | 追加のエクスポート契約JSONファイル |
//! | `WASMLAB_PRELOAD_HELPERS` | プリロードヘルパー名（カンマ区切り、デフォルト: `__vitePreload`） |

use std::path::{Path, PathBuf};

use anyhow::Context;
use wasmlab_rewrite::DEFAULT_PRELOAD_HELPER;
use wasmlab_types::layout::DEFAULT_MODULES_ROOT;
use wasmlab_types::{ContractRegistry, LayoutError, ModuleLayout};

pub const ENV_MODULES_ROOT: &str = "WASMLAB_MODULES_ROOT";
pub const ENV_CONTRACTS: &str = "WASMLAB_CONTRACTS";
pub const ENV_PRELOAD_HELPERS: &str = "WASMLAB_PRELOAD_HELPERS";

/// 実効設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub modules_root: String,
    pub contracts: Option<PathBuf>,
    pub preload_helpers: Vec<String>,
}

impl Config {
    /// プロセスの環境変数から読み込む。
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から読み込む。空文字列は未設定として扱う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let modules_root =
            get(ENV_MODULES_ROOT).unwrap_or_else(|| DEFAULT_MODULES_ROOT.to_string());
        let contracts = get(ENV_CONTRACTS).map(PathBuf::from);
        let preload_helpers = get(ENV_PRELOAD_HELPERS)
            .map(|v| split_list(&v))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_PRELOAD_HELPER.to_string()]);

        Self {
            modules_root,
            contracts,
            preload_helpers,
        }
    }

    /// コマンドライン引数で上書きする。
    pub fn with_overrides(
        mut self,
        modules_root: Option<String>,
        contracts: Option<PathBuf>,
        preload_helpers: Vec<String>,
    ) -> Self {
        if let Some(root) = modules_root {
            self.modules_root = root;
        }
        if contracts.is_some() {
            self.contracts = contracts;
        }
        if !preload_helpers.is_empty() {
            self.preload_helpers = preload_helpers;
        }
        self
    }

    /// モジュールルートから配置規則を作る。空のルートや`..`を含むルートはエラー。
    pub fn layout(&self) -> Result<ModuleLayout, LayoutError> {
        ModuleLayout::new(&self.modules_root)
    }

    /// 組み込み契約に、設定された契約ファイルの内容を追加したレジストリ。
    pub fn load_registry(&self) -> anyhow::Result<ContractRegistry> {
        let mut registry = ContractRegistry::builtin();
        if let Some(path) = &self.contracts {
            let added = extend_from_file(&mut registry, path)?;
            tracing::info!(path = %path.display(), added, "契約ファイルを読み込みました");
        }
        Ok(registry)
    }
}

fn extend_from_file(registry: &mut ContractRegistry, path: &Path) -> anyhow::Result<usize> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("契約ファイルの読み込みに失敗: {}", path.display()))?;
    registry
        .extend_from_json(&json)
        .with_context(|| format!("契約ファイルが不正です: {}", path.display()))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
