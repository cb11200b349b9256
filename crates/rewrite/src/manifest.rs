//! # ビルドマニフェスト
//!
//! 出力ツリーに配置した全モジュールアセットのサイズとSHA-256ダイジェストの記録。
//! `<out>/<root>/wasm-manifest.json` として書き出す。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// マニフェストのファイル名。
pub const MANIFEST_FILE: &str = "wasm-manifest.json";

/// SHA-256ハッシュを計算する。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 1つのアセットの記録。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// 正規絶対パス（`/<root>/<name>/<asset>`）
    pub path: String,
    pub size: usize,
    /// SHA-256（hex）
    pub sha256: String,
}

impl AssetRecord {
    pub fn new(path: String, data: &[u8]) -> Self {
        Self {
            path,
            size: data.len(),
            sha256: hex::encode(sha256(data)),
        }
    }
}

/// 1つのモジュールの記録。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,
    /// グルーコードの正規絶対パス
    pub glue: String,
    /// バイナリの正規絶対パス
    pub binary: String,
    /// 契約エクスポートの存在を検査したか（契約未登録なら`false`）
    pub contract_checked: bool,
    pub assets: Vec<AssetRecord>,
}

/// ビルドマニフェスト。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub modules_root: String,
    pub modules: Vec<ModuleRecord>,
}

impl BuildManifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn asset_count(&self) -> usize {
        self.modules.iter().map(|m| m.assets.len()).sum()
    }
}
