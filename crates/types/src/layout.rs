//! # デプロイレイアウト
//!
//! バイナリモジュールの正規絶対パス `/<root>/<name>/<asset>` を定める。
//! ビルド時のリライタと実行時のモジュールソースの双方がこの規則を共有する。

use crate::ModuleIdentity;

/// モジュールルートのデフォルト名。
pub const DEFAULT_MODULES_ROOT: &str = "pkg";

/// レイアウト設定のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// モジュールルートが空、`.`/`..`を含む、または許可されない文字を含む
    #[error("不正なモジュールルート: {0:?}")]
    InvalidRoot(String),
}

/// デプロイツリー上のモジュール配置規則。
///
/// wasm-bindgenの出力命名に従い、グルーコードは `<name>.js`、
/// バイナリは `<name>_bg.wasm` とする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    root: String,
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self {
            root: DEFAULT_MODULES_ROOT.to_string(),
        }
    }
}

impl ModuleLayout {
    /// 新しいModuleLayoutを作成する。前後の`/`は取り除く。
    ///
    /// ルートが空になる場合は `//<name>/...` という別ホストを指すURLになるため拒否する。
    ///
    /// # 引数
    /// - `root`: モジュールルートのディレクトリ名（例: "pkg", "static/wasm"）
    pub fn new(root: impl AsRef<str>) -> Result<Self, LayoutError> {
        let raw = root.as_ref();
        let root = raw.trim_matches('/');
        let valid_segment = |seg: &str| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        };
        if root.is_empty() || !root.split('/').all(valid_segment) {
            return Err(LayoutError::InvalidRoot(raw.to_string()));
        }
        Ok(Self {
            root: root.to_string(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// 任意のアセットの正規絶対パス。
    pub fn asset_path(&self, identity: &ModuleIdentity, asset: &str) -> String {
        let asset = asset.trim_start_matches("./").trim_start_matches('/');
        format!("/{}/{identity}/{asset}", self.root)
    }

    /// グルーコード（`<name>.js`）の正規絶対パス。
    pub fn glue_path(&self, identity: &ModuleIdentity) -> String {
        self.asset_path(identity, &self.glue_file(identity))
    }

    /// バイナリ（`<name>_bg.wasm`）の正規絶対パス。
    pub fn binary_path(&self, identity: &ModuleIdentity) -> String {
        self.asset_path(identity, &self.binary_file(identity))
    }

    pub fn glue_file(&self, identity: &ModuleIdentity) -> String {
        format!("{identity}.js")
    }

    pub fn binary_file(&self, identity: &ModuleIdentity) -> String {
        format!("{identity}_bg.wasm")
    }

    /// 絶対パスを `(モジュール名, アセットパス)` に分解する。
    ///
    /// `/<root>/<name>/<asset>` 形式でない場合は`None`。
    pub fn parse_absolute<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix('/')?;
        self.split_module_path(rest)
    }

    /// `<root>/<name>/<asset>` 形式のパスを `(モジュール名, アセットパス)` に分解する。
    pub fn split_module_path<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let (name, asset) = rest.split_once('/')?;
        if name.is_empty() || asset.is_empty() || ModuleIdentity::new(name).is_err() {
            return None;
        }
        Some((name, asset))
    }
}
