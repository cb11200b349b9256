//! # wasmlab インポートパスリライタ
//!
//! バンドラ出力に含まれるWASMモジュールへの参照を、デプロイ後も解決できる
//! 正規の絶対パスへ書き換え、モジュールディレクトリを出力ツリーに配置する。
//!
//! - `rules`: 書き換え規則（相対インポート、プリロードラッパー、グルーのアセットURL）
//! - `pipeline`: 書き換え・配置・検査を1パスで行うビルドパイプライン
//! - `glue`: グルーコードの契約エクスポート検査
//! - `manifest`: 配置したアセットの記録

pub mod error;
pub mod glue;
pub mod manifest;
pub mod pipeline;
pub mod rules;
mod scan;

pub use error::BuildIntegrityError;
pub use manifest::{AssetRecord, BuildManifest, ModuleRecord, MANIFEST_FILE};
pub use pipeline::{BuildPipeline, BuildReport};
pub use rules::{find_unrewritten, Rewrite, RewriteRule, RuleSet, DEFAULT_PRELOAD_HELPER};
