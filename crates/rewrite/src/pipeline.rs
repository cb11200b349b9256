//! # ビルドパイプライン
//!
//! バンドラ出力ツリーに対して1回の決定的なパスを実行する。
//!
//! 1. 出力ツリーのJavaScriptチャンクを書き換える（モジュールルート配下を除く）
//! 2. 各モジュールディレクトリを `<out>/<root>/<name>/` へコピーし、
//!    グルーコードのアセットURLを書き換えて契約エクスポートを検査する
//! 3. 全チャンクを再走査し、未書き換えの参照が残っていないことを確認する
//! 4. `wasm-manifest.json` を書き出す
//!
//! どの検査に失敗してもその時点で`BuildIntegrityError`を返して中断する。
//! 同じ入力に対する再実行は同じ出力を生成する。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wasmlab_types::{ContractRegistry, ModuleIdentity, ModuleLayout};

use crate::error::BuildIntegrityError;
use crate::glue::missing_exports;
use crate::manifest::{sha256, AssetRecord, BuildManifest, ModuleRecord, MANIFEST_FILE};
use crate::rules::{find_unrewritten, RuleSet, DEFAULT_PRELOAD_HELPER};
use crate::scan::is_identifier;

/// WASMバイナリのヘッダ長（マジックナンバー + バージョン）。
const WASM_HEADER_LEN: usize = 8;
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// ビルド結果。
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// 書き換えたチャンク
    pub rewritten_chunks: Vec<PathBuf>,
    /// チャンク・グルーコードで置換した式の総数
    pub replacements: usize,
    pub manifest: BuildManifest,
}

/// 書き出し前の1ファイル分。
struct StagedAsset {
    dest: PathBuf,
    data: Vec<u8>,
    record: AssetRecord,
}

/// インポートパス書き換えパイプライン。
#[derive(Debug, Clone)]
pub struct BuildPipeline {
    layout: ModuleLayout,
    registry: Arc<ContractRegistry>,
    pkg_dir: PathBuf,
    out_dir: PathBuf,
    helpers: Vec<String>,
}

impl BuildPipeline {
    /// 新しいBuildPipelineを作成する。
    ///
    /// # 引数
    /// - `pkg_dir`: モジュールごとのビルド出力ディレクトリを含むディレクトリ
    /// - `out_dir`: バンドラの出力ツリー（ここが書き換え・配置の対象）
    /// - `registry`: グルーコード検査に使うエクスポート契約
    pub fn new(
        pkg_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        registry: Arc<ContractRegistry>,
    ) -> Self {
        Self {
            layout: ModuleLayout::default(),
            registry,
            pkg_dir: pkg_dir.into(),
            out_dir: out_dir.into(),
            helpers: vec![DEFAULT_PRELOAD_HELPER.to_string()],
        }
    }

    pub fn with_layout(mut self, layout: ModuleLayout) -> Self {
        self.layout = layout;
        self
    }

    /// プリロードヘルパー名を差し替える。各名前は識別子でなければならない。
    pub fn with_helpers(mut self, helpers: Vec<String>) -> Result<Self, BuildIntegrityError> {
        if let Some(bad) = helpers.iter().find(|name| !is_identifier(name)) {
            return Err(BuildIntegrityError::InvalidHelper(bad.clone()));
        }
        self.helpers = helpers;
        Ok(self)
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// モジュールの配置先（`<out>/<root>`）。
    pub fn modules_dir(&self) -> PathBuf {
        self.out_dir.join(self.layout.root())
    }

    /// パイプラインを実行する。
    pub fn run(&self) -> Result<BuildReport, BuildIntegrityError> {
        tracing::info!(
            pkg_dir = %self.pkg_dir.display(),
            out_dir = %self.out_dir.display(),
            root = self.layout.root(),
            "ビルドパイプラインを開始"
        );
        require_dir(&self.pkg_dir)?;
        require_dir(&self.out_dir)?;

        let modules_dir = self.modules_dir();
        let mut report = BuildReport::default();

        // チャンクの書き換え
        let rules = RuleSet::for_chunks(self.layout.clone(), &self.helpers);
        for path in script_files(&self.out_dir, Some(&modules_dir))? {
            let text = read_text(&path)?;
            let rewrite = rules.apply(&text);
            if rewrite.replacements == 0 {
                continue;
            }
            write_verified(&path, rewrite.text.as_bytes())?;
            tracing::debug!(
                file = %path.display(),
                replacements = rewrite.replacements,
                "チャンクを書き換えました"
            );
            report.replacements += rewrite.replacements;
            report.rewritten_chunks.push(path);
        }

        // モジュールの配置
        let mut manifest = BuildManifest {
            modules_root: self.layout.root().to_string(),
            modules: Vec::new(),
        };
        for dir in module_dirs(&self.pkg_dir)? {
            let (record, replacements) = self.deploy_module(&dir, &modules_dir)?;
            report.replacements += replacements;
            manifest.modules.push(record);
        }

        // 残存参照の検査
        for path in script_files(&self.out_dir, None)? {
            let text = read_text(&path)?;
            if let Some(reference) = find_unrewritten(&text, &self.layout, &self.helpers)
                .into_iter()
                .next()
            {
                tracing::warn!(file = %path.display(), %reference, "未書き換えの参照が残っています");
                return Err(BuildIntegrityError::UnrewrittenReference {
                    file: path,
                    reference,
                });
            }
        }

        let json = manifest.to_json().map_err(|e| BuildIntegrityError::Io {
            path: modules_dir.join(MANIFEST_FILE),
            message: e.to_string(),
        })?;
        write_verified(&modules_dir.join(MANIFEST_FILE), json.as_bytes())?;

        tracing::info!(
            chunks = report.rewritten_chunks.len(),
            modules = manifest.modules.len(),
            assets = manifest.asset_count(),
            replacements = report.replacements,
            "ビルドパイプラインが完了"
        );
        report.manifest = manifest;
        Ok(report)
    }

    /// モジュールディレクトリを検査し、全て通った場合のみ配置する。
    fn deploy_module(
        &self,
        dir: &Path,
        modules_dir: &Path,
    ) -> Result<(ModuleRecord, usize), BuildIntegrityError> {
        let identity = dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| ModuleIdentity::new(name).ok())
            .ok_or_else(|| BuildIntegrityError::InvalidModuleDir(dir.to_path_buf()))?;

        let glue_file = self.layout.glue_file(&identity);
        let binary_file = self.layout.binary_file(&identity);
        for required in [&glue_file, &binary_file] {
            if !dir.join(required).is_file() {
                return Err(BuildIntegrityError::MissingAsset {
                    module: identity.to_string(),
                    file: required.clone(),
                });
            }
        }

        let contract = self.registry.lookup(&identity);
        if contract.is_none() {
            tracing::warn!(module = %identity, "契約が未登録のためエクスポート検査をスキップします");
        }
        let glue_rules = RuleSet::for_glue(self.layout.clone(), identity.clone());
        let target = modules_dir.join(identity.as_str());

        let mut replacements = 0;
        let mut staged = Vec::new();
        for source in all_files(dir, None)? {
            let relative = source
                .strip_prefix(dir)
                .map_err(|_| BuildIntegrityError::InvalidModuleDir(source.clone()))?;
            let asset = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mut data = fs::read(&source).map_err(|e| BuildIntegrityError::io(&source, e))?;
            check_asset(&source, &data)?;

            if asset == glue_file {
                let text = String::from_utf8(data).map_err(|e| BuildIntegrityError::Io {
                    path: source.clone(),
                    message: e.to_string(),
                })?;
                let rewrite = glue_rules.apply(&text);
                if let Some(reference) = rewrite.unresolved.into_iter().next() {
                    return Err(BuildIntegrityError::UnresolvedAsset {
                        file: source,
                        reference,
                    });
                }
                if let Some(contract) = contract {
                    let missing = missing_exports(&rewrite.text, contract);
                    if !missing.is_empty() {
                        tracing::warn!(module = %identity, ?missing, "グルーコードに契約エクスポートがありません");
                        return Err(BuildIntegrityError::MissingExports {
                            module: identity.to_string(),
                            missing,
                        });
                    }
                }
                replacements += rewrite.replacements;
                data = rewrite.text.into_bytes();
            }

            staged.push(StagedAsset {
                dest: target.join(relative),
                record: AssetRecord::new(self.layout.asset_path(&identity, &asset), &data),
                data,
            });
        }

        let mut assets = Vec::with_capacity(staged.len());
        for item in staged {
            write_verified(&item.dest, &item.data)?;
            assets.push(item.record);
        }
        tracing::debug!(module = %identity, assets = assets.len(), "モジュールを配置しました");

        Ok((
            ModuleRecord {
                name: identity.to_string(),
                glue: self.layout.glue_path(&identity),
                binary: self.layout.binary_path(&identity),
                contract_checked: contract.is_some(),
                assets,
            },
            replacements,
        ))
    }
}

// ---------------------------------------------------------------------------
// ファイル検査・入出力
// ---------------------------------------------------------------------------

fn require_dir(path: &Path) -> Result<(), BuildIntegrityError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(BuildIntegrityError::Io {
            path: path.to_path_buf(),
            message: "ディレクトリが存在しません".to_string(),
        })
    }
}

/// コピー対象ファイルの健全性検査。
fn check_asset(path: &Path, data: &[u8]) -> Result<(), BuildIntegrityError> {
    if data.is_empty() {
        return Err(BuildIntegrityError::EmptyFile(path.to_path_buf()));
    }
    if path.extension().is_some_and(|ext| ext == "wasm") {
        if data.len() < WASM_HEADER_LEN {
            return Err(BuildIntegrityError::TooSmall {
                path: path.to_path_buf(),
                size: data.len(),
            });
        }
        if !data.starts_with(WASM_MAGIC) {
            return Err(BuildIntegrityError::BadMagic(path.to_path_buf()));
        }
    }
    Ok(())
}

/// 書き込み後に読み戻し、SHA-256が一致することを確認する。
fn write_verified(path: &Path, data: &[u8]) -> Result<(), BuildIntegrityError> {
    if data.is_empty() {
        return Err(BuildIntegrityError::EmptyFile(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildIntegrityError::io(parent, e))?;
    }
    fs::write(path, data).map_err(|e| BuildIntegrityError::io(path, e))?;
    let written = fs::read(path).map_err(|e| BuildIntegrityError::io(path, e))?;
    if sha256(&written) != sha256(data) {
        return Err(BuildIntegrityError::WriteMismatch(path.to_path_buf()));
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String, BuildIntegrityError> {
    fs::read_to_string(path).map_err(|e| BuildIntegrityError::io(path, e))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, BuildIntegrityError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| BuildIntegrityError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BuildIntegrityError::io(dir, e))?;
    entries.sort();
    Ok(entries)
}

/// `dir`配下の全ファイルを再帰的に列挙する（`exclude`配下は除く）。
fn all_files(dir: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>, BuildIntegrityError> {
    let mut files = Vec::new();
    for path in sorted_entries(dir)? {
        if exclude.is_some_and(|ex| path == ex) {
            continue;
        }
        if path.is_dir() {
            files.extend(all_files(&path, exclude)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn script_files(dir: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>, BuildIntegrityError> {
    Ok(all_files(dir, exclude)?
        .into_iter()
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "js" || ext == "mjs")
        })
        .collect())
}

fn module_dirs(pkg_dir: &Path) -> Result<Vec<PathBuf>, BuildIntegrityError> {
    Ok(sorted_entries(pkg_dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}
