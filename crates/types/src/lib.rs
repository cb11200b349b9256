//! # wasmlab 共有型定義
//!
//! WASMモジュールの取得・検証パイプラインで共有されるデータ構造を提供する。
//!
//! ## 構成
//! - `ModuleIdentity`: 論理モジュール名（レジストリとローダーキャッシュのキー）
//! - `ExportContract`: モジュールが公開すべきシンボルの一覧
//! - `ContractRegistry`: モジュール名 → 契約 の静的マッピング
//! - `ModuleLayout`: デプロイ先の絶対パス規則（`/<root>/<name>/<asset>`）

pub mod layout;

pub use layout::{LayoutError, ModuleLayout};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// エラー型
// ---------------------------------------------------------------------------

/// 契約・レジストリ操作のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// モジュール名が不正（空、パス区切り、許可されない文字）
    #[error("不正なモジュール名: {0:?}")]
    InvalidIdentity(String),
    /// 既に契約が登録済み（既存契約の上書きは禁止）
    #[error("モジュール {0} の契約は既に登録されています")]
    Duplicate(String),
    /// 同一契約内でシンボルが重複
    #[error("モジュール {module} の契約でシンボル {symbol} が重複しています")]
    DuplicateSymbol { module: String, symbol: String },
    /// 契約JSONのパース失敗
    #[error("契約JSONのパースに失敗: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// ModuleIdentity
// ---------------------------------------------------------------------------

/// WASMモジュールの論理名（例: `wasm_hello`, `wasm_astar`）。
///
/// デプロイパスに埋め込まれるため、`[A-Za-z0-9_-]` のみ許可する。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleIdentity(String);

impl ModuleIdentity {
    /// 新しいModuleIdentityを作成する。
    ///
    /// # 引数
    /// - `name`: 論理モジュール名
    pub fn new(name: impl Into<String>) -> Result<Self, RegistryError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RegistryError::InvalidIdentity(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModuleIdentity {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModuleIdentity {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleIdentity> for String {
    fn from(value: ModuleIdentity) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// ExportContract
// ---------------------------------------------------------------------------

/// エクスポートに期待される種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportKind {
    /// 呼び出し可能な関数。`arity`はWASMレベルの引数の数（省略時は検査しない）
    Function {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arity: Option<usize>,
    },
    /// リニアメモリ
    Memory,
    /// 値（グローバル）
    Value,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKind::Function { arity: Some(n) } => write!(f, "function/{n}"),
            ExportKind::Function { arity: None } => f.write_str("function"),
            ExportKind::Memory => f.write_str("memory"),
            ExportKind::Value => f.write_str("value"),
        }
    }
}

/// 契約の1エントリ（シンボル名と期待される種別）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSpec {
    /// エクスポートシンボル名
    pub symbol: String,
    /// 期待される種別
    #[serde(flatten)]
    pub kind: ExportKind,
}

impl ExportSpec {
    pub fn function(symbol: impl Into<String>, arity: Option<usize>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: ExportKind::Function { arity },
        }
    }

    pub fn memory(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: ExportKind::Memory,
        }
    }

    pub fn value(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: ExportKind::Value,
        }
    }
}

/// モジュールが満たすべきエクスポート契約。
///
/// 定義順を保持する。作成後は変更不可。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportContract {
    identity: ModuleIdentity,
    exports: Vec<ExportSpec>,
}

impl ExportContract {
    /// 新しい契約を作成する。シンボルの重複はエラー。
    ///
    /// # 引数
    /// - `identity`: 対象モジュール
    /// - `exports`: 要求するエクスポート（定義順）
    pub fn new(identity: ModuleIdentity, exports: Vec<ExportSpec>) -> Result<Self, RegistryError> {
        for (i, spec) in exports.iter().enumerate() {
            if exports[..i].iter().any(|prev| prev.symbol == spec.symbol) {
                return Err(RegistryError::DuplicateSymbol {
                    module: identity.to_string(),
                    symbol: spec.symbol.clone(),
                });
            }
        }
        Ok(Self { identity, exports })
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn exports(&self) -> &[ExportSpec] {
        &self.exports
    }

    /// 契約に含まれるシンボル名を定義順に返す。
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|s| s.symbol.as_str())
    }

    /// シンボルの期待種別を返す。
    pub fn get(&self, symbol: &str) -> Option<ExportKind> {
        self.exports
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| s.kind)
    }
}

// ---------------------------------------------------------------------------
// ContractRegistry
// ---------------------------------------------------------------------------

/// 契約JSONドキュメントの形式: `{"<module>": [{"symbol": ..., "kind": ...}, ...]}`
pub type ContractDocument = BTreeMap<String, Vec<ExportSpec>>;

/// モジュール名 → エクスポート契約 の静的マッピング。
///
/// 追加は可能だが、登録済みの契約は変更できない。
/// 構築後は`Arc`で共有し、以降は読み取り専用として扱う。
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<ModuleIdentity, ExportContract>,
}

impl ContractRegistry {
    /// 空のレジストリを作成する。
    pub fn new() -> Self {
        Self::default()
    }

    /// 組み込み契約を登録済みのレジストリを作成する。
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for contract in builtin_contracts() {
            // 組み込み契約同士は重複しない
            let _ = registry.register(contract);
        }
        registry
    }

    /// JSONドキュメントからレジストリを作成する。
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.extend_from_json(json)?;
        Ok(registry)
    }

    /// JSONドキュメントの契約を追加登録する。登録した件数を返す。
    ///
    /// 既存の契約と同じモジュール名が含まれる場合はエラーとなり、何も登録しない。
    pub fn extend_from_json(&mut self, json: &str) -> Result<usize, RegistryError> {
        let document: ContractDocument =
            serde_json::from_str(json).map_err(|e| RegistryError::Parse(e.to_string()))?;

        let mut parsed = Vec::with_capacity(document.len());
        for (name, exports) in document {
            let identity = ModuleIdentity::new(name)?;
            if self.contracts.contains_key(&identity) {
                return Err(RegistryError::Duplicate(identity.to_string()));
            }
            parsed.push(ExportContract::new(identity, exports)?);
        }

        let count = parsed.len();
        for contract in parsed {
            self.register(contract)?;
        }
        Ok(count)
    }

    /// 新しい契約を登録する。既に同じモジュールの契約がある場合はエラー。
    pub fn register(&mut self, contract: ExportContract) -> Result<(), RegistryError> {
        if self.contracts.contains_key(contract.identity()) {
            return Err(RegistryError::Duplicate(contract.identity().to_string()));
        }
        self.contracts.insert(contract.identity().clone(), contract);
        Ok(())
    }

    /// モジュールの契約を取得する。
    ///
    /// 未登録の場合は`None`（検証スキップ、呼び出し側の責任）。エラーではない。
    pub fn lookup(&self, identity: &ModuleIdentity) -> Option<&ExportContract> {
        self.contracts.get(identity)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ExportContract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// JSONドキュメント形式に変換する。
    pub fn to_document(&self) -> ContractDocument {
        self.contracts
            .iter()
            .map(|(id, c)| (id.to_string(), c.exports().to_vec()))
            .collect()
    }
}

/// 組み込み契約。
///
/// `wasm_hello` はこの他に `get_fave_car`/`set_fave_car`, `get_fave_team`/`set_fave_team`,
/// `get_decimal`/`set_decimal` も公開するが、ページが依存する6シンボルのみを契約に含める。
fn builtin_contracts() -> Vec<ExportContract> {
    let hello = ExportContract {
        identity: ModuleIdentity("wasm_hello".to_string()),
        exports: vec![
            ExportSpec::function("wasm_init", Some(1)),
            ExportSpec::function("get_counter", Some(0)),
            ExportSpec::function("increment_counter", Some(0)),
            ExportSpec::function("get_message", None),
            ExportSpec::function("set_message", None),
            ExportSpec::memory("memory"),
        ],
    };
    vec![hello]
}
