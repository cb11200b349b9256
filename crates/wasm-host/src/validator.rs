//! # エクスポート検証
//!
//! 生エクスポートを契約に照らして検査する。
//! 最初の違反で打ち切らず、全ての欠落・種別不一致を収集してから失敗を返す。

use std::fmt;

use wasmlab_types::{ExportContract, ExportKind, ModuleIdentity};

use crate::bag::{ExportSurface, ObservedExport, RawExportBag};
use crate::handle::ValidatedHandle;

/// 契約違反の1件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// シンボルが存在しない
    Missing { symbol: String, expected: ExportKind },
    /// シンボルは存在するが種別が異なる
    KindMismatch {
        symbol: String,
        expected: ExportKind,
        found: ObservedExport,
    },
    /// 関数の引数の数が異なる
    ArityMismatch {
        symbol: String,
        expected: usize,
        found: usize,
    },
}

impl Violation {
    pub fn symbol(&self) -> &str {
        match self {
            Violation::Missing { symbol, .. }
            | Violation::KindMismatch { symbol, .. }
            | Violation::ArityMismatch { symbol, .. } => symbol,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing { symbol, expected } => {
                write!(f, "{symbol}: 欠落 (期待: {expected})")
            }
            Violation::KindMismatch {
                symbol,
                expected,
                found,
            } => write!(
                f,
                "{symbol}: 種別不一致 (期待: {expected}, 実際: {})",
                found.describe()
            ),
            Violation::ArityMismatch {
                symbol,
                expected,
                found,
            } => write!(f, "{symbol}: 引数の数が不一致 (期待: {expected}, 実際: {found})"),
        }
    }
}

/// エクスポート検証の失敗。全違反と、期待・実在シンボルの一覧を保持する。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("モジュール {module} のエクスポート検証に失敗 {}", summarize(.violations))]
pub struct ValidationFailure {
    /// 対象モジュール
    pub module: ModuleIdentity,
    /// 全ての違反（契約の定義順）
    pub violations: Vec<Violation>,
    /// 契約が要求するシンボル
    pub expected: Vec<String>,
    /// モジュールが実際に公開していたシンボル
    pub available: Vec<String>,
}

impl ValidationFailure {
    /// 違反したシンボル名の一覧。
    pub fn symbols(&self) -> Vec<&str> {
        self.violations.iter().map(Violation::symbol).collect()
    }
}

fn summarize(violations: &[Violation]) -> String {
    let details = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("({} 件): {details}", violations.len())
}

/// 観測したエクスポート面を契約と照合し、全ての違反を返す。
///
/// 空の戻り値は契約を満たしていることを意味する。
pub fn check_surface(surface: &ExportSurface, contract: &ExportContract) -> Vec<Violation> {
    contract
        .exports()
        .iter()
        .filter_map(|spec| check_one(surface.get(&spec.symbol), &spec.symbol, spec.kind))
        .collect()
}

fn check_one(
    observed: Option<&ObservedExport>,
    symbol: &str,
    expected: ExportKind,
) -> Option<Violation> {
    let Some(found) = observed else {
        return Some(Violation::Missing {
            symbol: symbol.to_string(),
            expected,
        });
    };

    match (expected, found) {
        (ExportKind::Function { arity }, ObservedExport::Function { params, .. }) => match arity {
            Some(n) if n != *params => Some(Violation::ArityMismatch {
                symbol: symbol.to_string(),
                expected: n,
                found: *params,
            }),
            _ => None,
        },
        (ExportKind::Memory, ObservedExport::Memory { .. }) => None,
        (ExportKind::Value, ObservedExport::Value) => None,
        _ => Some(Violation::KindMismatch {
            symbol: symbol.to_string(),
            expected,
            found: *found,
        }),
    }
}

/// 生エクスポートを検証し、契約の範囲に絞り込んだハンドルを返す。
///
/// 契約が`None`の場合は検証をスキップし、全エクスポートを公開するハンドルを返す
/// （`ValidatedHandle::contract`が`None`を返す）。
///
/// # 引数
/// - `identity`: 対象モジュール
/// - `bag`: インスタンス化済みの生エクスポート
/// - `contract`: レジストリから引いた契約
pub fn validate(
    identity: &ModuleIdentity,
    bag: RawExportBag,
    contract: Option<&ExportContract>,
) -> Result<ValidatedHandle, ValidationFailure> {
    let Some(contract) = contract else {
        tracing::debug!(module = %identity, "契約が未登録のため検証をスキップします");
        return Ok(ValidatedHandle::unchecked(identity.clone(), bag));
    };

    let violations = check_surface(&bag.surface(), contract);
    if !violations.is_empty() {
        return Err(ValidationFailure {
            module: identity.clone(),
            violations,
            expected: contract.symbols().map(str::to_string).collect(),
            available: bag.names().map(str::to_string).collect(),
        });
    }

    Ok(ValidatedHandle::narrowed(identity.clone(), bag, contract.clone()))
}
