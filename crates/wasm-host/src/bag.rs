//! # 生エクスポート
//!
//! インスタンス化したモジュールの型なしエクスポート集合。
//! ローダーが検証の間だけ所有し、検証後は`ValidatedHandle`に絞り込まれる。

use std::collections::BTreeMap;

use serde::Serialize;
use wasmtime::{Engine, Extern, Linker, Module, Store};

use crate::WasmError;

/// 観測されたエクスポートの実行時種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObservedExport {
    /// 関数（WASMレベルの引数・戻り値の数）
    Function { params: usize, results: usize },
    /// リニアメモリ（ページ数）
    Memory { pages: u64 },
    /// グローバル値
    Value,
    /// テーブル
    Table,
    /// 上記以外
    Other,
}

impl ObservedExport {
    pub fn describe(&self) -> String {
        match self {
            ObservedExport::Function { params, .. } => format!("function/{params}"),
            ObservedExport::Memory { .. } => "memory".to_string(),
            ObservedExport::Value => "value".to_string(),
            ObservedExport::Table => "table".to_string(),
            ObservedExport::Other => "other".to_string(),
        }
    }
}

/// シンボル名 → 観測種別 のマッピング。
pub type ExportSurface = BTreeMap<String, ObservedExport>;

/// インスタンス化済みモジュールの生エクスポート。
pub struct RawExportBag {
    pub(crate) store: Store<()>,
    pub(crate) exports: BTreeMap<String, Extern>,
}

impl RawExportBag {
    /// WASMバイナリをコンパイル・インスタンス化し、全エクスポートを取得する。
    ///
    /// 未解決のインポート関数は、呼び出し時にトラップするスタブとして定義する。
    ///
    /// # 引数
    /// - `engine`: wasmtimeエンジン（ローダー単位で共有）
    /// - `wasm_bytes`: WASMバイナリ
    pub fn instantiate(engine: &Engine, wasm_bytes: &[u8]) -> Result<Self, WasmError> {
        let module = Module::new(engine, wasm_bytes)
            .map_err(|e| WasmError::CompileError(format!("{e:#}")))?;

        let mut linker: Linker<()> = Linker::new(engine);
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| WasmError::InstantiateError(format!("{e:#}")))?;

        let mut store = Store::new(engine, ());
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| WasmError::InstantiateError(format!("{e:#}")))?;

        let exports = instance
            .exports(&mut store)
            .map(|export| (export.name().to_string(), export.into_extern()))
            .collect::<BTreeMap<_, _>>();

        tracing::debug!(exports = exports.len(), "WASMモジュールをインスタンス化しました");
        Ok(Self { store, exports })
    }

    /// エクスポートシンボル名の一覧（昇順）。
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// 全エクスポートの実行時種別を調べる。
    pub fn surface(&self) -> ExportSurface {
        self.exports
            .iter()
            .map(|(name, ext)| (name.clone(), observe(&self.store, ext)))
            .collect()
    }
}

/// 1つのエクスポートの実行時種別を判定する。
#[allow(unreachable_patterns)]
pub(crate) fn observe(store: &Store<()>, ext: &Extern) -> ObservedExport {
    match ext {
        Extern::Func(func) => {
            let ty = func.ty(store);
            let observed = ObservedExport::Function {
                params: ty.params().len(),
                results: ty.results().len(),
            };
            observed
        }
        Extern::Memory(memory) => ObservedExport::Memory {
            pages: memory.size(store),
        },
        Extern::SharedMemory(memory) => ObservedExport::Memory {
            pages: memory.size(),
        },
        Extern::Global(_) => ObservedExport::Value,
        Extern::Table(_) => ObservedExport::Table,
        _ => ObservedExport::Other,
    }
}
