//! # 検証済みハンドル
//!
//! 契約を満たすことが保証された、モジュールエクスポートの絞り込みビュー。
//! 全呼び出し元で共有され（`Arc`）、ハンドル自体は変更されない。
//! ストアはミューテックスで保護し、`&self`経由で関数を呼び出せるようにする。

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use wasmlab_types::{ExportContract, ExportKind, ModuleIdentity};
use wasmtime::{Extern, Store, Val, WasmParams, WasmResults};

use crate::bag::{observe, ExportSurface, RawExportBag};
use crate::WasmError;

/// 検証済みモジュールハンドル。
pub struct ValidatedHandle {
    identity: ModuleIdentity,
    /// `None`の場合は契約未登録（検証スキップ）
    contract: Option<ExportContract>,
    store: Mutex<Store<()>>,
    exports: BTreeMap<String, Extern>,
    surface: ExportSurface,
}

impl std::fmt::Debug for ValidatedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedHandle")
            .field("identity", &self.identity)
            .field("validated", &self.contract.is_some())
            .field("surface", &self.surface)
            .finish()
    }
}

impl ValidatedHandle {
    /// 契約に含まれるシンボルのみを残したハンドルを作成する。
    pub(crate) fn narrowed(
        identity: ModuleIdentity,
        bag: RawExportBag,
        contract: ExportContract,
    ) -> Self {
        let RawExportBag { store, exports } = bag;
        let exports: BTreeMap<String, Extern> = exports
            .into_iter()
            .filter(|(name, _)| contract.get(name).is_some())
            .collect();
        Self::build(identity, Some(contract), store, exports)
    }

    /// 検証せずに全エクスポートを公開するハンドルを作成する。
    pub(crate) fn unchecked(identity: ModuleIdentity, bag: RawExportBag) -> Self {
        let RawExportBag { store, exports } = bag;
        Self::build(identity, None, store, exports)
    }

    fn build(
        identity: ModuleIdentity,
        contract: Option<ExportContract>,
        store: Store<()>,
        exports: BTreeMap<String, Extern>,
    ) -> Self {
        let surface = exports
            .iter()
            .map(|(name, ext)| (name.clone(), observe(&store, ext)))
            .collect();
        Self {
            identity,
            contract,
            store: Mutex::new(store),
            exports,
            surface,
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// 検証に使用した契約。契約未登録で検証をスキップした場合は`None`。
    pub fn contract(&self) -> Option<&ExportContract> {
        self.contract.as_ref()
    }

    pub fn is_validated(&self) -> bool {
        self.contract.is_some()
    }

    /// 公開しているシンボル名（昇順）。
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// 公開しているエクスポートの種別。
    pub fn surface(&self) -> &ExportSurface {
        &self.surface
    }

    /// 関数を動的な値で呼び出す。
    ///
    /// # 引数
    /// - `name`: 関数シンボル名
    /// - `args`: 引数
    pub fn call(&self, name: &str, args: &[Val]) -> Result<Vec<Val>, WasmError> {
        let func = match self.export(name)? {
            Extern::Func(func) => *func,
            _ => return Err(kind_mismatch(name, "function")),
        };

        let mut store = self.lock();
        let result_count = func.ty(&*store).results().len();
        let mut results = vec![Val::I32(0); result_count];
        func.call(&mut *store, args, &mut results)
            .map_err(|e| WasmError::ExecutionError(format!("{name}: {e:#}")))?;
        Ok(results)
    }

    /// 関数を静的な型で呼び出す。
    ///
    /// 型が一致しない場合は`KindMismatch`を返す。
    pub fn call_typed<P, R>(&self, name: &str, params: P) -> Result<R, WasmError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = match self.export(name)? {
            Extern::Func(func) => *func,
            _ => return Err(kind_mismatch(name, "function")),
        };

        let mut store = self.lock();
        let typed = func
            .typed::<P, R>(&*store)
            .map_err(|_| {
                let signature = format!(
                    "{} -> {}",
                    std::any::type_name::<P>(),
                    std::any::type_name::<R>()
                );
                kind_mismatch(name, &signature)
            })?;
        typed
            .call(&mut *store, params)
            .map_err(|e| WasmError::ExecutionError(format!("{name}: {e:#}")))
    }

    /// グローバル値を読み取る。
    pub fn global(&self, name: &str) -> Result<Val, WasmError> {
        let global = match self.export(name)? {
            Extern::Global(global) => *global,
            _ => return Err(kind_mismatch(name, "value")),
        };
        let mut store = self.lock();
        Ok(global.get(&mut *store))
    }

    /// リニアメモリのバイト数。
    pub fn memory_size(&self) -> Result<usize, WasmError> {
        let memory = self.memory()?;
        let store = self.lock();
        Ok(memory.data_size(&*store))
    }

    /// リニアメモリの指定範囲をコピーして返す。
    ///
    /// # 引数
    /// - `offset`: 開始オフセット（バイト）
    /// - `len`: 読み取り長（バイト）
    pub fn read_memory(&self, offset: usize, len: usize) -> Result<Vec<u8>, WasmError> {
        let memory = self.memory()?;
        let store = self.lock();
        let data = memory.data(&*store);
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or(WasmError::MemoryOutOfBounds {
                offset,
                len,
                size: data.len(),
            })
    }

    /// 公開されているメモリを返す。
    ///
    /// 契約がある場合は契約上のmemoryシンボル、ない場合は `memory` という名前のエクスポート。
    fn memory(&self) -> Result<wasmtime::Memory, WasmError> {
        let name = self
            .contract
            .as_ref()
            .and_then(|c| {
                c.exports()
                    .iter()
                    .find(|s| s.kind == ExportKind::Memory)
                    .map(|s| s.symbol.as_str())
            })
            .unwrap_or("memory");

        match self.export(name)? {
            Extern::Memory(memory) => Ok(*memory),
            _ => Err(kind_mismatch(name, "memory")),
        }
    }

    fn export(&self, name: &str) -> Result<&Extern, WasmError> {
        self.exports
            .get(name)
            .ok_or_else(|| WasmError::UnknownExport(name.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, Store<()>> {
        // トラップはパニックではないため、汚染されたロックもそのまま利用できる
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn kind_mismatch(symbol: &str, expected: &str) -> WasmError {
    WasmError::KindMismatch {
        symbol: symbol.to_string(),
        expected: expected.to_string(),
    }
}
