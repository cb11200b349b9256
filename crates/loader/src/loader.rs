//! # モジュールローダー
//!
//! モジュール名ごとに高々1回だけ取得・インスタンス化・検証を行い、
//! 検証済みハンドルを全呼び出し元で共有する（シングルフライト）。
//!
//! ## キャッシュの状態
//! - エントリなし: 未着手（または直前の試行が失敗）
//! - `InFlight`: 試行中。後続の呼び出し元は同じ結果を待つ
//! - `Ready`: 成功済み。以降は取得も検証も行わずに返す
//!
//! ## 失敗時の方針
//! 失敗はキャッシュしない。試行中に待っていた呼び出し元には同じエラーを配り、
//! エントリを削除する。次の`acquire`は新しい試行を開始する。
//!
//! 試行はtokioタスクとして実行されるため、呼び出し元が待機を中断しても
//! 取得・インスタンス化は最後まで実行される。

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use wasmlab_types::{ContractRegistry, ModuleIdentity};
use wasmlab_wasm_host::{validate, Engine, RawExportBag, ValidatedHandle};

use crate::error::{AcquireError, LoadError};
use crate::source::ModuleSource;

/// 1回の試行の結果。全ての待機者に複製して配られる。
type Outcome = Result<Arc<ValidatedHandle>, AcquireError>;

/// モジュール名ごとのキャッシュエントリ。
enum CacheEntry {
    /// 試行中。`attempt`はリセット後の古い試行を識別するための番号
    InFlight {
        attempt: u64,
        rx: watch::Receiver<Option<Outcome>>,
    },
    /// 成功済み
    Ready(Arc<ValidatedHandle>),
}

enum Subscription {
    Ready(Arc<ValidatedHandle>),
    Pending(watch::Receiver<Option<Outcome>>),
}

struct Inner {
    engine: Engine,
    registry: Arc<ContractRegistry>,
    source: Arc<dyn ModuleSource>,
    cache: Mutex<HashMap<ModuleIdentity, CacheEntry>>,
    next_attempt: AtomicU64,
}

/// シングルフライトのモジュールローダー。
///
/// 一度構築して`Clone`で共有する（内部は`Arc`）。
/// テストでは独立したローダーを個別に構築できる。
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<Inner>,
}

impl ModuleLoader {
    /// 新しいModuleLoaderを作成する。
    ///
    /// # 引数
    /// - `registry`: エクスポート契約レジストリ
    /// - `source`: WASMバイナリの取得元
    pub fn new(registry: Arc<ContractRegistry>, source: Arc<dyn ModuleSource>) -> Self {
        Self::with_engine(Engine::default(), registry, source)
    }

    /// wasmtimeエンジンを指定してModuleLoaderを作成する。
    pub fn with_engine(
        engine: Engine,
        registry: Arc<ContractRegistry>,
        source: Arc<dyn ModuleSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                registry,
                source,
                cache: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.inner.registry
    }

    /// モジュールの検証済みハンドルを取得する。
    ///
    /// 初回呼び出しのみが実際の取得・インスタンス化・検証を行う。
    /// 試行中の呼び出しは同じ結果を待ち、成功後の呼び出しは即座にハンドルを返す。
    pub async fn acquire(
        &self,
        identity: &ModuleIdentity,
    ) -> Result<Arc<ValidatedHandle>, AcquireError> {
        let subscription = self.subscribe(identity);
        wait(identity, subscription).await
    }

    /// 複数モジュールの試行を同時に開始し、全ての結果を入力順に返す。
    pub async fn preload(
        &self,
        identities: &[ModuleIdentity],
    ) -> Vec<Result<Arc<ValidatedHandle>, AcquireError>> {
        let subscriptions: Vec<Subscription> =
            identities.iter().map(|id| self.subscribe(id)).collect();

        let mut outcomes = Vec::with_capacity(identities.len());
        for (identity, subscription) in identities.iter().zip(subscriptions) {
            outcomes.push(wait(identity, subscription).await);
        }
        outcomes
    }

    /// 成功済みのハンドルがキャッシュされているか。
    pub fn is_ready(&self, identity: &ModuleIdentity) -> bool {
        matches!(
            self.inner.lock_cache().get(identity),
            Some(CacheEntry::Ready(_))
        )
    }

    /// キャッシュエントリを破棄する。次の`acquire`は新しい試行を開始する。
    ///
    /// 試行中のエントリを破棄した場合、その試行の待機者には結果が届くが、
    /// 結果はキャッシュに反映されない。
    pub fn reset(&self, identity: &ModuleIdentity) -> bool {
        let removed = self.inner.lock_cache().remove(identity).is_some();
        if removed {
            tracing::info!(module = %identity, "モジュールキャッシュをリセットしました");
        }
        removed
    }

    /// キャッシュを確認し、必要なら新しい試行を開始する。
    fn subscribe(&self, identity: &ModuleIdentity) -> Subscription {
        let mut cache = self.inner.lock_cache();
        match cache.get(identity) {
            Some(CacheEntry::Ready(handle)) => return Subscription::Ready(handle.clone()),
            // 送信側が結果を公開せずに消えた試行は無効とみなし、新しい試行で置き換える
            Some(CacheEntry::InFlight { rx, .. }) if rx.has_changed().is_ok() => {
                return Subscription::Pending(rx.clone());
            }
            _ => {}
        }

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        cache.insert(
            identity.clone(),
            CacheEntry::InFlight {
                attempt,
                rx: rx.clone(),
            },
        );
        drop(cache);

        tokio::spawn(Inner::run_attempt(
            self.inner.clone(),
            identity.clone(),
            attempt,
            tx,
        ));
        Subscription::Pending(rx)
    }
}

/// 試行の結果を待つ。
async fn wait(identity: &ModuleIdentity, subscription: Subscription) -> Outcome {
    let mut rx = match subscription {
        Subscription::Ready(handle) => return Ok(handle),
        Subscription::Pending(rx) => rx,
    };

    let published = rx
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|value| (*value).clone());
    published.unwrap_or_else(|| Err(AcquireError::load(identity, LoadError::Abandoned)))
}

impl Inner {
    fn lock_cache(&self) -> MutexGuard<'_, HashMap<ModuleIdentity, CacheEntry>> {
        // キャッシュ操作中にパニックする箇所はない
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 1回の試行を実行し、キャッシュを更新してから結果を公開する。
    async fn run_attempt(
        self: Arc<Self>,
        identity: ModuleIdentity,
        attempt: u64,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        tracing::info!(module = %identity, attempt, "モジュールのロードを開始します");
        let outcome = self.load(&identity).await;

        match &outcome {
            Ok(handle) => tracing::info!(
                module = %identity,
                symbols = handle.surface().len(),
                validated = handle.is_validated(),
                "モジュールのロードが完了しました"
            ),
            Err(e) => tracing::warn!(module = %identity, error = %e, "モジュールのロードに失敗しました"),
        }

        {
            let mut cache = self.lock_cache();
            let current = matches!(
                cache.get(&identity),
                Some(CacheEntry::InFlight { attempt: a, .. }) if *a == attempt
            );
            if current {
                match &outcome {
                    Ok(handle) => {
                        cache.insert(identity.clone(), CacheEntry::Ready(handle.clone()));
                    }
                    Err(_) => {
                        cache.remove(&identity);
                    }
                }
            }
        }

        tx.send_replace(Some(outcome));
    }

    /// 取得 → インスタンス化 → 検証。
    async fn load(&self, identity: &ModuleIdentity) -> Outcome {
        let binary = self
            .source
            .fetch(identity)
            .await
            .map_err(|e| AcquireError::load(identity, LoadError::Fetch(e)))?;
        tracing::debug!(
            module = %identity,
            source = %binary.source,
            bytes = binary.bytes.len(),
            "WASMバイナリを取得しました"
        );

        let contract = self.registry.lookup(identity);
        if contract.is_none() {
            tracing::warn!(module = %identity, "契約が未登録のため検証をスキップします");
        }

        // catch_unwindでパニック遮断
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Outcome {
            let bag = RawExportBag::instantiate(&self.engine, &binary.bytes)
                .map_err(|e| AcquireError::load(identity, e))?;
            let handle = validate(identity, bag, contract)?;
            Ok(Arc::new(handle))
        }));

        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "不明なパニック".to_string());
                Err(AcquireError::load(identity, LoadError::Panic(message)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;
    use wasmlab_wasm_host::WasmError;

    use crate::source::ModuleBinary;

    const HELLO_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (global $counter (mut i32) (i32.const 0))
          (func (export "wasm_init") (param i32) local.get 0 global.set $counter)
          (func (export "get_counter") (result i32) global.get $counter)
          (func (export "increment_counter")
            global.get $counter i32.const 1 i32.add global.set $counter)
          (func (export "get_message") (param i32))
          (func (export "set_message") (param i32 i32))
          (func (export "__wbindgen_malloc") (param i32 i32) (result i32) i32.const 0)
        )
    "#;

    const BROKEN_HELLO_WAT: &str = r#"
        (module
          (func (export "wasm_init") (param i32))
          (func (export "get_counter") (result i32) i32.const 0)
          (func (export "get_message") (param i32))
          (func (export "set_message") (param i32 i32))
          (func (export "memory"))
        )
    "#;

    fn hello() -> Vec<u8> {
        wat::parse_str(HELLO_WAT).unwrap()
    }

    fn hello_id() -> ModuleIdentity {
        ModuleIdentity::new("wasm_hello").unwrap()
    }

    /// 台本どおりの結果を返し、取得回数を数えるテスト用ソース。
    struct ScriptedSource {
        fetches: AtomicUsize,
        /// 先頭から順に消費する。最後の1件は繰り返し返す
        script: Mutex<VecDeque<Result<Vec<u8>, String>>>,
        delay: Duration,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                delay: Duration::from_millis(20),
                gate: None,
            }
        }

        fn with_gate(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl ModuleSource for ScriptedSource {
        fn fetch<'a>(
            &'a self,
            identity: &'a ModuleIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, String>> + Send + 'a>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                tokio::time::sleep(self.delay).await;

                let next = {
                    let mut script = self.script.lock().unwrap();
                    if script.len() > 1 {
                        script.pop_front()
                    } else {
                        script.front().cloned()
                    }
                };
                next.unwrap_or_else(|| Err("台本が空です".to_string()))
                    .map(|bytes| ModuleBinary {
                        bytes,
                        source: format!("test://{identity}"),
                    })
            })
        }
    }

    fn loader_with(source: Arc<ScriptedSource>) -> ModuleLoader {
        ModuleLoader::new(Arc::new(ContractRegistry::builtin()), source)
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_single_flight() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]));
        let loader = loader_with(source.clone());
        let id = hello_id();

        let (a, b, c) = tokio::join!(loader.acquire(&id), loader.acquire(&id), loader.acquire(&id));
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(source.fetches(), 1);
        assert!(loader.is_ready(&id));

        // 成功後の呼び出しは取得を行わない
        let d = loader.acquire(&id).await.unwrap();
        assert!(Arc::ptr_eq(&a, &d));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_failure() {
        let source = Arc::new(ScriptedSource::new(vec![Err("connection refused".to_string())]));
        let loader = loader_with(source.clone());
        let id = hello_id();

        let (a, b, c) = tokio::join!(loader.acquire(&id), loader.acquire(&id), loader.acquire(&id));
        let (a, b, c) = (a.unwrap_err(), b.unwrap_err(), c.unwrap_err());

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(matches!(
            &a,
            AcquireError::Load { source: LoadError::Fetch(msg), .. } if msg == "connection refused"
        ));
        assert_eq!(source.fetches(), 1);
        assert!(!loader.is_ready(&id));
    }

    /// 失敗はキャッシュされず、次の呼び出しで再試行される
    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err("transient".to_string()),
            Ok(hello()),
        ]));
        let loader = loader_with(source.clone());
        let id = hello_id();

        assert!(loader.acquire(&id).await.is_err());
        let handle = loader.acquire(&id).await.unwrap();

        assert!(handle.is_validated());
        assert_eq!(source.fetches(), 2);

        loader.acquire(&id).await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_lists_every_symbol() {
        let broken = wat::parse_str(BROKEN_HELLO_WAT).unwrap();
        let source = Arc::new(ScriptedSource::new(vec![Ok(broken)]));
        let loader = loader_with(source);

        let err = loader.acquire(&hello_id()).await.unwrap_err();
        let AcquireError::Validation(failure) = &err else {
            panic!("ValidationFailureが期待される: {err:?}");
        };
        assert_eq!(failure.symbols(), vec!["increment_counter", "memory"]);
        assert_eq!(err.module(), &hello_id());
    }

    #[tokio::test]
    async fn test_malformed_binary_is_load_error() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(b"not wasm".to_vec())]));
        let loader = loader_with(source);

        let err = loader.acquire(&hello_id()).await.unwrap_err();
        assert!(matches!(
            err,
            AcquireError::Load {
                source: LoadError::Wasm(WasmError::CompileError(_)),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unregistered_module_skips_validation() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]));
        let loader = loader_with(source);
        let id = ModuleIdentity::new("wasm_sandbox").unwrap();

        let handle = loader.acquire(&id).await.unwrap();

        assert!(handle.contract().is_none());
        assert!(handle.symbols().any(|s| s == "__wbindgen_malloc"));
    }

    #[tokio::test]
    async fn test_reset_forces_new_attempt() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]));
        let loader = loader_with(source.clone());
        let id = hello_id();

        let first = loader.acquire(&id).await.unwrap();
        assert!(loader.reset(&id));
        assert!(!loader.is_ready(&id));
        let second = loader.acquire(&id).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetches(), 2);
        assert!(!loader.reset(&ModuleIdentity::new("wasm_astar").unwrap()));
    }

    /// 呼び出し元が待機をやめても試行は最後まで実行される
    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_attempt() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]).with_gate(gate.clone()));
        let loader = loader_with(source.clone());
        let id = hello_id();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), loader.acquire(&id)).await;
        assert!(abandoned.is_err());

        gate.notify_one();
        let handle = loader.acquire(&id).await.unwrap();

        assert!(handle.is_validated());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_preload_starts_all_attempts() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]));
        let loader = loader_with(source.clone());
        let ids = vec![hello_id(), ModuleIdentity::new("wasm_sandbox").unwrap()];

        let outcomes = loader.preload(&ids).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Result::is_ok));
        assert_eq!(source.fetches(), 2);
        assert!(ids.iter().all(|id| loader.is_ready(id)));
    }

    #[tokio::test]
    async fn test_handle_is_callable_from_every_clone() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(hello())]));
        let loader = loader_with(source);
        let other = loader.clone();
        let id = hello_id();

        let handle = loader.acquire(&id).await.unwrap();
        handle.call_typed::<i32, ()>("wasm_init", 10).unwrap();

        let shared = other.acquire(&id).await.unwrap();
        shared.call_typed::<(), ()>("increment_counter", ()).unwrap();
        assert_eq!(handle.call_typed::<(), i32>("get_counter", ()).unwrap(), 11);
    }
}
