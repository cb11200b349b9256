//! # 書き換え規則
//!
//! バイナリモジュールを参照する式を、正規の絶対パス `/<root>/<name>/<asset>` に
//! 書き換える規則の集合。各規則は独立してテスト可能で、冪等である
//! （絶対パス化済みの式には一致しない）。
//!
//! ## 規則
//! - `PreloadWrapped`: `<helper>(() => import("<path>")[, deps...])` → `import("/<root>/<name>/<asset>")`
//!   （コールバック本体を持つ形 `<helper>(async () => { ... }, deps)` は `(async () => { ... })()` に展開する）
//! - `RelativeImport`: `import("../../<root>/<name>/<asset>")` → `import("/<root>/<name>/<asset>")`
//! - `GlueAssetUrl`: `new URL('<asset>', import.meta.url)` → `new URL('/<root>/<name>/<asset>', import.meta.url)`

use wasmlab_types::{ModuleIdentity, ModuleLayout};

use crate::scan::{
    argument_end, dynamic_import, expect, find_word, push_literal, skip_ws, string_literal,
    DynamicImport,
};

/// バンドラのプリロードヘルパー名のデフォルト。
pub const DEFAULT_PRELOAD_HELPER: &str = "__vitePreload";

/// 書き換え規則。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteRule {
    /// プリロードヘルパーで包まれた動的インポートを、包みを外した直接のインポートにする
    PreloadWrapped { helpers: Vec<String> },
    /// 親ディレクトリ参照を含む相対パスの動的インポートを絶対パスにする
    RelativeImport,
    /// グルーコード内の `import.meta.url` 基準のアセットURLを絶対パスにする
    GlueAssetUrl { module: ModuleIdentity },
}

/// 規則適用の結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    /// 置換した式の数
    pub replacements: usize,
    /// 一致したが書き換えられなかったアセット参照
    pub unresolved: Vec<String>,
}

impl RewriteRule {
    /// 規則を1回適用する。
    pub fn apply(&self, src: &str, layout: &ModuleLayout) -> Rewrite {
        match self {
            RewriteRule::PreloadWrapped { helpers } => {
                helpers.iter().fold(unchanged(src), |acc, helper| {
                    let next = rewrite_wrapped(&acc.text, helper, layout);
                    merge(acc, next)
                })
            }
            RewriteRule::RelativeImport => rewrite_relative(src, layout),
            RewriteRule::GlueAssetUrl { module } => rewrite_glue_urls(src, module, layout),
        }
    }
}

/// 順序付きの規則集合。
#[derive(Debug, Clone)]
pub struct RuleSet {
    layout: ModuleLayout,
    rules: Vec<RewriteRule>,
}

impl RuleSet {
    /// バンドラ出力チャンク用の規則集合（ラッパー除去 → 相対パス絶対化）。
    pub fn for_chunks(layout: ModuleLayout, helpers: &[String]) -> Self {
        Self {
            layout,
            rules: vec![
                RewriteRule::PreloadWrapped {
                    helpers: helpers.to_vec(),
                },
                RewriteRule::RelativeImport,
            ],
        }
    }

    /// モジュールのグルーコード用の規則集合。
    pub fn for_glue(layout: ModuleLayout, module: ModuleIdentity) -> Self {
        Self {
            layout,
            rules: vec![RewriteRule::GlueAssetUrl { module }],
        }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// 全規則を順に適用する。
    pub fn apply(&self, src: &str) -> Rewrite {
        self.rules.iter().fold(unchanged(src), |acc, rule| {
            let next = rule.apply(&acc.text, &self.layout);
            merge(acc, next)
        })
    }
}

fn unchanged(src: &str) -> Rewrite {
    Rewrite {
        text: src.to_string(),
        ..Rewrite::default()
    }
}

fn merge(acc: Rewrite, next: Rewrite) -> Rewrite {
    let mut unresolved = acc.unresolved;
    unresolved.extend(next.unresolved);
    Rewrite {
        text: next.text,
        replacements: acc.replacements + next.replacements,
        unresolved,
    }
}

// ---------------------------------------------------------------------------
// パス解決
// ---------------------------------------------------------------------------

/// 1つ以上の `../` に続く `<root>/<name>/<asset>` を正規の絶対パスにする。
pub(crate) fn relative_target(path: &str, layout: &ModuleLayout) -> Option<String> {
    let mut rest = path;
    let mut parents = 0;
    while let Some(stripped) = rest.strip_prefix("../") {
        rest = stripped;
        parents += 1;
    }
    if parents == 0 {
        return None;
    }
    let (name, asset) = layout.split_module_path(rest)?;
    Some(format!("/{}/{name}/{asset}", layout.root()))
}

/// ラッパー内のインポートパス（相対・絶対のどちらも可）を正規の絶対パスにする。
fn wrapped_target(path: &str, layout: &ModuleLayout) -> Option<String> {
    if layout.parse_absolute(path).is_some() {
        return Some(path.to_string());
    }
    relative_target(path, layout)
}

// ---------------------------------------------------------------------------
// 各規則の実装
// ---------------------------------------------------------------------------

/// `<helper>(() => import("<path>")[, args...])` の一致結果。
pub(crate) struct WrappedImport<'a> {
    pub start: usize,
    pub end: usize,
    pub import: DynamicImport<'a>,
}

/// `<helper>(<callback>[, args...])` の一致結果。`callback`は第1引数の範囲。
pub(crate) struct WrappedCall {
    pub start: usize,
    pub end: usize,
    pub callback: (usize, usize),
}

/// `at`から始まるプリロードラッパー呼び出しを読む。
pub(crate) fn wrapped_import<'a>(
    src: &'a str,
    at: usize,
    helper: &str,
) -> Option<WrappedImport<'a>> {
    let mut pos = expect(src, at + helper.len(), "(")?;
    pos = expect(src, pos, "(")?;
    pos = expect(src, pos, ")")?;
    pos = expect(src, pos, "=>")?;
    let import = dynamic_import(src, skip_ws(src, pos))?;

    pos = skip_ws(src, import.end);
    // 依存リスト等の後続引数はいくつでも読み飛ばす
    while src.as_bytes().get(pos) == Some(&b',') {
        pos = argument_end(src, pos + 1)?;
    }
    let end = expect(src, pos, ")")?;
    Some(WrappedImport {
        start: at,
        end,
        import,
    })
}

/// `at`から始まるヘルパー呼び出しを、第1引数の形を問わず読む。
pub(crate) fn wrapped_call(src: &str, at: usize, helper: &str) -> Option<WrappedCall> {
    let open = expect(src, at + helper.len(), "(")?;
    let first_end = argument_end(src, open)?;
    let mut pos = first_end;
    while src.as_bytes().get(pos) == Some(&b',') {
        pos = argument_end(src, pos + 1)?;
    }
    Some(WrappedCall {
        start: at,
        end: pos + 1,
        callback: (open, first_end),
    })
}

/// `code`がモジュールルート配下への動的インポートを含むか。
fn imports_module(code: &str, layout: &ModuleLayout) -> bool {
    let mut pos = 0;
    while let Some(at) = find_word(code, "import", pos) {
        pos = at + "import".len();
        if let Some(import) = dynamic_import(code, at) {
            if wrapped_target(import.literal.value, layout).is_some() {
                return true;
            }
        }
    }
    false
}

fn rewrite_wrapped(src: &str, helper: &str, layout: &ModuleLayout) -> Rewrite {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    let mut pos = 0;
    let mut replacements = 0;

    while let Some(at) = find_word(src, helper, pos) {
        pos = at + helper.len();

        if let Some(wrapped) = wrapped_import(src, at, helper) {
            let literal = wrapped.import.literal;
            if let Some(target) = wrapped_target(literal.value, layout) {
                out.push_str(&src[last..wrapped.start]);
                out.push_str("import(");
                push_literal(&mut out, literal.quote, &target);
                out.push(')');
                last = wrapped.end;
                replacements += 1;
                tracing::trace!(helper, target = %target, "プリロードラッパーを除去しました");
            }
            pos = wrapped.end;
            continue;
        }

        // `helper(async () => { ... await import(..) ... }, deps)` はコールバックを直接呼ぶ形にする。
        // 中のインポートパスは後続の`RelativeImport`が書き換える。
        let Some(call) = wrapped_call(src, at, helper) else {
            continue;
        };
        let callback = src[call.callback.0..call.callback.1].trim();
        if imports_module(callback, layout) {
            out.push_str(&src[last..call.start]);
            out.push('(');
            out.push_str(callback);
            out.push_str(")()");
            last = call.end;
            replacements += 1;
            tracing::trace!(helper, "プリロードラッパーのコールバックを展開しました");
            pos = call.end;
        }
    }

    out.push_str(&src[last..]);
    Rewrite {
        text: out,
        replacements,
        unresolved: Vec::new(),
    }
}

fn rewrite_relative(src: &str, layout: &ModuleLayout) -> Rewrite {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    let mut pos = 0;
    let mut replacements = 0;

    while let Some(at) = find_word(src, "import", pos) {
        let Some(import) = dynamic_import(src, at) else {
            pos = at + "import".len();
            continue;
        };
        if let Some(target) = relative_target(import.literal.value, layout) {
            out.push_str(&src[last..import.literal.start]);
            push_literal(&mut out, import.literal.quote, &target);
            last = import.literal.end;
            replacements += 1;
        }
        pos = import.end;
    }

    out.push_str(&src[last..]);
    Rewrite {
        text: out,
        replacements,
        unresolved: Vec::new(),
    }
}

/// `new URL(<literal>, import.meta.url)` の一致結果（リテラル位置）。
fn glue_asset_url(src: &str, at: usize) -> Option<crate::scan::StringLiteral<'_>> {
    let pos = expect(src, at + "new".len(), "URL")?;
    if src
        .as_bytes()
        .get(pos)
        .is_some_and(|b| crate::scan::is_ident_byte(*b))
    {
        return None;
    }
    let pos = expect(src, pos, "(")?;
    let literal = string_literal(src, pos)?;
    let pos = expect(src, literal.end, ",")?;
    let pos = expect(src, pos, "import.meta.url")?;
    expect(src, pos, ")")?;
    Some(literal)
}

fn rewrite_glue_urls(src: &str, module: &ModuleIdentity, layout: &ModuleLayout) -> Rewrite {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    let mut pos = 0;
    let mut replacements = 0;
    let mut unresolved = Vec::new();

    while let Some(at) = find_word(src, "new", pos) {
        pos = at + "new".len();
        let Some(literal) = glue_asset_url(src, at) else {
            continue;
        };
        pos = literal.end;

        let value = literal.value;
        if value.starts_with('/') {
            continue;
        }
        if value.starts_with("../") || value.contains("://") || value.starts_with("data:") {
            unresolved.push(value.to_string());
            continue;
        }

        out.push_str(&src[last..literal.start]);
        push_literal(&mut out, literal.quote, &layout.asset_path(module, value));
        last = literal.end;
        replacements += 1;
    }

    out.push_str(&src[last..]);
    Rewrite {
        text: out,
        replacements,
        unresolved,
    }
}

// ---------------------------------------------------------------------------
// 残存検査
// ---------------------------------------------------------------------------

/// 書き換え後に残ってはならない参照（相対パス・ラッパー付き）を列挙する。
pub fn find_unrewritten(src: &str, layout: &ModuleLayout, helpers: &[String]) -> Vec<String> {
    let mut found = Vec::new();

    for helper in helpers {
        let mut pos = 0;
        while let Some(at) = find_word(src, helper, pos) {
            pos = at + helper.len();
            if let Some(call) = wrapped_call(src, at, helper) {
                if imports_module(&src[call.callback.0..call.callback.1], layout) {
                    found.push(src[call.start..call.end].to_string());
                    pos = call.end;
                }
            }
        }
    }

    let mut pos = 0;
    while let Some(at) = find_word(src, "import", pos) {
        pos = at + "import".len();
        if let Some(import) = dynamic_import(src, at) {
            if relative_target(import.literal.value, layout).is_some() {
                found.push(src[import.start..import.end].to_string());
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ModuleLayout {
        ModuleLayout::default()
    }

    fn helpers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relative_import_is_made_absolute() {
        let src = r#"const m = await import("../../pkg/wasm_astar/wasm_astar.js");"#;
        let out = RewriteRule::RelativeImport.apply(src, &layout());
        assert_eq!(
            out.text,
            r#"const m = await import("/pkg/wasm_astar/wasm_astar.js");"#
        );
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_relative_import_keeps_quote_style() {
        let src = "import('../pkg/wasm_hello/wasm_hello.js')";
        let out = RewriteRule::RelativeImport.apply(src, &layout());
        assert_eq!(out.text, "import('/pkg/wasm_hello/wasm_hello.js')");
    }

    #[test]
    fn test_relative_import_ignores_unrelated_paths() {
        let src = concat!(
            r#"import("./pages/astar.js");"#,
            r#"import("../lib/util.js");"#,
            r#"import("./pkg/wasm_hello/wasm_hello.js");"#,
            r#"import("/pkg/wasm_hello/wasm_hello.js");"#,
        );
        let out = RewriteRule::RelativeImport.apply(src, &layout());
        assert_eq!(out.text, src);
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn test_wrapped_preload_with_dependency_list() {
        let src = r#"preloadWrap(() => import("/pkg/x/x.js"), [])"#;
        let rule = RewriteRule::PreloadWrapped {
            helpers: helpers(&["preloadWrap"]),
        };
        let out = rule.apply(src, &layout());
        assert_eq!(out.text, r#"import("/pkg/x/x.js")"#);
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_wrapped_preload_without_trailing_argument() {
        let src = r#"const m = await __vitePreload(() => import("../../pkg/wasm_astar/wasm_astar.js"));"#;
        let rule = RewriteRule::PreloadWrapped {
            helpers: helpers(&[DEFAULT_PRELOAD_HELPER]),
        };
        let out = rule.apply(src, &layout());
        assert_eq!(
            out.text,
            r#"const m = await import("/pkg/wasm_astar/wasm_astar.js");"#
        );
    }

    #[test]
    fn test_wrapped_preload_minified_with_extra_arguments() {
        let src = r#"__vitePreload(()=>import("../pkg/wasm_hello/wasm_hello.js"),__vite__mapDeps([0,1]),import.meta.url).then(m=>m.default())"#;
        let rule = RewriteRule::PreloadWrapped {
            helpers: helpers(&[DEFAULT_PRELOAD_HELPER]),
        };
        let out = rule.apply(src, &layout());
        assert_eq!(
            out.text,
            r#"import("/pkg/wasm_hello/wasm_hello.js").then(m=>m.default())"#
        );
    }

    #[test]
    fn test_wrapped_preload_of_unrelated_chunk_is_kept() {
        let src = r#"__vitePreload(() => import("./pages/astar.js"), __vite__mapDeps([2]))"#;
        let rule = RewriteRule::PreloadWrapped {
            helpers: helpers(&[DEFAULT_PRELOAD_HELPER]),
        };
        let out = rule.apply(src, &layout());
        assert_eq!(out.text, src);
    }

    #[test]
    fn test_glue_asset_url() {
        let id = ModuleIdentity::new("wasm_hello").unwrap();
        let src = "if (typeof module_or_path === 'undefined') {\n    module_or_path = new URL('wasm_hello_bg.wasm', import.meta.url);\n}";
        let out = RewriteRule::GlueAssetUrl { module: id.clone() }.apply(src, &layout());
        assert!(out
            .text
            .contains("new URL('/pkg/wasm_hello/wasm_hello_bg.wasm', import.meta.url)"));
        assert_eq!(out.replacements, 1);
        assert!(out.unresolved.is_empty());

        let again = RewriteRule::GlueAssetUrl { module: id }.apply(&out.text, &layout());
        assert_eq!(again.text, out.text);
        assert_eq!(again.replacements, 0);
    }

    #[test]
    fn test_glue_asset_url_outside_module_is_unresolved() {
        let id = ModuleIdentity::new("wasm_hello").unwrap();
        let src = "new URL('../shared/data.bin', import.meta.url); new URL(\"https://cdn/x.wasm\", import.meta.url)";
        let out = RewriteRule::GlueAssetUrl { module: id }.apply(src, &layout());
        assert_eq!(out.text, src);
        assert_eq!(
            out.unresolved,
            vec!["../shared/data.bin".to_string(), "https://cdn/x.wasm".to_string()]
        );
    }

    #[test]
    fn test_rule_set_is_idempotent() {
        let src = r#"
            const a = () => __vitePreload(() => import("../../pkg/wasm_astar/wasm_astar.js"), __vite__mapDeps([0]));
            const b = () => import('../pkg/wasm_hello/wasm_hello.js');
            const c = () => import("./pages/home.js");
        "#;
        let rules = RuleSet::for_chunks(layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        let once = rules.apply(src);
        let twice = rules.apply(&once.text);

        assert_eq!(once.replacements, 2);
        assert_eq!(twice.text, once.text);
        assert_eq!(twice.replacements, 0);
        let left = find_unrewritten(&once.text, &layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        assert!(left.is_empty());
    }

    #[test]
    fn test_find_unrewritten() {
        let src = r#"import("../pkg/a/a.js"); __vitePreload(() => import("/pkg/b/b.js"), []); import("/pkg/c/c.js")"#;
        let found = find_unrewritten(src, &layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        assert_eq!(
            found,
            vec![
                r#"__vitePreload(() => import("/pkg/b/b.js"), [])"#.to_string(),
                r#"import("../pkg/a/a.js")"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_custom_modules_root() {
        let layout = ModuleLayout::new("wasm").unwrap();
        let src = r#"import("../../wasm/wasm_astar/wasm_astar.js"); import("../../pkg/wasm_astar/wasm_astar.js")"#;
        let out = RewriteRule::RelativeImport.apply(src, &layout);
        assert_eq!(
            out.text,
            r#"import("/wasm/wasm_astar/wasm_astar.js"); import("../../pkg/wasm_astar/wasm_astar.js")"#
        );
    }

    #[test]
    fn test_wrapped_preload_with_async_callback() {
        let src = r#"const { greet } = await __vitePreload(async () => { const { greet } = await import("../../pkg/wasm_hello/wasm_hello.js"); return { greet } }, __vite__mapDeps([0]));"#;
        let rules = RuleSet::for_chunks(layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        let once = rules.apply(src);
        assert_eq!(
            once.text,
            r#"const { greet } = await (async () => { const { greet } = await import("/pkg/wasm_hello/wasm_hello.js"); return { greet } })();"#
        );
        assert_eq!(once.replacements, 2);
        assert_eq!(rules.apply(&once.text).text, once.text);
    }

    #[test]
    fn test_find_unrewritten_flags_async_wrapper() {
        let src = r#"__vitePreload(async()=>{const{x}=await import("/pkg/a/a.js");return{x}},[])"#;
        let found = find_unrewritten(src, &layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        assert_eq!(found, vec![src.to_string()]);

        let unrelated = r#"__vitePreload(async()=>{const{x}=await import("./x.js");return{x}},[])"#;
        let left = find_unrewritten(unrelated, &layout(), &helpers(&[DEFAULT_PRELOAD_HELPER]));
        assert!(left.is_empty());
    }

    #[test]
    fn test_empty_helper_name_matches_nothing() {
        let src = r#"const a = 1; import("../pkg/a/a.js")"#;
        let rule = RewriteRule::PreloadWrapped {
            helpers: helpers(&[""]),
        };
        let out = rule.apply(src, &layout());
        assert_eq!(out.text, src);
        assert_eq!(out.replacements, 0);
        assert_eq!(
            find_unrewritten(src, &layout(), &helpers(&[""])),
            vec![r#"import("../pkg/a/a.js")"#.to_string()]
        );
    }
}
