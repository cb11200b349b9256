//! # グルーコードのエクスポート検査
//!
//! 書き換え後のグルーコードに、契約で宣言されたエクスポートが
//! テキストとして存在することを確認する。
//!
//! - 関数: `export function <sym>` / `export async function <sym>` /
//!   `export const <sym>` / `export { ..<sym>.. }`
//! - メモリ・値: グルーコード中に単語として出現すること

use std::collections::BTreeSet;

use wasmlab_types::{ExportContract, ExportKind};

use crate::scan::{find_word, is_ident_byte, skip_ws};

fn read_ident(src: &str, pos: usize) -> Option<(&str, usize)> {
    let start = skip_ws(src, pos);
    let bytes = src.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    (end > start).then(|| (&src[start..end], end))
}

/// `export { a, b as c }` の中身から公開名を取り出す。
fn export_list(body: &str, names: &mut BTreeSet<String>) {
    for item in body.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let public = match item.rsplit_once(" as ") {
            Some((_, alias)) => alias.trim(),
            None => item,
        };
        names.insert(public.trim_matches(|c| c == '"' || c == '\'').to_string());
    }
}

/// ESモジュールが公開する名前を列挙する。
pub fn exported_names(src: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut pos = 0;

    while let Some(at) = find_word(src, "export", pos) {
        pos = at + "export".len();
        let after = skip_ws(src, pos);

        if src.as_bytes().get(after) == Some(&b'{') {
            if let Some(close) = src[after..].find('}') {
                export_list(&src[after + 1..after + close], &mut names);
                pos = after + close + 1;
            }
            continue;
        }

        let Some((word, mut next)) = read_ident(src, after) else {
            continue;
        };
        let mut keyword = word;
        if keyword == "async" {
            let Some((w, n)) = read_ident(src, next) else {
                continue;
            };
            keyword = w;
            next = n;
        }
        match keyword {
            "default" => {
                names.insert("default".to_string());
            }
            "function" | "const" | "let" | "var" | "class" => {
                // ジェネレータ関数
                let star = skip_ws(src, next);
                if src.as_bytes().get(star) == Some(&b'*') {
                    next = star + 1;
                }
                if let Some((name, end)) = read_ident(src, next) {
                    names.insert(name.to_string());
                    pos = end;
                }
            }
            _ => {}
        }
    }

    names
}

/// グルーコードに見つからない契約シンボルを契約順に返す。
pub fn missing_exports(glue: &str, contract: &ExportContract) -> Vec<String> {
    let exported = exported_names(glue);
    contract
        .exports()
        .iter()
        .filter(|spec| match spec.kind {
            ExportKind::Function { .. } => !exported.contains(&spec.symbol),
            ExportKind::Memory | ExportKind::Value => find_word(glue, &spec.symbol, 0).is_none(),
        })
        .map(|spec| spec.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmlab_types::{ExportSpec, ModuleIdentity};

    #[test]
    fn test_exported_names() {
        let src = r#"
            export function get_counter() {}
            export async function run() {}
            export function* items() {}
            export const VERSION = 1;
            function a() {} function b() {}
            export { a, b as renamed };
            export default __wbg_init;
            const exported = 1;
        "#;
        let names = exported_names(src);
        let expected: BTreeSet<String> = [
            "get_counter",
            "run",
            "items",
            "VERSION",
            "a",
            "renamed",
            "default",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_missing_exports_in_contract_order() {
        let contract = ExportContract::new(
            ModuleIdentity::new("m").unwrap(),
            vec![
                ExportSpec::function("present", None),
                ExportSpec::function("absent", Some(0)),
                ExportSpec::memory("memory"),
                ExportSpec::value("TABLE_SIZE"),
            ],
        )
        .unwrap();
        let glue = "export function present() { return wasm.memory.buffer; }\nfunction absent() {}";
        assert_eq!(
            missing_exports(glue, &contract),
            vec!["absent".to_string(), "TABLE_SIZE".to_string()]
        );
    }
}
