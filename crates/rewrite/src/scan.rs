//! # JavaScriptトークン走査
//!
//! 書き換え規則が必要とする最小限の構文だけを認識するカーソル関数群。
//! 文字列リテラル、空白、識別子境界、括弧の対応を扱う。
//! 位置は全てバイトオフセットで、ASCIIの区切り文字上でのみ分割する。

/// 文字列リテラル（`'...'`, `"..."`, `` `...` ``）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StringLiteral<'a> {
    pub quote: u8,
    /// クォートを除いた中身
    pub value: &'a str,
    /// 開きクォートの位置
    pub start: usize,
    /// 閉じクォートの直後
    pub end: usize,
}

/// 動的インポート式 `import(<literal>)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DynamicImport<'a> {
    /// `import`の先頭位置
    pub start: usize,
    /// 閉じ括弧の直後
    pub end: usize,
    pub literal: StringLiteral<'a>,
}

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// 空白を読み飛ばした位置を返す。
pub(crate) fn skip_ws(src: &str, mut pos: usize) -> usize {
    let bytes = src.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// 空白の後に`token`が続く場合、その直後の位置を返す。
pub(crate) fn expect(src: &str, pos: usize, token: &str) -> Option<usize> {
    let pos = skip_ws(src, pos);
    src.get(pos..)?
        .starts_with(token)
        .then_some(pos + token.len())
}

/// `from`以降で、識別子境界に囲まれた`word`の出現位置を返す。空の`word`には一致しない。
pub(crate) fn find_word(src: &str, word: &str, from: usize) -> Option<usize> {
    if word.is_empty() {
        return None;
    }
    let bytes = src.as_bytes();
    let mut pos = from;
    while let Some(offset) = src.get(pos..)?.find(word) {
        let at = pos + offset;
        let end = at + word.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        pos = at + 1;
    }
    None
}

/// JavaScriptの識別子として有効か（ASCII範囲外の文字は許容する）。
pub(crate) fn is_identifier(name: &str) -> bool {
    name.bytes().all(is_ident_byte) && name.bytes().next().is_some_and(|b| !b.is_ascii_digit())
}

/// 直前の空白以外の文字がメンバーアクセス（`.`）かどうか。
pub(crate) fn is_member_access(src: &str, at: usize) -> bool {
    src.as_bytes()[..at]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'.')
}

/// `pos`（空白を読み飛ばした後）から始まる文字列リテラルを読む。
///
/// 補間を含むテンプレートリテラルは静的なパスではないため認識しない。
pub(crate) fn string_literal(src: &str, pos: usize) -> Option<StringLiteral<'_>> {
    let bytes = src.as_bytes();
    let start = skip_ws(src, pos);
    let quote = *bytes.get(start)?;
    if !matches!(quote, b'\'' | b'"' | b'`') {
        return None;
    }

    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return None,
            b'$' if quote == b'`' && bytes.get(i + 1) == Some(&b'{') => return None,
            b if b == quote => {
                return Some(StringLiteral {
                    quote,
                    value: &src[start + 1..i],
                    start,
                    end: i + 1,
                });
            }
            _ => i += 1,
        }
    }
    None
}

/// `at`から始まる `import ( <literal> )` を読む。
pub(crate) fn dynamic_import(src: &str, at: usize) -> Option<DynamicImport<'_>> {
    if !src.get(at..)?.starts_with("import") || is_member_access(src, at) {
        return None;
    }
    let open = expect(src, at + "import".len(), "(")?;
    let literal = string_literal(src, open)?;
    let end = expect(src, literal.end, ")")?;
    Some(DynamicImport {
        start: at,
        end,
        literal,
    })
}

/// 引数1つ分を読み飛ばし、深さ0の`,`または`)`の位置を返す。
///
/// 入れ子の括弧と文字列リテラルを考慮する。
pub(crate) fn argument_end(src: &str, pos: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut i = pos;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth > 0 => depth -= 1,
            b')' | b',' if depth == 0 => return Some(i),
            b']' | b'}' => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

/// クォート位置から文字列を読み飛ばし、閉じクォートの直後を返す（補間の中身は解析しない）。
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// リテラルを指定のクォートで書き出す。
pub(crate) fn push_literal(out: &mut String, quote: u8, value: &str) {
    out.push(quote as char);
    out.push_str(value);
    out.push(quote as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_word_respects_boundaries() {
        let src = "reimport(x); import_x; obj.import; import(";
        assert_eq!(find_word(src, "import", 0), Some(27));
        assert!(is_member_access(src, 27));
        assert_eq!(find_word(src, "import", 28), Some(35));
        assert!(!is_member_access(src, 35));
        assert_eq!(find_word("wasm.memory.buffer", "memory", 0), Some(5));
        assert_eq!(find_word("memoryA", "memory", 0), None);
        assert_eq!(find_word("a b", "", 0), None);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("__vitePreload"));
        assert!(is_identifier("$preload1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1preload"));
        assert!(!is_identifier("pre load"));
        assert!(!is_identifier("a.b"));
    }

    #[test]
    fn test_string_literal_quotes() {
        let lit = string_literal(r#"  "a\"b" rest"#, 0).unwrap();
        assert_eq!(lit.value, r#"a\"b"#);
        assert_eq!(lit.quote, b'"');
        assert_eq!(lit.start, 2);

        assert_eq!(string_literal("'x'", 0).unwrap().value, "x");
        assert_eq!(string_literal("`x`", 0).unwrap().value, "x");
        assert!(string_literal("`${dir}/x.js`", 0).is_none());
        assert!(string_literal("ident", 0).is_none());
        assert!(string_literal("'unterminated", 0).is_none());
    }

    #[test]
    fn test_dynamic_import() {
        let src = r#"const m = await import ( "../pkg/a/a.js" );"#;
        let at = find_word(src, "import", 0).unwrap();
        let expr = dynamic_import(src, at).unwrap();
        assert_eq!(expr.literal.value, "../pkg/a/a.js");
        assert_eq!(&src[expr.end..], ";");

        assert!(dynamic_import("loader.import('x')", 7).is_none());
        assert!(dynamic_import("import x from 'y'", 0).is_none());
        assert!(dynamic_import("import(path)", 0).is_none());
    }

    #[test]
    fn test_argument_end() {
        let src = "__vite__mapDeps([0,1]), import.meta.url)";
        let first = argument_end(src, 0).unwrap();
        assert_eq!(&src[first..first + 1], ",");
        let second = argument_end(src, first + 1).unwrap();
        assert_eq!(&src[second..], ")");

        assert_eq!(argument_end("[\")\", ','])", 0), Some(10));
        assert_eq!(argument_end("[1, 2", 0), None);
    }
}
