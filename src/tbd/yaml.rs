//! Decides whether a string must be single-quoted in the emitted stub.

/// A conservative check: anything a YAML plain scalar could misread gets
/// quoted. Over-quoting is harmless; under-quoting corrupts the document.
pub fn needs_quotes(string: &str) -> bool {
    let first = match string.chars().next() {
        Some(first) => first,
        None => return true,
    };

    if matches!(
        first,
        '!' | '&' | '*' | '-' | '?' | ':' | ',' | '[' | ']' | '{' | '}' | '#' | '|' | '>'
            | '@' | '`' | '"' | '\'' | '%' | '~' | ' ' | '\t'
    ) {
        return true;
    }

    if string.ends_with(' ') || string.ends_with('\t') || string.ends_with(':') {
        return true;
    }

    for ch in string.chars() {
        match ch {
            '[' | ']' | '{' | '}' | ',' | '#' | '"' | '\'' | '`' => return true,
            ch if ch.is_control() => return true,
            _ => {}
        }
    }

    string.contains(": ") || string.contains(" #")
}

#[test]
fn plain_symbols_stay_plain() {
    assert!(!needs_quotes("_foo"));
    assert!(!needs_quotes("/usr/lib/libSystem.B.dylib"));
    assert!(!needs_quotes("_OBJC_CLASS_$_NSObject"));
    assert!(!needs_quotes("_$ld$hide$os10.9$_foo"));
}

#[test]
fn indicators_get_quoted() {
    assert!(needs_quotes(""));
    assert!(needs_quotes("-leading-dash"));
    assert!(needs_quotes("*star"));
    assert!(needs_quotes(" leading-space"));
    assert!(needs_quotes("trailing-space "));
    assert!(needs_quotes("trailing-colon:"));
}

#[test]
fn flow_characters_get_quoted() {
    assert!(needs_quotes("a,b"));
    assert!(needs_quotes("a[0]"));
    assert!(needs_quotes("a: b"));
    assert!(needs_quotes("a #comment"));
    assert!(needs_quotes("it's"));
}
