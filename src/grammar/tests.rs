use super::*;

#[test]
fn test_default_grammar_tokenizes_on_whitespace() {
    let g = Grammar::default();
    assert_eq!(g.tokenize(b"alpha beta\n"), vec![&b"alpha"[..], b"beta"]);
    assert_eq!(
        g.tokenize(b"delta epsilon zeta\n"),
        vec![&b"delta"[..], b"epsilon", b"zeta"]
    );
    // Runs of mixed whitespace collapse; empty tokens are suppressed.
    assert_eq!(g.tokenize(b"  a \t b  \n"), vec![&b"a"[..], b"b"]);
    assert!(g.tokenize(b"   \t \n").is_empty());
}

#[test]
fn test_custom_delimiters() {
    let g = Grammar::new(true, Some(" ,"), None).unwrap();
    assert_eq!(g.tokenize(b"one, two\n"), vec![&b"one"[..], b"two"]);
    // The terminator is stripped before splitting, so the last cell is clean
    // even though newline is not a delimiter.
    assert_eq!(g.tokenize(b"three\n"), vec![&b"three"[..]]);
    assert_eq!(g.tokenize(b"three\r\n"), vec![&b"three"[..]]);
}

#[test]
fn test_blank_detection() {
    assert!(is_blank(b"\n"));
    assert!(is_blank(b" \t\r\n"));
    assert!(is_blank(b"\x0c\n"));
    assert!(is_blank(b""));
    assert!(!is_blank(b" x \n"));
    // Vertical tab is not in the whitespace set.
    assert!(!is_blank(b"\x0b\n"));
}

#[test]
fn test_comment_matching() {
    let g = Grammar::new(true, None, Some("#")).unwrap();
    assert!(g.is_comment(b"# header line\n"));
    assert!(!g.is_comment(b" # indented\n"));
    assert!(!Grammar::default().is_comment(b"# anything\n"));
}

#[test]
fn test_classification() {
    let g = Grammar::new(true, Some(" ,"), Some("#")).unwrap();
    assert_eq!(g.classify(b"# header line\n"), LineClass::Comment);
    assert_eq!(g.classify(b"\n"), LineClass::Blank);
    assert_eq!(g.classify(b"one, two\n"), LineClass::Ledgerable);
    // With blank-skipping off, a blank line is ledgerable (zero cells).
    let keep = g.with_skip_blank_lines(false);
    assert_eq!(keep.classify(b"\n"), LineClass::Ledgerable);
}

#[test]
fn test_invalid_delimiter_sets() {
    assert!(matches!(
        Grammar::new(true, Some(""), None),
        Err(crate::common::LedgerError::GrammarInvalid(_))
    ));
    let long = "x".repeat(MAX_TOKEN_CHARS + 1);
    assert!(Grammar::new(true, Some(&long), None).is_err());
    assert!(Grammar::new(true, Some("é"), None).is_err());
    assert!(Grammar::new(true, None, Some("")).is_err());
}

#[test]
fn test_mutators_return_new_values() {
    let base = Grammar::default();
    let g = base
        .clone()
        .with_token_delimiters(Some(";"))
        .unwrap()
        .with_comment_prefix(Some("//"))
        .unwrap();
    assert_eq!(base.token_delimiters(), None);
    assert_eq!(g.token_delimiters(), Some(";"));
    assert_eq!(g.comment_prefix(), Some(&b"//"[..]));
}

#[test]
fn test_strip_eol() {
    assert_eq!(strip_eol(b"abc\n"), b"abc");
    assert_eq!(strip_eol(b"abc\r\n"), b"abc");
    assert_eq!(strip_eol(b"abc"), b"abc");
    assert_eq!(strip_eol(b"\n"), b"");
}
