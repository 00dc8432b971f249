use lox_lexer::{Scanner, TokenType};
use proptest::prelude::*;

fn drain(src: &str) -> Vec<TokenType> {
    let mut sc = Scanner::new(src);
    let mut out = Vec::new();
    loop {
        let t = sc.scan_token();
        let eof = t.kind == TokenType::Eof;
        out.push(t.kind);
        if eof { break; }
    }
    out
}

proptest! {
    // The scanner must terminate with Eof on any input, without panicking.
    #[test]
    fn any_input_terminates(src in ".*") {
        let ks = drain(&src);
        prop_assert_eq!(*ks.last().unwrap(), TokenType::Eof);
    }

    #[test]
    fn identifiers_scan_as_single_token(name in "[A-Za-z_][A-Za-z0-9_]{0,20}") {
        let ks = drain(&name);
        prop_assert_eq!(ks.len(), 2);
        prop_assert!(ks[0] != TokenType::Error);
    }

    #[test]
    fn numbers_scan_as_single_token(n in 0u32..1_000_000, frac in 0u32..1000) {
        let src = format!("{}.{:03}", n, frac);
        let ks = drain(&src);
        prop_assert_eq!(ks, vec![TokenType::Number, TokenType::Eof]);
    }

    #[test]
    fn line_numbers_never_decrease(src in ".*") {
        let mut sc = Scanner::new(&src);
        let mut last = 1;
        loop {
            let t = sc.scan_token();
            prop_assert!(t.line >= last);
            last = t.line;
            if t.kind == TokenType::Eof { break; }
        }
    }
}
