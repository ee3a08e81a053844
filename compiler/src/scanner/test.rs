use crate::scanner::{CharSource, Scanner, StrCharSource};
use crate::token::{Argument, Symbol};

fn scan_all(source: &str) -> Vec<Symbol> {
    let mut scanner = Scanner::new(StrCharSource::new(source));
    let mut symbols = vec![scanner.current_symbol];
    while scanner.advance() {
        symbols.push(scanner.current_symbol);
    }
    symbols
}

#[test]
fn keywords_and_punctuators() {
    let symbols = scan_all("if (x) { y = 1; }");
    assert_eq!(
        symbols,
        vec![
            Symbol::If,
            Symbol::LeftParen,
            Symbol::Name,
            Symbol::RightParen,
            Symbol::LeftBrace,
            Symbol::Name,
            Symbol::Assign,
            Symbol::Numeral,
            Symbol::Semicolon,
            Symbol::RightBrace,
            Symbol::EndOfText,
        ]
    );
}

#[test]
fn digraphs_are_disambiguated() {
    assert_eq!(scan_all("== != <= >= ->"), vec![
        Symbol::Equal,
        Symbol::NotEqual,
        Symbol::LessOrEqual,
        Symbol::GreaterOrEqual,
        Symbol::Arrow,
        Symbol::EndOfText,
    ]);
    assert_eq!(scan_all("= ! < >"), vec![
        Symbol::Assign,
        Symbol::Bang,
        Symbol::Less,
        Symbol::Greater,
        Symbol::EndOfText,
    ]);
}

#[test]
fn word_table_is_monotonic_and_stable() {
    let mut scanner = Scanner::new(StrCharSource::new("foo bar foo"));
    assert_eq!(scanner.current_symbol, Symbol::Name);
    let foo_index = scanner.argument.word_index();

    scanner.advance();
    assert_eq!(scanner.current_symbol, Symbol::Name);
    let bar_index = scanner.argument.word_index();
    assert_ne!(foo_index, bar_index);

    scanner.advance();
    assert_eq!(scanner.current_symbol, Symbol::Name);
    assert_eq!(scanner.argument.word_index(), foo_index);
}

#[test]
fn end_of_line_comment_is_skipped() {
    let symbols = scan_all("x $ this is a comment\ny");
    assert_eq!(symbols, vec![Symbol::Name, Symbol::Name, Symbol::EndOfText]);
}

#[test]
fn line_number_tracks_newlines() {
    let mut scanner = Scanner::new(StrCharSource::new("x\ny\nz"));
    assert_eq!(scanner.line_number, 1);
    scanner.advance();
    assert_eq!(scanner.line_number, 2);
    scanner.advance();
    assert_eq!(scanner.line_number, 3);
}

#[test]
fn numeral_out_of_range_is_a_sentinel() {
    let mut scanner = Scanner::new(StrCharSource::new("99999999999999999999"));
    assert_eq!(scanner.current_symbol, Symbol::IntegerOutOfBounds);
}

#[test]
fn unrecognised_character_is_unknown_and_resyncs_at_next_delimiter() {
    let symbols = scan_all("x ` y");
    assert_eq!(symbols, vec![Symbol::Name, Symbol::Unknown, Symbol::Name, Symbol::EndOfText]);
}

#[test]
fn advance_returns_false_only_after_end_of_text() {
    let mut scanner = Scanner::new(StrCharSource::new("x"));
    assert_eq!(scanner.current_symbol, Symbol::Name);
    assert_eq!(scanner.advance(), false);
    assert_eq!(scanner.current_symbol, Symbol::EndOfText);
}

#[test]
fn numeral_argument_carries_value() {
    let scanner = Scanner::new(StrCharSource::new("12345"));
    assert_eq!(scanner.current_symbol, Symbol::Numeral);
    assert_eq!(scanner.argument, Argument::Value(12345));
}
