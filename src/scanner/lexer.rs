use winnow::combinator::alt;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::stream::{LocatingSlice, Location};
use winnow::token::{any, take_while};

use crate::error::CompileError;
use crate::scanner::token::{Literal, Span, Token, TokenKind, keyword_kind};

type Input<'a> = LocatingSlice<&'a str>;

fn whitespace_and_comments(input: &mut Input<'_>) -> ModalResult<()> {
    loop {
        let before = input.current_token_start();
        take_while(0.., |c: char| {
            c == ' ' || c == '\t' || c == '\r' || c == '\n'
        })
        .void()
        .parse_next(input)?;

        if input.starts_with("//") {
            take_while(0.., |c: char| c != '\n')
                .void()
                .parse_next(input)?;
        } else if input.current_token_start() == before {
            break;
        }
    }
    Ok(())
}

/// Double-quoted string. May span newlines; no escape sequences, so a
/// backslash is an ordinary character. Fails only on a missing close quote.
fn string_literal(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    '"'.parse_next(input)?;
    let contents: &str = take_while(0.., |c: char| c != '"').parse_next(input)?;
    let contents = contents.to_string();
    '"'.parse_next(input)?;
    let end = input.current_token_start();
    let span = Span::new(start, end - start);
    let lexeme = format!("\"{contents}\"");
    Ok(Token::new(TokenKind::String, lexeme, span).with_literal(Literal::Str(contents)))
}

fn number_literal(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let whole: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let mut lexeme = whole.to_string();

    let checkpoint = input.checkpoint();
    let dot_result: Result<char, winnow::error::ErrMode<ContextError>> = '.'.parse_next(input);
    if dot_result.is_ok() {
        match take_while::<_, _, ContextError>(1.., |c: char| c.is_ascii_digit()).parse_next(input)
        {
            Ok(frac) => {
                lexeme.push('.');
                lexeme.push_str(frac);
            }
            Err(_) => {
                input.reset(&checkpoint);
            }
        }
    }

    let end = input.current_token_start();
    let value: f64 = lexeme.parse().expect("digits always parse as f64");
    Ok(
        Token::new(TokenKind::Number, lexeme, Span::new(start, end - start))
            .with_literal(Literal::Number(value)),
    )
}

fn identifier_or_keyword(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let first: char = any
        .verify(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .parse_next(input)?;
    let rest: &str =
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)?;
    let end = input.current_token_start();
    let mut lexeme = String::with_capacity(1 + rest.len());
    lexeme.push(first);
    lexeme.push_str(rest);
    let kind = keyword_kind(&lexeme).unwrap_or(TokenKind::Identifier);
    let token = Token::new(kind, lexeme, Span::new(start, end - start));
    Ok(match kind {
        TokenKind::True => token.with_literal(Literal::Bool(true)),
        TokenKind::False => token.with_literal(Literal::Bool(false)),
        TokenKind::Nil => token.with_literal(Literal::Nil),
        _ => token,
    })
}

fn two_char_token(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let (kind, lexeme) = alt((
        "!=".value((TokenKind::BangEqual, "!=")),
        "==".value((TokenKind::EqualEqual, "==")),
        ">=".value((TokenKind::GreaterEqual, ">=")),
        "<=".value((TokenKind::LessEqual, "<=")),
    ))
    .parse_next(input)?;
    Ok(Token::new(kind, lexeme, Span::new(start, 2)))
}

fn single_char_token(input: &mut Input<'_>) -> ModalResult<Token> {
    let start = input.current_token_start();
    let c = any
        .verify(|c: &char| "(){}.,;-+/*!=<>".contains(*c))
        .parse_next(input)?;
    let kind = match c {
        '(' => TokenKind::LeftParen,
        ')' => TokenKind::RightParen,
        '{' => TokenKind::LeftBrace,
        '}' => TokenKind::RightBrace,
        ',' => TokenKind::Comma,
        '.' => TokenKind::Dot,
        '-' => TokenKind::Minus,
        '+' => TokenKind::Plus,
        ';' => TokenKind::Semicolon,
        '/' => TokenKind::Slash,
        '*' => TokenKind::Star,
        '!' => TokenKind::Bang,
        '=' => TokenKind::Equal,
        '<' => TokenKind::Less,
        '>' => TokenKind::Greater,
        _ => unreachable!("verify guarantees valid char"),
    };
    Ok(Token::new(kind, c.to_string(), Span::new(start, 1)))
}

fn scan_token(input: &mut Input<'_>) -> ModalResult<Token> {
    alt((
        number_literal,
        identifier_or_keyword,
        two_char_token,
        single_char_token,
    ))
    .parse_next(input)
}

/// Annotate tokens with 1-based line numbers. Tokens arrive in strictly
/// increasing source position, so one forward pass over the source suffices.
fn assign_lines(source: &str, tokens: &mut [Token]) {
    let mut line = 1;
    let mut pos = 0;
    for token in tokens {
        let target = token.span.offset.min(source.len());
        line += source[pos..target].bytes().filter(|&b| b == b'\n').count();
        pos = target;
        token.line = line;
    }
}

/// Scan all tokens from source, returning either a token list terminated by
/// `Eof` or the scan errors collected along the way.
pub fn scan_all(source: &str) -> Result<Vec<Token>, Vec<CompileError>> {
    let mut input = LocatingSlice::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    loop {
        if whitespace_and_comments(&mut input).is_err() {
            break;
        }
        if input.is_empty() {
            break;
        }
        // Strings are dispatched up front: string_literal only fails on a
        // missing close quote, after swallowing the rest of the input
        if input.starts_with("\"") {
            let start = input.current_token_start();
            match string_literal(&mut input) {
                Ok(token) => tokens.push(token),
                Err(_) => {
                    errors.push(CompileError::scan(
                        "unterminated string",
                        Span::new(start, source.len() - start),
                    ));
                    break;
                }
            }
            continue;
        }
        match scan_token(&mut input) {
            Ok(token) => tokens.push(token),
            Err(_) => {
                let offset = input.current_token_start();
                let c = any::<_, ContextError>.parse_next(&mut input).ok();
                let ch = c.unwrap_or('?');
                errors.push(CompileError::scan(
                    format!("unexpected character '{ch}'"),
                    Span::new(offset, ch.len_utf8()),
                ));
            }
        }
    }

    tokens.push(Token::new(
        TokenKind::Eof,
        "",
        Span::new(source.len(), 0),
    ));
    assign_lines(source, &mut tokens);

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_ok(source: &str) -> Vec<Token> {
        scan_all(source).expect("scan should succeed")
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn single_char_tokens() {
        let tokens = scan_ok("(){},.-+;/*");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Semicolon,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_tokens() {
        let tokens = scan_ok("!= == >= <=");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::BangEqual,
                TokenKind::EqualEqual,
                TokenKind::GreaterEqual,
                TokenKind::LessEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn single_then_equal() {
        let tokens = scan_ok("! = < >");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Bang,
                TokenKind::Equal,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_literal_keeps_raw_lexeme() {
        let tokens = scan_ok("\"hello world\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "\"hello world\"");
        assert_eq!(tokens[0].string(), Some("hello world"));
    }

    #[test]
    fn string_has_no_escapes() {
        // backslash-n stays two characters
        let tokens = scan_ok(r#""a\nb""#);
        assert_eq!(tokens[0].string(), Some(r"a\nb"));
    }

    #[test]
    fn string_spans_newlines() {
        let tokens = scan_ok("\"one\ntwo\"");
        assert_eq!(tokens[0].string(), Some("one\ntwo"));
        assert_eq!(tokens[0].line, 1);
        // EOF lands on line 2
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn number_integer() {
        let tokens = scan_ok("42");
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, "42");
        assert_eq!(tokens[0].number(), Some(42.0));
    }

    #[test]
    fn number_decimal() {
        let tokens = scan_ok("3.14");
        assert_eq!(tokens[0].lexeme, "3.14");
        assert_eq!(tokens[0].number(), Some(3.14));
    }

    #[test]
    fn number_no_trailing_dot() {
        let tokens = scan_ok("42.foo");
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, "42");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn number_no_leading_dot() {
        let tokens = scan_ok(".5");
        assert_eq!(tokens[0].kind, TokenKind::Dot);
        assert_eq!(tokens[1].kind, TokenKind::Number);
        assert_eq!(tokens[1].lexeme, "5");
    }

    #[test]
    fn identifiers_and_keywords() {
        let tokens = scan_ok("var x = true");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::True,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[3].literal, Some(Literal::Bool(true)));
    }

    #[test]
    fn all_keywords() {
        let source =
            "and class else false fun for if nil or print return super this true var while";
        let tokens = scan_ok(source);
        let expected = vec![
            TokenKind::And,
            TokenKind::Class,
            TokenKind::Else,
            TokenKind::False,
            TokenKind::Fun,
            TokenKind::For,
            TokenKind::If,
            TokenKind::Nil,
            TokenKind::Or,
            TokenKind::Print,
            TokenKind::Return,
            TokenKind::Super,
            TokenKind::This,
            TokenKind::True,
            TokenKind::Var,
            TokenKind::While,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(&tokens), expected);
    }

    #[test]
    fn comments_ignored() {
        let tokens = scan_ok("var x // this is a comment\nvar y");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn spans_are_correct() {
        let tokens = scan_ok("var x = 42;");
        assert_eq!(tokens[0].span, Span::new(0, 3)); // var
        assert_eq!(tokens[1].span, Span::new(4, 1)); // x
        assert_eq!(tokens[2].span, Span::new(6, 1)); // =
        assert_eq!(tokens[3].span, Span::new(8, 2)); // 42
        assert_eq!(tokens[4].span, Span::new(10, 1)); // ;
    }

    #[test]
    fn line_numbers_track_newlines() {
        let tokens = scan_ok("var x = 1;\nvar y = 2;\n\nprint x;");
        let vars: Vec<usize> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Var)
            .map(|t| t.line)
            .collect();
        assert_eq!(vars, vec![1, 2]);
        let print = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Print)
            .expect("print token");
        assert_eq!(print.line, 4);
    }

    #[test]
    fn lexemes_reconstruct_source() {
        // concatenating lexemes padded with the original whitespace gives
        // back the source
        let source = "var greeting = \"hi\"; print greeting;";
        let tokens = scan_ok(source);
        let mut rebuilt = String::new();
        let mut pos = 0;
        for token in tokens.iter().filter(|t| t.kind != TokenKind::Eof) {
            rebuilt.push_str(&source[pos..token.span.offset]);
            rebuilt.push_str(&token.lexeme);
            pos = token.span.offset + token.span.len;
        }
        rebuilt.push_str(&source[pos..]);
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn unexpected_character_error() {
        let result = scan_all("var x = @;");
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains('@'));
    }

    #[test]
    fn unterminated_string_error() {
        let result = scan_all("\"unterminated");
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("unterminated string"));
    }

    #[test]
    fn multiple_errors_collected() {
        let result = scan_all("var @ = #;");
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn multiline_program() {
        let source = "var x = 1;\nvar y = 2;\nprint x + y;";
        let tokens = scan_ok(source);
        assert_eq!(tokens.len(), 16); // 15 tokens + EOF
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    }
}
