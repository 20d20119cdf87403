//! The `directive` module parses the `extauth` directive block format.
//!
//! ```text
//! extauth https://auth.internal:9000
//!
//! extauth {
//!     proxy https://auth.internal:9000
//!     cookies false
//!     headers true
//!     timeout 5s
//!     insecure_skip_verify
//!     router
//! }
//! ```
//!
//! Tokens are separated by whitespace. A sub-directive's arguments are the tokens on the same line. Double quotes
//! group a token containing whitespace and `#` starts a comment that runs to the end of the line.

use crate::{normalize_endpoint, parse_duration, DirectiveError, ExtAuth};

/// The name of the only top-level directive.
pub const DIRECTIVE_NAME: &str = "extauth";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    line: usize,
}

/// Parses one or more `extauth` directives into an [`ExtAuth`] configuration.
///
/// Later directives update the configuration produced by earlier ones. Unset options take their defaults.
pub fn parse(input: &str) -> Result<ExtAuth, DirectiveError> {
    let tokens = tokenize(input)?;
    let mut ext_auth = ExtAuth::default();
    let mut cursor = 0;

    while cursor < tokens.len() {
        let directive = &tokens[cursor];
        if directive.text != DIRECTIVE_NAME {
            return Err(DirectiveError::Unexpected {
                line: directive.line,
                token: directive.text.clone(),
            });
        }
        cursor += 1;

        let mut args = Vec::new();
        let mut opens_block = false;
        while cursor < tokens.len() && tokens[cursor].line == directive.line {
            if tokens[cursor].text == "{" {
                opens_block = true;
                cursor += 1;
                break;
            }
            args.push(&tokens[cursor]);
            cursor += 1;
        }

        match args.as_slice() {
            [] => {}
            [proxy] => ext_auth.proxy = proxy.text.clone(),
            _ => {
                return Err(DirectiveError::ArgumentCount {
                    line: directive.line,
                    token: directive.text.clone(),
                })
            }
        }

        if opens_block {
            if cursor < tokens.len() && tokens[cursor].line == directive.line {
                return Err(DirectiveError::Unexpected {
                    line: tokens[cursor].line,
                    token: tokens[cursor].text.clone(),
                });
            }
            cursor = parse_block(&tokens, cursor, directive.line, &mut ext_auth)?;
        }
    }

    ext_auth.proxy = normalize_endpoint(&ext_auth.proxy);
    if ext_auth.proxy.is_empty() {
        return Err(DirectiveError::MissingEndpoint);
    }
    Ok(ext_auth)
}

/// Applies every sub-directive up to the closing brace, returning the cursor position after it.
fn parse_block(
    tokens: &[Token],
    mut cursor: usize,
    opened_on: usize,
    ext_auth: &mut ExtAuth,
) -> Result<usize, DirectiveError> {
    loop {
        let Some(name) = tokens.get(cursor) else {
            return Err(DirectiveError::UnclosedBlock { line: opened_on });
        };
        cursor += 1;

        let mut args: Vec<&Token> = Vec::new();
        while cursor < tokens.len() && tokens[cursor].line == name.line {
            args.push(&tokens[cursor]);
            cursor += 1;
        }

        if name.text == "}" {
            if let Some(extra) = args.first() {
                return Err(DirectiveError::Unexpected {
                    line: extra.line,
                    token: extra.text.clone(),
                });
            }
            return Ok(cursor);
        }
        if let Some(brace) = args.iter().find(|arg| arg.text == "{" || arg.text == "}") {
            return Err(DirectiveError::Unexpected {
                line: brace.line,
                token: brace.text.clone(),
            });
        }

        match name.text.as_str() {
            "router" => {
                expect_args(name, &args, 0)?;
                ext_auth.router = true;
            }
            "insecure_skip_verify" => {
                expect_args(name, &args, 0)?;
                ext_auth.insecure_skip_verify = true;
            }
            "proxy" => {
                expect_args(name, &args, 1)?;
                ext_auth.proxy = args[0].text.clone();
            }
            "cookies" => {
                expect_args(name, &args, 1)?;
                ext_auth.cookies = parse_bool(name, args[0])?;
            }
            "headers" => {
                expect_args(name, &args, 1)?;
                ext_auth.headers = parse_bool(name, args[0])?;
            }
            "timeout" => {
                expect_args(name, &args, 1)?;
                ext_auth.timeout = parse_duration(&args[0].text).map_err(|source| {
                    DirectiveError::InvalidTimeout {
                        line: name.line,
                        source,
                    }
                })?;
            }
            _ => {
                return Err(DirectiveError::Unsupported {
                    line: name.line,
                    directive: name.text.clone(),
                })
            }
        }
    }
}

fn expect_args(name: &Token, args: &[&Token], expected: usize) -> Result<(), DirectiveError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(DirectiveError::ArgumentCount {
            line: name.line,
            token: name.text.clone(),
        })
    }
}

/// Accepts the same spellings as Go's `strconv.ParseBool`.
fn parse_bool(name: &Token, value: &Token) -> Result<bool, DirectiveError> {
    match value.text.as_str() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(DirectiveError::InvalidBool {
            line: value.line,
            directive: name.text.clone(),
            value: value.text.clone(),
        }),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, DirectiveError> {
    let mut tokens = Vec::new();
    for (index, raw_line) in input.lines().enumerate() {
        let line = index + 1;
        let mut chars = raw_line.chars().peekable();
        let mut current = String::new();
        let mut quoted = false;
        let mut was_quoted = false;

        while let Some(c) = chars.next() {
            match c {
                '"' if quoted => {
                    quoted = false;
                }
                '"' if current.is_empty() => {
                    quoted = true;
                    was_quoted = true;
                }
                '\\' if quoted => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                '#' if !quoted && current.is_empty() => break,
                c if c.is_whitespace() && !quoted => {
                    if !current.is_empty() || was_quoted {
                        tokens.push(Token {
                            text: std::mem::take(&mut current),
                            line,
                        });
                        was_quoted = false;
                    }
                }
                c => current.push(c),
            }
        }
        if quoted {
            return Err(DirectiveError::Unexpected {
                line,
                token: format!("\"{}", current),
            });
        }
        if !current.is_empty() || was_quoted {
            tokens.push(Token {
                text: current,
                line,
            });
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_basic_parse() -> Result<(), Box<dyn std::error::Error>> {
        let ext_auth = parse("extauth https://testserver:9000")?;
        assert_eq!(ext_auth.proxy, "https://testserver:9000");
        assert!(ext_auth.headers);
        assert!(ext_auth.cookies);
        assert_eq!(ext_auth.timeout, Duration::from_secs(30));
        assert!(!ext_auth.router);
        assert!(!ext_auth.insecure_skip_verify);

        Ok(())
    }

    #[test]
    fn test_block_parse() -> Result<(), Box<dyn std::error::Error>> {
        let ext_auth = parse("extauth {\nproxy https://testserver:9000\n}")?;
        assert_eq!(ext_auth.proxy, "https://testserver:9000");
        assert!(ext_auth.headers);
        assert!(ext_auth.cookies);

        let ext_auth = parse("extauth {\nproxy testserver:9000\n}")?;
        assert_eq!(ext_auth.proxy, "http://testserver:9000");

        let ext_auth =
            parse("extauth {\nproxy https://testserver:9000\ncookies false\nheaders false\n}")?;
        assert!(!ext_auth.headers);
        assert!(!ext_auth.cookies);
        assert!(!ext_auth.router);

        Ok(())
    }

    #[test]
    fn test_all_options() -> Result<(), Box<dyn std::error::Error>> {
        let ext_auth = parse(
            r#"
            # verification service on the private network
            extauth {
                proxy https://testserver:9000
                cookies false
                headers F
                timeout 60s
                insecure_skip_verify
                router
            }
            "#,
        )?;
        assert_eq!(
            ext_auth,
            ExtAuth {
                proxy: "https://testserver:9000".to_string(),
                headers: false,
                cookies: false,
                timeout: Duration::from_secs(60),
                insecure_skip_verify: true,
                router: true,
            }
        );

        Ok(())
    }

    #[test]
    fn test_later_directives_update() -> Result<(), Box<dyn std::error::Error>> {
        let ext_auth = parse("extauth http://first:9000\nextauth {\nrouter\n}")?;
        assert_eq!(ext_auth.proxy, "http://first:9000");
        assert!(ext_auth.router);

        let ext_auth = parse("extauth \"http://quoted:9000\"")?;
        assert_eq!(ext_auth.proxy, "http://quoted:9000");

        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("extauth"), Err(DirectiveError::MissingEndpoint));
        assert_eq!(parse(""), Err(DirectiveError::MissingEndpoint));
        assert!(matches!(
            parse("extauth http://a:1 http://b:2"),
            Err(DirectiveError::ArgumentCount { line: 1, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy\n}"),
            Err(DirectiveError::ArgumentCount { line: 2, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy http://a:1 http://b:2\n}"),
            Err(DirectiveError::ArgumentCount { line: 2, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy http://a:1\ncookies maybe\n}"),
            Err(DirectiveError::InvalidBool { line: 3, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy http://a:1\ntimeout soon\n}"),
            Err(DirectiveError::InvalidTimeout { line: 3, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy http://a:1\nretries 3\n}"),
            Err(DirectiveError::Unsupported { line: 3, .. })
        ));
        assert!(matches!(
            parse("extauth {\nproxy http://a:1\n"),
            Err(DirectiveError::UnclosedBlock { line: 1 })
        ));
        assert!(matches!(
            parse("basicauth / user pass"),
            Err(DirectiveError::Unexpected { line: 1, .. })
        ));
    }
}
