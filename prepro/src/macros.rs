//! Macro definitions, the macro table, and expansion.
//!
//! Recursion is prevented with hidesets: every token a macro emits is
//! tagged with the call's hideset plus the macro's own name, and a token
//! whose hideset contains a macro name never expands under it again.
//! Arguments are fully expanded before plain substitution, while `#` and
//! `##` operate on the argument tokens as written.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::date_time;
use crate::diag::Diagnostics;
use crate::error::{ErrorKind, PreproError};
use crate::token::{Token, TokenKind};

/// One collected argument of a function-like macro call.
#[derive(Clone, Debug)]
pub struct MacroArg {
    /// Parameter name this argument binds to.
    pub name: String,
    /// Whether this is the trailing `__VA_ARGS__` bundle.
    pub is_va_args: bool,
    /// The argument tokens as written at the call site. `#` and `##`
    /// operate on these.
    pub tokens: Vec<Token>,
    /// The argument after macro expansion; plain parameter substitution
    /// uses these, so a nested call to the same macro already resolved
    /// before the output is painted with the macro's name.
    pub expanded: Vec<Token>,
}

/// Handler for a builtin macro; receives the call token for its location.
pub type BuiltinHandler = Rc<dyn Fn(&Token) -> Vec<Token>>;

/// The three flavors of macro.
#[derive(Clone)]
pub enum MacroKind {
    /// `#define NAME body...`
    Object {
        /// Replacement tokens.
        body: Vec<Token>,
    },
    /// `#define NAME(params) body...`
    Function {
        /// Named parameters, in order.
        params: Vec<String>,
        /// Name the variadic tail binds to, when the macro is variadic.
        va_name: Option<String>,
        /// Replacement tokens.
        body: Vec<Token>,
    },
    /// A macro whose expansion is computed, like `__LINE__`.
    Builtin {
        /// Produces the replacement tokens for a call.
        handler: BuiltinHandler,
    },
}

/// A macro definition.
#[derive(Clone)]
pub struct Macro {
    /// The macro's name.
    pub name: String,
    /// Object, function, or builtin.
    pub kind: MacroKind,
}

impl Macro {
    /// Expand an object-like macro at `call`.
    ///
    /// The body is copied verbatim; every emitted token is tagged with the
    /// call's hideset plus this macro's name and takes the call's location,
    /// so `__LINE__` inside a body reports the use site after rescan.
    pub(crate) fn expand_object(&self, call: &Token, body: &[Token]) -> Vec<Token> {
        let mut out = body.to_vec();
        self.tag_output(call, &mut out);
        out
    }

    /// Expand a function-like macro at `call` with collected `args`.
    ///
    /// Body scan, in order at each position: stringize (`#param`), GNU
    /// comma elision (`, ## va`), token paste (`##`), parameter
    /// substitution, plain copy.
    ///
    /// # Errors
    /// Fails when `#` is not followed by a parameter or `##` sits at either
    /// end of the body.
    pub(crate) fn expand_function(
        &self,
        call: &Token,
        body: &[Token],
        args: &[MacroArg],
        diag: &Diagnostics,
    ) -> Result<Vec<Token>, PreproError> {
        let find_arg = |tok: &Token| -> Option<&MacroArg> {
            if tok.kind != TokenKind::Ident {
                return None;
            }
            args.iter().find(|a| a.name == tok.text)
        };

        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let tok = &body[i];

            if tok.is_punct("#") {
                match body.get(i + 1).and_then(&find_arg) {
                    Some(arg) => {
                        let mut lit = stringize(&arg.tokens);
                        lit.has_space = tok.has_space;
                        out.push(lit);
                        i += 2;
                        continue;
                    }
                    None => return Err(diag.error(ErrorKind::MalformedStringize, tok)),
                }
            }

            // `, ## __VA_ARGS__`: the comma disappears when the variadic
            // argument is empty.
            if tok.is_punct(",") && body.get(i + 1).is_some_and(|t| t.is_punct("##")) {
                if let Some(arg) = body.get(i + 2).and_then(&find_arg) {
                    if arg.is_va_args {
                        if arg.tokens.is_empty() {
                            i += 3;
                        } else {
                            out.push(tok.clone());
                            i += 2;
                        }
                        continue;
                    }
                }
            }

            if tok.is_punct("##") {
                if out.is_empty() || i + 1 >= body.len() {
                    return Err(diag.error(ErrorKind::MalformedPaste, tok));
                }
                let rhs = &body[i + 1];
                if let Some(arg) = find_arg(rhs) {
                    // A parameter operand pastes its first argument token
                    // and appends the rest; an empty argument pastes
                    // nothing.
                    if let Some((first, rest)) = arg.tokens.split_first() {
                        paste_onto(&mut out, first);
                        out.extend(rest.iter().cloned());
                    }
                } else {
                    paste_onto(&mut out, rhs);
                }
                i += 2;
                continue;
            }

            if let Some(arg) = find_arg(tok) {
                let mut copies = arg.expanded.clone();
                if let Some(first) = copies.first_mut() {
                    first.at_bol = false;
                    first.has_space = tok.has_space;
                }
                out.extend(copies);
                i += 1;
                continue;
            }

            out.push(tok.clone());
            i += 1;
        }

        self.tag_output(call, &mut out);
        Ok(out)
    }

    /// Tag every emitted token with `hideset(call) ∪ {self.name}` and the
    /// call-site location; the first token inherits the call's layout.
    pub(crate) fn tag_output(&self, call: &Token, out: &mut [Token]) {
        for tok in out.iter_mut() {
            tok.hideset.merge(&call.hideset);
            tok.hideset.insert(self.name.clone());
            tok.file = call.file.clone();
            tok.line = call.line;
        }
        if let Some(first) = out.first_mut() {
            first.at_bol = call.at_bol;
            first.has_space = call.has_space;
        }
    }
}

/// Build the string literal `#param` produces: the raw text of the argument
/// tokens concatenated with no separators, wrapped in double quotes. The
/// contents are not re-escaped.
pub(crate) fn stringize(tokens: &[Token]) -> Token {
    let mut body = String::new();
    for tok in tokens {
        body.push_str(&tok.text);
    }
    let mut out = Token::new(TokenKind::Str, format!("\"{body}\""));
    out.string_value = body;
    out
}

/// Glue `rhs` onto the last emitted token. The result keeps the raw
/// concatenation as an identifier-kind token; it is not re-validated as a
/// single legal token.
fn paste_onto(out: &mut Vec<Token>, rhs: &Token) {
    if let Some(last) = out.last_mut() {
        last.text.push_str(&rhs.text);
        last.kind = TokenKind::Ident;
        last.value = 0;
        last.hideset.merge(&rhs.hideset);
    }
}

/// Collect the arguments of a function-like macro call.
///
/// `open` indexes the `(` token. Parentheses nest; top-level commas split
/// the first `params.len()` arguments and, when the macro is variadic, the
/// remaining tokens (commas included) form the `__VA_ARGS__` bundle.
/// Returns the arguments and the index of the closing `)`.
///
/// # Errors
/// Fails when the stream ends before `)` or the argument count does not
/// match the parameter list.
pub(crate) fn collect_args(
    tokens: &[Token],
    open: usize,
    params: &[String],
    va_name: Option<&str>,
    call: &Token,
    diag: &Diagnostics,
) -> Result<(Vec<MacroArg>, usize), PreproError> {
    let mut pieces: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    let mut i = open + 1;
    let close = loop {
        let Some(tok) = tokens.get(i) else {
            return Err(diag.error(ErrorKind::UnterminatedCall, call));
        };
        if tok.kind == TokenKind::Eof {
            return Err(diag.error(ErrorKind::UnterminatedCall, call));
        }
        if tok.is_punct("(") {
            depth += 1;
            current.push(tok.clone());
        } else if tok.is_punct(")") {
            if depth == 0 {
                pieces.push(current);
                break i;
            }
            depth -= 1;
            current.push(tok.clone());
        } else if tok.is_punct(",") && depth == 0 {
            // Once the named parameters are filled, commas belong to the
            // variadic bundle.
            let split = if va_name.is_some() {
                pieces.len() < params.len()
            } else {
                true
            };
            if split {
                pieces.push(std::mem::take(&mut current));
            } else {
                current.push(tok.clone());
            }
        } else {
            current.push(tok.clone());
        }
        i += 1;
    };

    // `M()` on a zero-parameter macro collects one empty piece; drop it.
    if params.is_empty() && va_name.is_none() && pieces.len() == 1 && pieces[0].is_empty() {
        pieces.clear();
    }

    let enough = if va_name.is_some() {
        pieces.len() >= params.len()
    } else {
        pieces.len() == params.len()
    };
    if !enough {
        return Err(diag.error_with(
            ErrorKind::ArgumentMismatch,
            call,
            format!(
                "macro \"{}\" expects {} argument(s), got {}",
                call.text,
                params.len(),
                pieces.len()
            ),
        ));
    }

    let mut pieces = pieces.into_iter();
    let mut args: Vec<MacroArg> = Vec::new();
    for name in params {
        let tokens = pieces.next().unwrap_or_default();
        args.push(MacroArg {
            name: name.clone(),
            is_va_args: false,
            expanded: tokens.clone(),
            tokens,
        });
    }
    if let Some(va) = va_name {
        let tokens = pieces.next().unwrap_or_default();
        args.push(MacroArg {
            name: va.to_string(),
            is_va_args: true,
            expanded: tokens.clone(),
            tokens,
        });
    }
    Ok((args, close))
}

/// The macro table: name to definition, plus the builtins.
pub struct MacroTable {
    macros: HashMap<String, Rc<Macro>>,
    counter: Rc<Cell<u64>>,
}

impl Default for MacroTable {
    fn default() -> Self {
        MacroTable::new()
    }
}

impl MacroTable {
    /// A table with the builtin macros installed and `__COUNTER__` at 0.
    #[must_use]
    pub fn new() -> Self {
        let mut table = MacroTable {
            macros: HashMap::new(),
            counter: Rc::new(Cell::new(0)),
        };
        table.install_builtins();
        table
    }

    fn install_builtins(&mut self) {
        self.define_builtin(
            "__LINE__",
            Rc::new(|call: &Token| vec![num_token(call.display_line(), call)]),
        );
        self.define_builtin(
            "__FILE__",
            Rc::new(|call: &Token| {
                let name = call
                    .file
                    .as_ref()
                    .map(|f| f.display_name.clone())
                    .unwrap_or_default();
                vec![string_token(name, call)]
            }),
        );

        let now = date_time::now_epoch();
        let date = date_time::format_date(now);
        self.define_builtin(
            "__DATE__",
            Rc::new(move |call: &Token| vec![string_token(date.clone(), call)]),
        );
        let time = date_time::format_time(now);
        self.define_builtin(
            "__TIME__",
            Rc::new(move |call: &Token| vec![string_token(time.clone(), call)]),
        );

        let counter = Rc::clone(&self.counter);
        self.define_builtin(
            "__COUNTER__",
            Rc::new(move |call: &Token| {
                let n = counter.get();
                counter.set(n + 1);
                vec![num_token(n as i64, call)]
            }),
        );
    }

    fn define_builtin(&mut self, name: &str, handler: BuiltinHandler) {
        self.define(Macro {
            name: name.to_string(),
            kind: MacroKind::Builtin { handler },
        });
    }

    /// Install a definition, returning the one it replaced, if any.
    pub fn define(&mut self, m: Macro) -> Option<Rc<Macro>> {
        self.macros.insert(m.name.clone(), Rc::new(m))
    }

    /// Remove a definition; false when the name was not defined.
    pub fn undefine(&mut self, name: &str) -> bool {
        self.macros.remove(name).is_some()
    }

    /// Look up a definition by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Rc<Macro>> {
        self.macros.get(name).cloned()
    }

    /// Whether `name` is currently defined.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// The next value `__COUNTER__` will yield.
    #[must_use]
    pub fn counter_value(&self) -> u64 {
        self.counter.get()
    }
}

fn num_token(value: i64, call: &Token) -> Token {
    let mut tok = Token::new(TokenKind::Num, value.to_string());
    tok.value = value;
    tok.file = call.file.clone();
    tok.line = call.line;
    tok
}

fn string_token(value: String, call: &Token) -> Token {
    let mut tok = Token::new(TokenKind::Str, format!("\"{value}\""));
    tok.string_value = value;
    tok.file = call.file.clone();
    tok.line = call.line;
    tok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Hideset;

    fn ident(text: &str) -> Token {
        Token::new(TokenKind::Ident, text)
    }

    fn punct(text: &str) -> Token {
        Token::new(TokenKind::Punct, text)
    }

    fn num(text: &str, value: i64) -> Token {
        let mut tok = Token::new(TokenKind::Num, text);
        tok.value = value;
        tok
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    fn arg(name: &str, tokens: Vec<Token>) -> MacroArg {
        MacroArg {
            name: name.to_string(),
            is_va_args: false,
            expanded: tokens.clone(),
            tokens,
        }
    }

    fn va(name: &str, tokens: Vec<Token>) -> MacroArg {
        MacroArg {
            name: name.to_string(),
            is_va_args: true,
            expanded: tokens.clone(),
            tokens,
        }
    }

    #[test]
    fn object_expansion_copies_body_and_tags_hideset() {
        let mac = Macro {
            name: "PI".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![num("3", 3), punct("."), num("14", 14)];
        let mut call = ident("PI");
        call.hideset.insert("OUTER");

        let out = mac.expand_object(&call, &body);
        assert_eq!(out.len(), body.len());
        assert_eq!(texts(&out), texts(&body));
        for tok in &out {
            assert!(tok.hideset.contains("PI"));
            assert!(tok.hideset.contains("OUTER"));
        }
    }

    #[test]
    fn function_expansion_hideset_is_superset_of_call() {
        let mac = Macro {
            name: "ID".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![ident("x")];
        let args = vec![arg("x", vec![ident("value")])];
        let mut call = ident("ID");
        call.hideset.insert("A");
        call.hideset.insert("B");

        let diag = Diagnostics::new();
        let out = mac.expand_function(&call, &body, &args, &diag).unwrap();
        assert_eq!(texts(&out), vec!["value"]);
        let mut expected = Hideset::new();
        expected.insert("A");
        expected.insert("B");
        expected.insert("ID");
        assert_eq!(out[0].hideset, expected);
    }

    #[test]
    fn stringize_concatenates_without_separators() {
        let arg = vec![ident("a"), punct("+"), ident("b")];
        let lit = stringize(&arg);
        assert_eq!(lit.kind, TokenKind::Str);
        assert_eq!(lit.text, "\"a+b\"");
        assert_eq!(lit.string_value, "a+b");
    }

    #[test]
    fn stringize_in_body() {
        let mac = Macro {
            name: "STR".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![punct("#"), ident("x")];
        let args = vec![arg("x", vec![ident("hello")])];
        let diag = Diagnostics::new();
        let out = mac
            .expand_function(&ident("STR"), &body, &args, &diag)
            .unwrap();
        assert_eq!(texts(&out), vec!["\"hello\""]);
    }

    #[test]
    fn hash_without_parameter_is_fatal() {
        let mac = Macro {
            name: "BAD".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![punct("#"), num("1", 1)];
        let diag = Diagnostics::new();
        let err = mac
            .expand_function(&ident("BAD"), &body, &[], &diag)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedStringize);
    }

    #[test]
    fn paste_resolves_parameters_to_arguments() {
        let mac = Macro {
            name: "CAT".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![ident("a"), punct("##"), ident("b")];
        let args = vec![arg("a", vec![ident("foo")]), arg("b", vec![ident("bar")])];
        let diag = Diagnostics::new();
        let out = mac
            .expand_function(&ident("CAT"), &body, &args, &diag)
            .unwrap();
        assert_eq!(texts(&out), vec!["foobar"]);
        assert_eq!(out[0].kind, TokenKind::Ident);
    }

    #[test]
    fn paste_at_body_start_is_fatal() {
        let mac = Macro {
            name: "BAD".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![punct("##"), ident("x")];
        let diag = Diagnostics::new();
        let err = mac
            .expand_function(&ident("BAD"), &body, &[], &diag)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPaste);
    }

    #[test]
    fn comma_elision_with_empty_va_args() {
        let mac = Macro {
            name: "LOG".to_string(),
            kind: MacroKind::Object { body: vec![] },
        };
        let body = vec![
            ident("printf"),
            punct("("),
            ident("fmt"),
            punct(","),
            punct("##"),
            ident("__VA_ARGS__"),
            punct(")"),
        ];
        let fmt_arg = arg("fmt", vec![ident("f")]);
        let diag = Diagnostics::new();

        let empty = vec![fmt_arg.clone(), va("__VA_ARGS__", vec![])];
        let out = mac
            .expand_function(&ident("LOG"), &body, &empty, &diag)
            .unwrap();
        assert_eq!(texts(&out), vec!["printf", "(", "f", ")"]);

        let full = vec![
            fmt_arg,
            va("__VA_ARGS__", vec![ident("x"), punct(","), ident("y")]),
        ];
        let out = mac
            .expand_function(&ident("LOG"), &body, &full, &diag)
            .unwrap();
        assert_eq!(texts(&out), vec!["printf", "(", "f", ",", "x", ",", "y", ")"]);
    }

    fn stream(mut toks: Vec<Token>) -> Vec<Token> {
        toks.push(Token::eof());
        toks
    }

    #[test]
    fn collect_args_splits_top_level_commas_only() {
        let toks = stream(vec![
            ident("M"),
            punct("("),
            ident("f"),
            punct("("),
            ident("a"),
            punct(","),
            ident("b"),
            punct(")"),
            punct(","),
            num("2", 2),
            punct(")"),
        ]);
        let params = vec!["x".to_string(), "y".to_string()];
        let diag = Diagnostics::new();
        let (args, close) = collect_args(&toks, 1, &params, None, &toks[0], &diag).unwrap();
        assert_eq!(close, 10);
        assert_eq!(texts(&args[0].tokens), vec!["f", "(", "a", ",", "b", ")"]);
        assert_eq!(texts(&args[1].tokens), vec!["2"]);
    }

    #[test]
    fn collect_args_variadic_tail_keeps_commas() {
        let toks = stream(vec![
            ident("LOG"),
            punct("("),
            ident("f"),
            punct(","),
            ident("x"),
            punct(","),
            ident("y"),
            punct(")"),
        ]);
        let params = vec!["fmt".to_string()];
        let diag = Diagnostics::new();
        let (args, _) =
            collect_args(&toks, 1, &params, Some("__VA_ARGS__"), &toks[0], &diag).unwrap();
        assert_eq!(args.len(), 2);
        assert!(args[1].is_va_args);
        assert_eq!(texts(&args[1].tokens), vec!["x", ",", "y"]);
    }

    #[test]
    fn collect_args_count_mismatch() {
        let toks = stream(vec![ident("M"), punct("("), ident("a"), punct(")")]);
        let params = vec!["x".to_string(), "y".to_string()];
        let diag = Diagnostics::new();
        let err = collect_args(&toks, 1, &params, None, &toks[0], &diag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentMismatch);
    }

    #[test]
    fn collect_args_unterminated_call() {
        let toks = stream(vec![ident("M"), punct("("), ident("a")]);
        let params = vec!["x".to_string()];
        let diag = Diagnostics::new();
        let err = collect_args(&toks, 1, &params, None, &toks[0], &diag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnterminatedCall);
    }

    #[test]
    fn table_define_lookup_undefine() {
        let mut table = MacroTable::new();
        assert!(table.is_defined("__LINE__"));
        assert!(!table.is_defined("FOO"));

        table.define(Macro {
            name: "FOO".to_string(),
            kind: MacroKind::Object {
                body: vec![num("1", 1)],
            },
        });
        assert!(table.lookup("FOO").is_some());

        let old = table.define(Macro {
            name: "FOO".to_string(),
            kind: MacroKind::Object {
                body: vec![num("2", 2)],
            },
        });
        assert!(old.is_some());

        assert!(table.undefine("FOO"));
        assert!(!table.undefine("FOO"));
    }

    #[test]
    fn counter_yields_sequential_values() {
        let table = MacroTable::new();
        let mac = table.lookup("__COUNTER__").unwrap();
        let MacroKind::Builtin { handler } = &mac.kind else {
            panic!("__COUNTER__ must be a builtin");
        };
        let call = ident("__COUNTER__");
        for expected in 0..3 {
            let out = handler(&call);
            assert_eq!(out[0].value, expected);
        }
        assert_eq!(table.counter_value(), 3);
    }
}
