#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Token-stream C preprocessor engine
//!
//! This library preprocesses C source as a stream of tokens: macro calls
//! and directives are spliced over in place and the replacement is
//! rescanned, with per-token hidesets preventing a macro from expanding
//! inside its own output.
//!
//! ## Features
//!
//! - Object-like, function-like, and builtin macros (`__LINE__`,
//!   `__FILE__`, `__DATE__`, `__TIME__`, `__COUNTER__`)
//! - Stringize `#`, token paste `##`, variadic macros with GNU comma
//!   elision
//! - Conditional compilation (`#if`, `#ifdef`, `#ifndef`, `#elif`,
//!   `#else`, `#endif`) with full constant-expression evaluation
//! - Include resolution with search paths, `#include_next`,
//!   `#pragma once`, and include-guard detection
//! - `#error`, `#warning`, `#line`, `#undef`, `#pragma`
//!
//! ## Example
//!
//! ```rust
//! use prepro::{preprocess, PreproConfig};
//!
//! let code = r#"
//! #define SQUARE(x) ((x) * (x))
//! int nine = SQUARE(3);
//! "#;
//!
//! let config = PreproConfig::new();
//! let result = preprocess(code, &config).unwrap();
//! assert!(result.contains("((3) * (3))"));
//! ```

mod cache;
mod conditional;
mod date_time;
mod diag;
mod directive;
mod error;
mod include;
mod lexer;
mod macros;
mod preprocessor;
mod token;

pub use cache::LruCache;
pub use diag::Diagnostics;
pub use directive::Directive;
pub use error::{ErrorKind, PreproError};
pub use include::{DiskLoader, FileLoader, IncludeManager, IncludeTarget};
pub use lexer::{is_identifier_continue, is_identifier_start, tokenize};
pub use macros::{BuiltinHandler, Macro, MacroArg, MacroKind, MacroTable};
pub use preprocessor::{PreproConfig, Preprocessor};
pub use token::{render, FileInfo, Hideset, Token, TokenKind};

use std::path::Path;

/// Preprocess source text with the given configuration.
///
/// # Errors
/// Returns [`PreproError`] for any fatal diagnostic: malformed directives
/// or macros, unresolvable includes, misordered conditionals, or I/O
/// failures during include resolution.
pub fn preprocess(source: &str, config: &PreproConfig) -> Result<String, PreproError> {
    let mut pp = Preprocessor::new();
    pp.apply_config(config)?;
    pp.process(source, "<input>")
}

/// Preprocess the file at `path` and return the result.
///
/// # Errors
/// Returns [`PreproError`] when the file cannot be read or preprocessing
/// fails.
pub fn preprocess_file<P: AsRef<Path>>(
    path: P,
    config: &PreproConfig,
) -> Result<String, PreproError> {
    let mut pp = Preprocessor::new();
    pp.apply_config(config)?;
    pp.process_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::MemoryLoader;

    fn process(src: &str) -> String {
        let mut pp = Preprocessor::new();
        pp.process(src, "test.c").unwrap()
    }

    fn process_err(src: &str) -> PreproError {
        let mut pp = Preprocessor::new();
        pp.process(src, "test.c").unwrap_err()
    }

    fn with_files(files: &[(&str, &str)]) -> Preprocessor {
        let mut loader = MemoryLoader::new();
        for (path, contents) in files {
            loader.add(*path, *contents);
        }
        Preprocessor::with_loader(Box::new(loader))
    }

    #[test]
    fn simple_object_macro() {
        let out = process("#define PI 3.14\nfloat x = PI;\n");
        assert!(out.contains("float x = 3.14;"));
    }

    #[test]
    fn empty_object_macro() {
        let out = process("#define EMPTY\nint y = EMPTY;\n");
        assert!(out.contains("int y =;"));
    }

    #[test]
    fn function_like_macro() {
        let out = process("#define ADD(a, b) ((a)+(b))\nint z = ADD(1, 2);\n");
        assert!(out.contains("((1)+(2))"));
    }

    #[test]
    fn function_macro_name_without_parens_stays() {
        let out = process("#define F(x) x\nint (*fp)() = F;\n");
        assert!(out.contains("= F;"));
    }

    #[test]
    fn nested_macros() {
        let out = process(
            "#define ADD(a, b) ((a)+(b))\n#define MUL(a, b) ((a)*(b))\nint x = ADD(ADD(1, 2), MUL(3, 4));\n",
        );
        assert!(out.contains("((1)+(2))"));
        assert!(out.contains("((3)*(4))"));
    }

    #[test]
    fn self_reference_expands_once() {
        let out = process("#define FOO FOO\nint x = FOO;\n");
        assert!(out.contains("int x = FOO;"));
    }

    #[test]
    fn mutual_reference_terminates() {
        let out = process("#define A B\n#define B A\nint x = A;\n");
        assert!(out.contains("int x = A;"));
    }

    #[test]
    fn stringification() {
        let out = process("#define STR(x) #x\nconst char* s = STR(hello);\n");
        assert!(out.contains("\"hello\""));
    }

    #[test]
    fn stringification_is_exact_concatenation() {
        let out = process("#define STR(x) #x\nconst char* s = STR(a + b);\n");
        assert!(out.contains("\"a+b\""));
    }

    #[test]
    fn token_pasting() {
        let out = process("#define CAT(a, b) a##b\nint foobar = 1;\nint x = CAT(foo, bar);\n");
        assert!(out.contains("x = foobar;"));
    }

    #[test]
    fn token_pasting_chain() {
        let out = process("#define PASTE3(a,b,c) a##b##c\nint v = PASTE3(_, x, _);\n");
        assert!(out.contains("_x_"));
    }

    #[test]
    fn variadic_macro() {
        let out = process("#define LOG(fmt, ...) printf(fmt, __VA_ARGS__)\nLOG(\"%d\\n\", x, y);\n");
        assert!(out.contains("printf(\"%d\\n\", x, y)"));
    }

    #[test]
    fn comma_elision_with_empty_variadic() {
        let src = "#define LOG(fmt, ...) printf(fmt, ## __VA_ARGS__)\nLOG(\"hi\");\nLOG(\"%d\", 1);\n";
        let out = process(src);
        assert!(out.contains("printf(\"hi\")"));
        assert!(out.contains("printf(\"%d\", 1)"));
    }

    #[test]
    fn redefinition_last_write_wins() {
        let out = process("#define FOO 1\n#define FOO 2\nint x = FOO;\n");
        assert!(out.contains("int x = 2;"));
    }

    #[test]
    fn undef_removes_definition() {
        let out = process("#define FOO 1\n#undef FOO\nint x = FOO;\n");
        assert!(out.contains("int x = FOO;"));
    }

    #[test]
    fn wrong_argument_count_is_fatal() {
        let err = process_err("#define ADD(a, b) a+b\nint x = ADD(1);\n");
        assert_eq!(err.kind(), ErrorKind::ArgumentMismatch);
    }

    #[test]
    fn duplicate_parameter_is_fatal() {
        let err = process_err("#define BAD(a, a) a\n");
        assert_eq!(err.kind(), ErrorKind::MalformedParameterList);
    }

    #[test]
    fn conditional_ifdef_else() {
        let src = "#define DEBUG 1\n#ifdef DEBUG\nint x = 1;\n#else\nint x = 0;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int x = 1;"));
        assert!(!out.contains("int x = 0;"));
    }

    #[test]
    fn skipped_block_has_no_side_effects() {
        let src = "#ifdef NEVER\n#define X 1\n#include \"missing.h\"\n#error boom\n#endif\nX\n";
        let out = process(src);
        // X was never defined inside the dead branch.
        assert!(out.contains('X'));
    }

    #[test]
    fn elif_chain_takes_first_true_branch() {
        let src = "#define LEVEL 2\n#if LEVEL == 1\nint x = 1;\n#elif LEVEL == 2\nint x = 2;\n#else\nint x = 3;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int x = 2;"));
        assert!(!out.contains("int x = 1;"));
        assert!(!out.contains("int x = 3;"));
    }

    #[test]
    fn elif_after_taken_branch_is_not_evaluated() {
        // 1/0 in the dead #elif must not be reached.
        let src = "#if 1\nint x = 1;\n#elif 1 / 0\nint x = 2;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int x = 1;"));
    }

    #[test]
    fn if_with_defined_operator() {
        let src = "#define FOO 1\n#if defined(FOO) && !defined(BAR)\nint yes;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int yes;"));
    }

    #[test]
    fn if_expands_macros_in_expression() {
        let src = "#define N 4\n#if N * 2 == 8\nint yes;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int yes;"));
    }

    #[test]
    fn undefined_identifier_in_expression_is_zero() {
        let src = "#if UNDEFINED_THING\nint no;\n#else\nint yes;\n#endif\n";
        let out = process(src);
        assert!(out.contains("int yes;"));
        assert!(!out.contains("int no;"));
    }

    #[test]
    fn short_circuit_guards_division() {
        let src = "#if defined(NEVER) && 10 / NEVER\nint no;\n#endif\nint after;\n";
        let out = process(src);
        assert!(out.contains("int after;"));
        assert!(!out.contains("int no;"));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let err = process_err("#if 1 / 0\n#endif\n");
        assert_eq!(err.kind(), ErrorKind::DivisionByZero);
    }

    #[test]
    fn stray_endif_is_fatal() {
        let err = process_err("#endif\n");
        assert_eq!(err.kind(), ErrorKind::StrayConditional);
    }

    #[test]
    fn elif_after_else_is_fatal() {
        let err = process_err("#if 0\n#else\n#elif 1\n#endif\n");
        assert_eq!(err.kind(), ErrorKind::StrayConditional);
    }

    #[test]
    fn unterminated_conditional_is_fatal() {
        let err = process_err("#if 1\nint x;\n");
        assert_eq!(err.kind(), ErrorKind::UnterminatedConditional);
    }

    #[test]
    fn unknown_directive_is_fatal() {
        let err = process_err("#frobnicate all the things\n");
        assert_eq!(err.kind(), ErrorKind::UnknownDirective);
    }

    #[test]
    fn null_directive_is_dropped() {
        let out = process("#\nint x;\n");
        assert!(out.contains("int x;"));
        assert!(!out.contains('#'));
    }

    #[test]
    fn error_directive_is_fatal() {
        let err = process_err("#error something went wrong\n");
        assert_eq!(err.kind(), ErrorKind::UserError);
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn error_in_dead_branch_is_ignored() {
        let out = process("#if 0\n#error never\n#endif\nint ok;\n");
        assert!(out.contains("int ok;"));
    }

    #[test]
    fn warning_directive_continues() {
        let out = process("#warning deprecated header\nint x;\n");
        assert!(out.contains("int x;"));
    }

    #[test]
    fn line_directive_renumbers() {
        let out = process("#line 100\nint x = __LINE__;\n");
        assert!(out.contains("int x = 100;"));
    }

    #[test]
    fn line_and_file_builtins() {
        let out = process("int line = __LINE__;\nconst char* f = __FILE__;\n");
        assert!(out.contains("int line = 1;"));
        assert!(out.contains("\"test.c\""));
    }

    #[test]
    fn counter_builtin_increments() {
        let out = process("int a = __COUNTER__;\nint b = __COUNTER__;\nint c = __COUNTER__;\n");
        assert!(out.contains("int a = 0;"));
        assert!(out.contains("int b = 1;"));
        assert!(out.contains("int c = 2;"));
    }

    #[test]
    fn date_and_time_builtins_have_the_c_shape() {
        let out = process("const char* d = __DATE__;\nconst char* t = __TIME__;\n");
        // "Mmm dd yyyy" and "hh:mm:ss", both quoted.
        assert!(out.contains("d = \""));
        let colons = out.matches(':').count();
        assert!(colons >= 2);
    }

    #[test]
    fn include_from_loader() {
        let mut pp = with_files(&[("inc.h", "#define FOO 42\n")]);
        let out = pp.process("#include \"inc.h\"\nint x = FOO;\n", "main.c").unwrap();
        assert!(out.contains("int x = 42;"));
    }

    #[test]
    fn include_searches_configured_paths() {
        let mut pp = with_files(&[("sys/deep/a.h", "int from_sys;\n")]);
        pp.apply_config(&PreproConfig::new().with_include_path("sys"))
            .unwrap();
        let out = pp.process("#include <deep/a.h>\n", "main.c").unwrap();
        assert!(out.contains("int from_sys;"));
    }

    #[test]
    fn missing_include_is_fatal() {
        let mut pp = with_files(&[]);
        let err = pp.process("#include \"nope.h\"\n", "main.c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncludeNotFound);
    }

    #[test]
    fn pragma_once_suppresses_reinclude() {
        let mut pp = with_files(&[("header.h", "#pragma once\nint x = 42;\n")]);
        let out = pp
            .process(
                "#include \"header.h\"\n#include \"header.h\"\nint y = x;\n",
                "main.c",
            )
            .unwrap();
        assert_eq!(out.matches("int x = 42;").count(), 1);
        assert!(out.contains("int y = x;"));
    }

    #[test]
    fn include_guard_suppresses_reinclude() {
        let guarded = "#ifndef A_H\n#define A_H\nint once_only;\n#endif\n";
        let mut pp = with_files(&[("a.h", guarded)]);
        let out = pp
            .process("#include \"a.h\"\n#include \"a.h\"\n", "main.c")
            .unwrap();
        assert_eq!(out.matches("int once_only;").count(), 1);
    }

    #[test]
    fn macro_expanded_include_target() {
        let mut pp = with_files(&[("inc.h", "int from_macro;\n")]);
        let out = pp
            .process("#define HEADER \"inc.h\"\n#include HEADER\n", "main.c")
            .unwrap();
        assert!(out.contains("int from_macro;"));
    }

    #[test]
    fn include_next_resumes_search() {
        let mut pp = with_files(&[
            ("first/a.h", "#include_next <a.h>\nint from_first;\n"),
            ("second/a.h", "int from_second;\n"),
        ]);
        pp.apply_config(
            &PreproConfig::new()
                .with_include_path("first")
                .with_include_path("second"),
        )
        .unwrap();
        let out = pp.process("#include_next <a.h>\n", "main.c").unwrap();
        assert_eq!(out.matches("int from_first;").count(), 1);
        assert_eq!(out.matches("int from_second;").count(), 1);
        // The second path's file comes from the deeper #include_next, so
        // it lands before the rest of the first file.
        let second_pos = out.find("int from_second;").unwrap();
        let first_pos = out.find("int from_first;").unwrap();
        assert!(second_pos < first_pos);
    }

    #[test]
    fn extra_directive_tokens_warn_but_do_not_abort() {
        let mut pp = with_files(&[("inc.h", "int from_header;\n")]);
        let src = "#define FOO 1\n#ifdef FOO junk\nint x = 1;\n#endif extra\n#include \"inc.h\" trailing\n";
        let out = pp.process(src, "main.c").unwrap();
        assert!(out.contains("int x = 1;"));
        assert!(out.contains("int from_header;"));
        assert!(!out.contains("junk"));
        assert!(!out.contains("trailing"));
    }

    #[test]
    fn headers_can_use_conditionals_and_macros() {
        let header = "#ifdef WANT_MAX\n#define MAX(a, b) ((a) > (b) ? (a) : (b))\n#endif\n";
        let mut pp = with_files(&[("util.h", header)]);
        let out = pp
            .process(
                "#define WANT_MAX 1\n#include \"util.h\"\nint m = MAX(3, 4);\n",
                "main.c",
            )
            .unwrap();
        assert!(out.contains("((3) > (4) ? (3) : (4))"));
    }

    #[test]
    fn config_defines_and_undefines() {
        let config = PreproConfig::new()
            .with_define("WIDTH", "80")
            .with_define("GONE", "1")
            .with_undefine("GONE");
        let out = preprocess("int w = WIDTH;\nint g = GONE;\n", &config).unwrap();
        assert!(out.contains("int w = 80;"));
        assert!(out.contains("int g = GONE;"));
    }

    #[test]
    fn comments_are_stripped() {
        let out = process("// leading comment\nint x = 1; /* inline */ int y = 2;\n");
        assert!(out.contains("int x = 1;"));
        assert!(out.contains("int y = 2;"));
        assert!(!out.contains("comment"));
    }

    #[test]
    fn spliced_directive_spans_lines() {
        let out = process("#define LONG_MACRO \\\n 42\nint x = LONG_MACRO;\n");
        assert!(out.contains("int x = 42;"));
    }
}
