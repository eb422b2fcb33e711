//! Grammar-agnostic identifier lexer used to backfill references.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Comments and string literals are matched first so identifiers inside them
/// are consumed without being reported.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)//[^\n]*|/\*.*?\*/|#[^\n]*|"(?:\\.|[^"\\])*"|'(?:\\.|[^'\\\n])*'|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .expect("valid identifier regex")
});

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr",
        "continue", "default", "delete", "do", "double", "else", "enum", "explicit", "extern",
        "false", "float", "for", "friend", "goto", "if", "inline", "int", "long", "namespace",
        "new", "noexcept", "nullptr", "operator", "private", "protected", "public", "register",
        "return", "short", "signed", "sizeof", "static", "struct", "switch", "template", "this",
        "throw", "true", "try", "typedef", "typename", "union", "unsigned", "using", "virtual",
        "void", "volatile", "while", "NULL", "and", "as", "def", "elif", "except", "finally",
        "from", "import", "in", "is", "lambda", "None", "not", "or", "pass", "raise", "with",
        "yield", "fn", "let", "mut", "impl", "pub", "use", "mod", "self", "Self", "func",
        "package", "var", "end", "module", "function", "of", "type",
    ]
    .into_iter()
    .collect()
});

/// Every name-class token in `content`, in source order.
///
/// Identifiers inside comments and string literals are skipped, and so are
/// language keywords.
///
/// # Examples
///
/// ```
/// use atlas_repomap::tokenize::identifiers;
///
/// let names = identifiers("int total = add(a, b); // call helper\nchar *s = \"print\";");
/// assert_eq!(names, vec!["total", "add", "a", "b", "s"]);
/// ```
pub fn identifiers(content: &str) -> Vec<&str> {
    TOKEN_RE
        .captures_iter(content)
        .filter_map(|caps| caps.name("ident"))
        .map(|m| m.as_str())
        .filter(|name| !KEYWORDS.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_block_comments_across_lines() {
        let src = "/* helper\n   other */\nrun();";
        assert_eq!(identifiers(src), vec!["run"]);
    }

    #[test]
    fn skips_preprocessor_lines() {
        let src = "#include <stdio.h>\nint main() { return helper(); }";
        assert_eq!(identifiers(src), vec!["main", "helper"]);
    }

    #[test]
    fn escaped_quotes_stay_inside_strings() {
        let src = r#"puts("say \"hi\" to x"); y();"#;
        assert_eq!(identifiers(src), vec!["puts", "y"]);
    }

    #[test]
    fn empty_input() {
        assert!(identifiers("").is_empty());
    }
}
