use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use atlas_core::AtlasError;
use tree_sitter::Query;

/// Programming language detected from file extension.
///
/// # Examples
///
/// ```
/// use atlas_repomap::languages::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("mjs"), Language::JavaScript);
/// assert_eq!(Language::from_extension("tsx"), Language::Tsx);
/// assert_eq!(Language::from_extension("hpp"), Language::Cpp);
/// assert_eq!(Language::from_extension("md"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Unknown,
}

/// Every language that ships a grammar and a tag query.
pub const SUPPORTED: [Language; 10] = [
    Language::Python,
    Language::JavaScript,
    Language::TypeScript,
    Language::Tsx,
    Language::Rust,
    Language::Go,
    Language::Java,
    Language::C,
    Language::Cpp,
    Language::Ruby,
];

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "rs" => Language::Rust,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Lowercase language name, as used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Unknown => "unknown",
        }
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` for `Language::Unknown`.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }

    /// The embedded tag query source for this language.
    pub fn tags_query(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some(include_str!("../queries/python-tags.scm")),
            Language::JavaScript => Some(include_str!("../queries/javascript-tags.scm")),
            Language::TypeScript | Language::Tsx => {
                Some(include_str!("../queries/typescript-tags.scm"))
            }
            Language::Rust => Some(include_str!("../queries/rust-tags.scm")),
            Language::Go => Some(include_str!("../queries/go-tags.scm")),
            Language::Java => Some(include_str!("../queries/java-tags.scm")),
            Language::C => Some(include_str!("../queries/c-tags.scm")),
            Language::Cpp => Some(include_str!("../queries/cpp-tags.scm")),
            Language::Ruby => Some(include_str!("../queries/ruby-tags.scm")),
            Language::Unknown => None,
        }
    }

    /// Syntax-node kinds that count as a function-like unit.
    pub fn function_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["function_definition"],
            Language::JavaScript | Language::TypeScript | Language::Tsx => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
                "arrow_function",
                "function_expression",
            ],
            Language::Rust => &["function_item"],
            Language::Go => &["function_declaration", "method_declaration", "func_literal"],
            Language::Java => &["method_declaration", "constructor_declaration"],
            Language::C | Language::Cpp => &["function_definition"],
            Language::Ruby => &["method", "singleton_method"],
            Language::Unknown => &[],
        }
    }

    /// Syntax-node kinds that count as a class-like unit.
    pub fn class_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["class_definition"],
            Language::JavaScript => &["class_declaration", "class"],
            Language::TypeScript | Language::Tsx => &[
                "class_declaration",
                "abstract_class_declaration",
                "class",
                "interface_declaration",
                "enum_declaration",
            ],
            Language::Rust => &[
                "struct_item",
                "enum_item",
                "trait_item",
                "impl_item",
                "mod_item",
            ],
            Language::Go => &["type_declaration"],
            Language::Java => &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            Language::C => &["struct_specifier", "union_specifier", "enum_specifier"],
            Language::Cpp => &[
                "class_specifier",
                "struct_specifier",
                "union_specifier",
                "enum_specifier",
                "namespace_definition",
            ],
            Language::Ruby => &["class", "module"],
            Language::Unknown => &[],
        }
    }

    /// Structural category of a syntax-node kind, if any.
    pub fn category_of_kind(&self, kind: &str) -> Option<StructuralCategory> {
        if self.function_kinds().contains(&kind) {
            Some(StructuralCategory::Function)
        } else if self.class_kinds().contains(&kind) {
            Some(StructuralCategory::Class)
        } else {
            None
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse structural unit a definition belongs to.
///
/// # Examples
///
/// ```
/// use atlas_repomap::languages::StructuralCategory;
///
/// assert_eq!(StructuralCategory::from_tag_type("method"), Some(StructuralCategory::Function));
/// assert_eq!(StructuralCategory::from_tag_type("trait"), Some(StructuralCategory::Class));
/// assert_eq!(StructuralCategory::from_tag_type("type"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuralCategory {
    Function,
    Class,
}

impl StructuralCategory {
    /// Map a tag type (the last segment of a capture name) to its category.
    pub fn from_tag_type(tag_type: &str) -> Option<Self> {
        match tag_type {
            "function" | "method" => Some(StructuralCategory::Function),
            "class" | "interface" | "module" | "struct" | "enum" | "trait" => {
                Some(StructuralCategory::Class)
            }
            _ => None,
        }
    }

    /// Lowercase label persisted as the node type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuralCategory::Function => "function",
            StructuralCategory::Class => "class",
        }
    }
}

/// A grammar bound to its compiled tag query.
pub struct Grammar {
    language: Language,
    ts_language: tree_sitter::Language,
    query: Query,
    has_reference_captures: bool,
}

impl Grammar {
    fn compile(language: Language) -> Result<Option<Self>, AtlasError> {
        let (Some(ts_language), Some(source)) =
            (language.tree_sitter_language(), language.tags_query())
        else {
            return Ok(None);
        };

        let query = Query::new(&ts_language, source).map_err(|e| AtlasError::Grammar {
            language: language.name().to_string(),
            message: e.to_string(),
        })?;

        let has_reference_captures = query
            .capture_names()
            .iter()
            .any(|name| name.starts_with("name.reference."));

        Ok(Some(Self {
            language,
            ts_language,
            query,
            has_reference_captures,
        }))
    }

    /// Language this grammar parses.
    pub fn language(&self) -> Language {
        self.language
    }

    /// The tree-sitter grammar.
    pub fn ts_language(&self) -> &tree_sitter::Language {
        &self.ts_language
    }

    /// The compiled tag query.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Whether the tag query declares any `name.reference.*` capture.
    ///
    /// Grammars without one get their references from the fallback tokenizer.
    pub fn has_reference_captures(&self) -> bool {
        self.has_reference_captures
    }
}

/// Every supported grammar with its tag query compiled once.
///
/// The registry is immutable after construction and can be shared across
/// worker threads.
///
/// # Examples
///
/// ```
/// use atlas_repomap::languages::{GrammarRegistry, Language};
///
/// let registry = GrammarRegistry::new().unwrap();
/// assert!(registry.get(Language::Python).is_some());
/// assert!(registry.get(Language::Unknown).is_none());
/// assert!(!registry.get(Language::C).unwrap().has_reference_captures());
/// ```
pub struct GrammarRegistry {
    grammars: HashMap<Language, Grammar>,
}

impl GrammarRegistry {
    /// Compile the tag query of every supported language.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Grammar`] if a bundled query does not compile
    /// against its grammar.
    pub fn new() -> Result<Self, AtlasError> {
        let mut grammars = HashMap::new();
        for language in SUPPORTED {
            if let Some(grammar) = Grammar::compile(language)? {
                grammars.insert(language, grammar);
            }
        }
        tracing::debug!(count = grammars.len(), "compiled tag queries");
        Ok(Self { grammars })
    }

    /// Grammar for `language`, or `None` when unsupported.
    pub fn get(&self, language: Language) -> Option<&Grammar> {
        self.grammars.get(&language)
    }

    /// Grammar for the extension of `path`.
    pub fn for_path(&self, path: &Path) -> Option<&Grammar> {
        self.get(Language::from_path(path))
    }
}
