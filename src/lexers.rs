use std::collections::BTreeSet;

/// Lexers available when the configuration does not name any.
pub const BUILTIN_LEXERS: &[&str] = &[
    "bash", "c", "clojure", "cpp", "csharp", "css", "diff", "docker", "elixir", "erlang", "go",
    "haskell", "html", "ini", "java", "javascript", "json", "kotlin", "lua", "make", "markdown",
    "nginx", "nim", "nix", "ocaml", "perl", "php", "postgresql", "powershell", "python",
    "python2", "rst", "ruby", "rust", "scala", "sql", "swift", "text", "toml", "typescript",
    "vim", "xml", "yaml", "zig",
];

/// The set of lexer names a paste may use.
pub trait LexerCatalog: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    fn all(&self) -> &BTreeSet<String>;
}

#[derive(Debug, Clone)]
pub struct StaticCatalog {
    names: BTreeSet<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticCatalog {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_LEXERS.iter().copied())
    }
}

impl LexerCatalog for StaticCatalog {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn all(&self) -> &BTreeSet<String> {
        &self.names
    }
}
