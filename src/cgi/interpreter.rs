use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Built-in extension table; the first existing candidate wins.
const BUILTIN: &[(&str, &[&str])] = &[
    (".py", &["/usr/bin/python3", "/usr/local/bin/python3", "/usr/bin/python"]),
    (".php", &["/usr/bin/php-cgi", "/usr/local/bin/php-cgi", "/usr/bin/php"]),
    (".pl", &["/usr/bin/perl", "/usr/local/bin/perl"]),
    (".rb", &["/usr/bin/ruby", "/usr/local/bin/ruby"]),
    (".sh", &["/bin/sh"]),
];

/// Maps script extensions to the interpreter that runs them.
#[derive(Debug, Clone, Default)]
pub struct InterpreterTable {
    overrides: HashMap<String, PathBuf>,
}

impl InterpreterTable {
    pub fn new(overrides: &HashMap<String, PathBuf>) -> Self {
        let overrides = overrides
            .iter()
            .map(|(ext, path)| (normalize(ext), path.clone()))
            .collect();
        Self { overrides }
    }

    /// Interpreter for `ext` (with or without the leading dot). Only an
    /// existing file is returned, configured or built in.
    pub fn resolve(&self, ext: &str) -> Option<PathBuf> {
        let ext = normalize(ext);
        if let Some(path) = self.overrides.get(&ext) {
            if path.is_file() {
                return Some(path.clone());
            }
            warn!(ext = %ext, interpreter = %path.display(), "configured CGI interpreter not found");
            return None;
        }
        BUILTIN
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(&ext))
            .and_then(|(_, candidates)| {
                candidates
                    .iter()
                    .map(Path::new)
                    .find(|p| p.is_file())
                    .map(Path::to_path_buf)
            })
    }
}

fn normalize(ext: &str) -> String {
    let ext = ext.to_ascii_lowercase();
    if ext.starts_with('.') { ext } else { format!(".{ext}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert("cob".to_string(), PathBuf::from("/bin/sh"));
        let table = InterpreterTable::new(&overrides);

        assert_eq!(table.resolve(".cob"), Some(PathBuf::from("/bin/sh")));
        assert_eq!(table.resolve("sh"), Some(PathBuf::from("/bin/sh")));
        assert_eq!(table.resolve(".lisp"), None);
    }

    #[test]
    fn missing_override_resolves_to_nothing() {
        let mut overrides = HashMap::new();
        overrides.insert(".sh".to_string(), PathBuf::from("/definitely/not/an/interpreter"));
        let table = InterpreterTable::new(&overrides);

        // The built-in /bin/sh is not used in place of a broken override.
        assert_eq!(table.resolve(".sh"), None);
    }
}
