//! Line patterns recognized by the policy checker
//!
//! Everything here is textual. Nothing is parsed as Python beyond what is
//! needed to split a call's argument list.

/// Indentation widths at which a `#` line is treated as a full-line comment.
const COMMENT_INDENTS: [usize; 3] = [0, 4, 8];

/// Characters that may appear in an `open()` mode string.
const MODE_CHARS: &str = "rwxabtU+";
/// Mode characters that request writing, appending, exclusive creation or update.
const WRITE_MODE_CHARS: &str = "wax+";

/// Subprocess entry points that accept `shell=`.
const SUBPROCESS_SPAWNS: [&str; 5] = [
    "subprocess.run(",
    "subprocess.call(",
    "subprocess.Popen(",
    "subprocess.check_call(",
    "subprocess.check_output(",
];

/// Module names imported by a trimmed line, in source order.
///
/// Returns `None` when the line is not an import statement. Each name is the
/// root segment (`os` for `os.path`); relative imports keep their dotted form.
pub fn imported_modules(line: &str) -> Option<Vec<&str>> {
    let mut modules = Vec::new();
    let mut is_import = false;

    for statement in statements(line) {
        let statement = statement.trim();
        let mut tokens = statement.split_whitespace();
        match tokens.next() {
            Some("import") => {
                is_import = true;
                let names = &statement["import".len()..];
                modules.extend(
                    names
                        .split(',')
                        .filter_map(|item| item.split_whitespace().next())
                        .map(root_module),
                );
            }
            Some("from") => {
                is_import = true;
                if let Some(target) = tokens.next() {
                    modules.push(root_module(target));
                }
            }
            _ => {}
        }
    }

    is_import.then_some(modules)
}

fn root_module(name: &str) -> &str {
    if name.starts_with('.') {
        return name;
    }
    name.split('.').next().unwrap_or(name)
}

/// `;`-separated statements of a line, with any trailing comment dropped.
/// Separators and `#` inside string literals do not count.
fn statements(line: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut quoting = Quoting::default();
    let mut start = 0;
    let mut end = line.len();

    for (i, c) in line.char_indices() {
        if quoting.in_string(c) {
            continue;
        }
        match c {
            ';' => {
                statements.push(&line[start..i]);
                start = i + 1;
            }
            '#' => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    statements.push(&line[start..end]);
    statements
}

/// Quote state of a left-to-right scan over one line
#[derive(Debug, Default)]
struct Quoting {
    quote: Option<char>,
    escaped: bool,
}

impl Quoting {
    /// Feed the next character; true when it belongs to a string literal,
    /// quotes included.
    fn in_string(&mut self, c: char) -> bool {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == q {
                self.quote = None;
            }
            return true;
        }
        if c == '\'' || c == '"' {
            self.quote = Some(c);
            return true;
        }
        false
    }
}

/// Fixed-indentation comment test on the raw, untrimmed line.
///
/// Only `#` at column 0, 4 or 8 (after whitespace) counts. The line is
/// deliberately not trimmed first, so a comment at 2 or 6 spaces is still
/// vetted like code.
pub fn is_full_line_comment(raw: &str) -> bool {
    COMMENT_INDENTS.iter().any(|&indent| {
        let mut chars = raw.chars();
        chars.by_ref().take(indent).all(char::is_whitespace) && chars.next() == Some('#')
    })
}

/// True when the line contains `os.system(`.
pub fn calls_os_system(line: &str) -> bool {
    line.contains("os.system(")
}

/// True when the line calls a subprocess entry point with `shell=True`.
pub fn spawns_shell(line: &str) -> bool {
    if !SUBPROCESS_SPAWNS.iter().any(|call| line.contains(call)) {
        return false;
    }
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains("shell=True")
}

/// True when any `open(` call on the line asks for a writable mode.
///
/// A mode that is not a string literal cannot be vetted and counts as
/// writable.
pub fn opens_for_writing(line: &str) -> bool {
    let mut rest = line;
    while let Some(pos) = rest.find("open(") {
        let before = rest[..pos].chars().next_back();
        let after = &rest[pos + "open(".len()..];
        if !before.is_some_and(is_ident_char) && call_requests_write(after) {
            return true;
        }
        rest = after;
    }
    false
}

fn call_requests_write(after_paren: &str) -> bool {
    let mut positional = 0;
    for arg in call_arguments(after_paren) {
        match keyword_argument(arg) {
            Some(("mode", value)) => {
                if mode_requests_write(value) {
                    return true;
                }
            }
            Some(_) => {}
            None => {
                let is_mode_position = positional == 1;
                positional += 1;
                match string_literal(arg) {
                    Some(text) if is_write_mode(text) => return true,
                    Some(_) => {}
                    None if is_mode_position => return true,
                    None => {}
                }
            }
        }
    }
    false
}

fn mode_requests_write(value: &str) -> bool {
    match string_literal(value) {
        Some(text) => is_write_mode(text),
        None => true,
    }
}

fn is_write_mode(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(|c| MODE_CHARS.contains(c))
        && text.chars().any(|c| WRITE_MODE_CHARS.contains(c))
}

/// Top-level arguments of a call, given the text after its opening paren.
/// Stops at the matching `)`, a trailing comment, or the end of the line.
fn call_arguments(after_paren: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut quoting = Quoting::default();
    let mut start = 0;
    let mut end = after_paren.len();

    for (i, c) in after_paren.char_indices() {
        if quoting.in_string(c) {
            continue;
        }
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth == 0 => {
                end = i;
                break;
            }
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                args.push(&after_paren[start..i]);
                start = i + 1;
            }
            '#' => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    args.push(&after_paren[start..end]);

    args.into_iter()
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// Splits `name=value`, ignoring comparisons such as `a == b`.
fn keyword_argument(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) || value.starts_with('=') {
        return None;
    }
    Some((name, value.trim()))
}

/// Contents of a single-line string literal, with any `r`/`b`/`u`/`f` prefix.
fn string_literal(arg: &str) -> Option<&str> {
    let body = arg.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    if arg.len() - body.len() > 2 || body.len() < 2 {
        return None;
    }
    let quote = body.chars().next()?;
    if (quote != '\'' && quote != '"') || !body.ends_with(quote) {
        return None;
    }
    Some(&body[1..body.len() - 1])
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imported_modules_plain_and_dotted() {
        assert_eq!(imported_modules("import os"), Some(vec!["os"]));
        assert_eq!(imported_modules("import os.path"), Some(vec!["os"]));
        assert_eq!(imported_modules("import numpy as np"), Some(vec!["numpy"]));
        assert_eq!(
            imported_modules("from collections.abc import Mapping"),
            Some(vec!["collections"])
        );
    }

    #[test]
    fn test_imported_modules_lists_and_statements() {
        assert_eq!(
            imported_modules("import math, socket as s"),
            Some(vec!["math", "socket"])
        );
        assert_eq!(
            imported_modules("import os; import ctypes"),
            Some(vec!["os", "ctypes"])
        );
        assert_eq!(imported_modules("x = 1; import pty"), Some(vec!["pty"]));
        assert_eq!(imported_modules("import json  # config"), Some(vec!["json"]));
    }

    #[test]
    fn test_imported_modules_relative() {
        assert_eq!(imported_modules("from . import helper"), Some(vec!["."]));
        assert_eq!(imported_modules("from .pkg import helper"), Some(vec![".pkg"]));
    }

    #[test]
    fn test_not_an_import() {
        assert_eq!(imported_modules("important = 1"), None);
        assert_eq!(imported_modules("fromage = 'brie'"), None);
        assert_eq!(imported_modules("print('import os')"), None);
    }

    #[test]
    fn test_separators_inside_strings_are_ignored() {
        assert_eq!(imported_modules("print(\"step 1; from here on\")"), None);
        assert_eq!(imported_modules("print('a; import socket')"), None);
        assert_eq!(imported_modules("print('#'); import pty"), Some(vec!["pty"]));
        assert_eq!(
            imported_modules(r"s = 'it\'s; import os'; import json"),
            Some(vec!["json"])
        );
    }

    #[test]
    fn test_statements_drop_comments_outside_strings() {
        assert_eq!(statements("x = 1; y = 2"), vec!["x = 1", " y = 2"]);
        assert_eq!(statements("import os  # ; import pty"), vec!["import os  "]);
        assert_eq!(statements("print('#;')"), vec!["print('#;')"]);
    }

    #[test]
    fn test_full_line_comment_indents() {
        assert!(is_full_line_comment("# note"));
        assert!(is_full_line_comment("    # note"));
        assert!(is_full_line_comment("        # note"));
        assert!(!is_full_line_comment("  # note"));
        assert!(!is_full_line_comment("      # note"));
        assert!(!is_full_line_comment("x = 1  # note"));
        assert!(!is_full_line_comment(""));
    }

    #[test]
    fn test_opens_for_writing_modes() {
        assert!(opens_for_writing("open('f.txt', 'w')"));
        assert!(opens_for_writing("f = open(\"log\", \"a+\")"));
        assert!(opens_for_writing("open(path, mode='wb')"));
        assert!(opens_for_writing("open(path, 'x')"));
        assert!(opens_for_writing("with io.open(p, 'r+') as f:"));
        assert!(opens_for_writing("Path('out.txt').open('w')"));
    }

    #[test]
    fn test_opens_for_reading_is_fine() {
        assert!(!opens_for_writing("open('data.txt')"));
        assert!(!opens_for_writing("open('data.txt', 'r')"));
        assert!(!opens_for_writing("open('archive.bin', 'rb')"));
        assert!(!opens_for_writing("open('notes.txt', encoding='ascii')"));
        assert!(!opens_for_writing("urlopen(url, data)"));
        assert!(!opens_for_writing("print('hello')"));
    }

    #[test]
    fn test_opens_with_unknown_mode() {
        assert!(opens_for_writing("open(path, mode)"));
        assert!(opens_for_writing("open(path, mode=m)"));
        assert!(opens_for_writing("os.open(path, os.O_WRONLY)"));
    }

    #[test]
    fn test_call_arguments_nesting() {
        assert_eq!(
            call_arguments("os.path.join(a, 'b'), 'w')"),
            vec!["os.path.join(a, 'b')", "'w'"]
        );
        assert_eq!(call_arguments("'a,b', 'r') + x"), vec!["'a,b'", "'r'"]);
        assert_eq!(call_arguments(")"), Vec::<&str>::new());
    }

    #[test]
    fn test_spawns_shell() {
        assert!(spawns_shell("subprocess.run('ls', shell=True)"));
        assert!(spawns_shell("subprocess.Popen(cmd, shell = True)"));
        assert!(!spawns_shell("subprocess.run(['ls'])"));
        assert!(!spawns_shell("subprocess.run(['ls'], shell=False)"));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal("'w'"), Some("w"));
        assert_eq!(string_literal("rb\"x\""), Some("x"));
        assert_eq!(string_literal("mode"), None);
        assert_eq!(string_literal("'"), None);
    }
}
