//! WGSL source preprocessor
//!
//! Supports `#include "file"`, `#define NAME [value]`, `#undef NAME`,
//! `#ifdef`, `#ifndef`, `#else` and `#endif`. Defined macros with a value are
//! substituted as whole identifiers in active lines. Every file is included
//! at most once per compile; the list of files read is returned as the
//! module's dependencies.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use rustc_hash::FxHashSet;
use thiserror::Error;

use super::MacroTable;

lazy_static! {
    static ref DIRECTIVE: Regex =
        Regex::new(r"^\s*#\s*([a-z]+)\s*(.*?)\s*$").expect("directive pattern");
    static ref INCLUDE_PATH: Regex = Regex::new(r#"^"([^"]+)"$"#).expect("include pattern");
    static ref DEFINE: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$").expect("define pattern");
    static ref IDENTIFIER: Regex =
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier pattern");
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{line}: include {include} not found", .path.display())]
    IncludeNotFound {
        path: PathBuf,
        line: usize,
        include: String,
    },

    #[error("{}:{line}: malformed directive `#{directive}`", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        directive: String,
    },

    #[error("{}:{line}: unknown directive `#{directive}`", .path.display())]
    UnknownDirective {
        path: PathBuf,
        line: usize,
        directive: String,
    },

    #[error("{}: unbalanced conditional block", .path.display())]
    UnbalancedConditional { path: PathBuf },
}

/// Preprocessed source and every file it was assembled from.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub source: String,
    pub dependencies: Vec<PathBuf>,
}

struct Context<'a> {
    search_root: &'a Path,
    macros: MacroTable,
    included: FxHashSet<PathBuf>,
    dependencies: Vec<PathBuf>,
    output: String,
}

/// `(branch active, any branch taken)` per open conditional.
type CondStack = Vec<(bool, bool)>;

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Preprocess `entry`, resolving includes against the including file's
/// directory first and then `search_root`.
pub fn preprocess(
    search_root: &Path,
    entry: &Path,
    macros: &MacroTable,
) -> Result<Preprocessed, PreprocessError> {
    let mut ctx = Context {
        search_root,
        macros: macros.clone(),
        included: FxHashSet::default(),
        dependencies: Vec::new(),
        output: String::new(),
    };
    process_file(&mut ctx, &canonical(entry))?;
    Ok(Preprocessed {
        source: ctx.output,
        dependencies: ctx.dependencies,
    })
}

fn resolve_include(ctx: &Context, from: &Path, include: &str) -> Option<PathBuf> {
    let local = from.parent().map(|dir| dir.join(include));
    local
        .into_iter()
        .chain(std::iter::once(ctx.search_root.join(include)))
        .find(|candidate| candidate.is_file())
        .map(|p| canonical(&p))
}

fn active(stack: &CondStack) -> bool {
    stack.iter().all(|(on, _)| *on)
}

fn substitute(macros: &MacroTable, line: &str) -> String {
    IDENTIFIER
        .replace_all(line, |caps: &Captures| match macros.get(&caps[0]) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn process_file(ctx: &mut Context, path: &Path) -> Result<(), PreprocessError> {
    if !ctx.included.insert(path.to_path_buf()) {
        return Ok(());
    }
    ctx.dependencies.push(path.to_path_buf());

    let text = std::fs::read_to_string(path).map_err(|source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut stack: CondStack = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let number = number + 1;
        let Some(caps) = DIRECTIVE.captures(line) else {
            if active(&stack) {
                ctx.output.push_str(&substitute(&ctx.macros, line));
                ctx.output.push('\n');
            }
            continue;
        };

        let directive = caps[1].to_string();
        let argument = caps[2].to_string();
        let malformed = || PreprocessError::Malformed {
            path: path.to_path_buf(),
            line: number,
            directive: directive.clone(),
        };

        match directive.as_str() {
            "ifdef" | "ifndef" => {
                let defined = ctx.macros.contains_key(argument.as_str());
                let on = defined == (directive == "ifdef");
                stack.push((on, on));
            }
            "else" => {
                let top = stack.last_mut().ok_or_else(malformed)?;
                *top = (!top.1, true);
            }
            "endif" => {
                stack.pop().ok_or_else(malformed)?;
            }
            _ if !active(&stack) => {}
            "include" => {
                let include = INCLUDE_PATH
                    .captures(&argument)
                    .map(|c| c[1].to_string())
                    .ok_or_else(malformed)?;
                let resolved = resolve_include(ctx, path, &include).ok_or_else(|| {
                    PreprocessError::IncludeNotFound {
                        path: path.to_path_buf(),
                        line: number,
                        include: include.clone(),
                    }
                })?;
                process_file(ctx, &resolved)?;
            }
            "define" => {
                let def = DEFINE.captures(&argument).ok_or_else(malformed)?;
                let value = substitute(&ctx.macros, &def[2]);
                ctx.macros.insert(def[1].to_string(), value);
            }
            "undef" => {
                ctx.macros.remove(argument.as_str());
            }
            _ => {
                return Err(PreprocessError::UnknownDirective {
                    path: path.to_path_buf(),
                    line: number,
                    directive,
                })
            }
        }
    }

    if !stack.is_empty() {
        return Err(PreprocessError::UnbalancedConditional {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn macros(pairs: &[(&str, &str)]) -> MacroTable {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_conditionals_and_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("main.wgsl");
        fs::write(
            &entry,
            "const steps: u32 = STEP_LIMIT;\n\
             #ifdef GENERATION_FINISHED\n\
             let ready = true;\n\
             #else\n\
             let ready = false;\n\
             #endif\n\
             #ifndef HEATMAP\n\
             let plain = 1;\n\
             #endif\n",
        )
        .unwrap();

        let out = preprocess(
            dir.path(),
            &entry,
            &macros(&[("STEP_LIMIT", "100u"), ("GENERATION_FINISHED", "")]),
        )
        .unwrap();
        assert_eq!(
            out.source,
            "const steps: u32 = 100u;\nlet ready = true;\nlet plain = 1;\n"
        );

        let out = preprocess(dir.path(), &entry, &macros(&[("HEATMAP", "")])).unwrap();
        assert_eq!(out.source, "const steps: u32 = STEP_LIMIT;\nlet ready = false;\n");
    }

    #[test]
    fn test_includes_are_tracked_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("as")).unwrap();
        fs::write(dir.path().join("common.wgsl"), "#define SIDE 8\nfn common() {}\n").unwrap();
        fs::write(
            dir.path().join("as/grid.wgsl"),
            "#include \"common.wgsl\"\n#include \"common.wgsl\"\nconst side = SIDE;\n",
        )
        .unwrap();

        let out = preprocess(dir.path(), &dir.path().join("as/grid.wgsl"), &MacroTable::default())
            .unwrap();
        assert_eq!(out.source, "fn common() {}\nconst side = 8;\n");
        assert_eq!(out.dependencies.len(), 2);
        assert!(out.dependencies[1].ends_with("common.wgsl"));
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("bad.wgsl");

        fs::write(&entry, "#include \"missing.wgsl\"\n").unwrap();
        assert!(matches!(
            preprocess(dir.path(), &entry, &MacroTable::default()),
            Err(PreprocessError::IncludeNotFound { line: 1, .. })
        ));

        fs::write(&entry, "#ifdef A\nfn a() {}\n").unwrap();
        assert!(matches!(
            preprocess(dir.path(), &entry, &MacroTable::default()),
            Err(PreprocessError::UnbalancedConditional { .. })
        ));

        fs::write(&entry, "#pragma once\n").unwrap();
        assert!(matches!(
            preprocess(dir.path(), &entry, &MacroTable::default()),
            Err(PreprocessError::UnknownDirective { .. })
        ));
    }
}
