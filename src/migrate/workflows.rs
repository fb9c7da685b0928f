//! CI workflow file rewriting.
//!
//! Rewrites branch filters in the YAML files under a repository's workflows
//! directory, switching the source branch to the target branch wherever it
//! appears in a `branches:` list. The rewriter is deliberately textual: it
//! touches only list-of-branches positions (inline `branches: [ ... ]` and
//! block `- <branch>` items) and leaves everything else byte-for-byte alone,
//! so comments, anchors, and unrelated scalars survive untouched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;

/// Request to rewrite one repository's workflow files.
#[derive(Debug, Clone)]
pub struct RewriteRequest<'a> {
    pub repository_path: &'a Path,
    /// Repository-relative directory holding the workflow files.
    pub workflows_directory: &'a str,
    pub source_branch: &'a str,
    pub target_branch: &'a str,
}

/// What the rewrite did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowOutcome {
    /// Repository-relative paths of files whose content changed.
    pub updated_files: Vec<PathBuf>,
    /// Whether any textual mention of the source branch remains anywhere in
    /// the scanned files after rewriting.
    pub remaining_main_references: bool,
}

/// Rewrite every YAML file under the workflows directory.
///
/// A missing workflows directory is not an error; the outcome is empty.
pub fn rewrite_branch_filters(request: &RewriteRequest<'_>) -> anyhow::Result<WorkflowOutcome> {
    let directory = request.repository_path.join(request.workflows_directory);
    if !directory.is_dir() {
        return Ok(WorkflowOutcome::default());
    }

    let mut files = Vec::new();
    collect_yaml_files(&directory, &mut files)
        .with_context(|| format!("listing workflow files in {}", directory.display()))?;
    files.sort();

    let mention =
        Regex::new(&format!(r"\b{}\b", regex::escape(request.source_branch))).expect("valid regex");

    let mut outcome = WorkflowOutcome::default();
    for file in files {
        let original = fs::read_to_string(&file)
            .with_context(|| format!("reading workflow file {}", file.display()))?;
        let rewritten = rewrite_content(&original, request.source_branch, request.target_branch);

        if rewritten != original {
            write_atomically(&file, &rewritten)
                .with_context(|| format!("writing workflow file {}", file.display()))?;
            let relative = file
                .strip_prefix(request.repository_path)
                .unwrap_or(&file)
                .to_path_buf();
            outcome.updated_files.push(relative);
        }

        if mention.is_match(&rewritten) {
            outcome.remaining_main_references = true;
        }
    }

    Ok(outcome)
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml_files(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

/// Replace the file atomically, preserving its permissions.
fn write_atomically(path: &Path, content: &str) -> anyhow::Result<()> {
    use std::io::Write;

    let permissions = fs::metadata(path)?.permissions();
    let directory = path.parent().context("workflow file has no parent")?;
    let mut temp = tempfile::NamedTempFile::new_in(directory)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().set_permissions(permissions)?;
    temp.persist(path)?;
    Ok(())
}

/// Rewrite branch filters in one file's content.
fn rewrite_content(content: &str, source: &str, target: &str) -> String {
    let mut output = Vec::with_capacity(content.lines().count());
    // Indentation of the `branches:` key while inside its block list
    let mut block_indent: Option<usize> = None;

    for line in content.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };

        let rewritten = rewrite_line(body, source, target, &mut block_indent);
        output.push(format!("{rewritten}{newline}"));
    }

    output.concat()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn rewrite_line(
    line: &str,
    source: &str,
    target: &str,
    block_indent: &mut Option<usize>,
) -> String {
    let trimmed = line.trim();

    // Inside a block list: rewrite matching `- <branch>` items, leave the
    // block on the first line that is neither blank, a comment, nor a
    // more-indented list item.
    if let Some(key_indent) = *block_indent {
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return line.to_string();
        }
        if indent_of(line) > key_indent && trimmed.starts_with('-') {
            return rewrite_block_item(line, source, target);
        }
        *block_indent = None;
    }

    if let Some(key_end) = branches_key_end(line) {
        let after_key = &line[key_end..];
        if after_key.trim().is_empty() || after_key.trim_start().starts_with('#') {
            // Block-list form: the items follow on their own lines
            *block_indent = Some(indent_of(line));
            return line.to_string();
        }
        if after_key.trim_start().starts_with('[') {
            return rewrite_inline_list(line, key_end, source, target);
        }
    }

    line.to_string()
}

/// Byte offset just past `branches:` when the line carries that key.
fn branches_key_end(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("branches")?;
    let rest = rest.trim_start();
    rest.strip_prefix(':')?;
    let key_offset = line.len() - trimmed.len();
    let colon = line[key_offset..].find(':').expect("colon present");
    Some(key_offset + colon + 1)
}

/// Rewrite `branches: [ main, develop ]`, preserving spacing and quotes.
fn rewrite_inline_list(line: &str, key_end: usize, source: &str, target: &str) -> String {
    let after_key = &line[key_end..];
    let Some(open) = after_key.find('[') else {
        return line.to_string();
    };
    let Some(close) = after_key[open..].find(']').map(|i| open + i) else {
        return line.to_string();
    };

    let items = &after_key[open + 1..close];
    let rewritten_items = items
        .split(',')
        .map(|item| rewrite_scalar(item, source, target))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{}{}{}{}",
        &line[..key_end],
        &after_key[..open + 1],
        rewritten_items,
        &after_key[close..]
    )
}

/// Rewrite a `- <branch>` list item, preserving the dash, spacing, quoting,
/// and any trailing comment.
fn rewrite_block_item(line: &str, source: &str, target: &str) -> String {
    let dash = match line.find('-') {
        Some(index) => index,
        None => return line.to_string(),
    };
    let value_start = dash + 1;
    let value = &line[value_start..];

    // Split off a trailing comment so it survives untouched
    let (scalar, comment) = match value.find('#') {
        Some(hash) => value.split_at(hash),
        None => (value, ""),
    };

    format!(
        "{}{}{}",
        &line[..value_start],
        rewrite_scalar(scalar, source, target),
        comment
    )
}

/// Rewrite one scalar (whitespace and optional quotes preserved) when it
/// equals the source branch.
fn rewrite_scalar(scalar: &str, source: &str, target: &str) -> String {
    let leading_len = scalar.len() - scalar.trim_start().len();
    let trailing_len = scalar.trim_start().len() - scalar.trim().len();
    let (leading, rest) = scalar.split_at(leading_len);
    let (core, trailing) = rest.split_at(rest.len() - trailing_len);

    let replaced = if core == source {
        target.to_string()
    } else if core.len() >= 2
        && (core.starts_with('"') && core.ends_with('"')
            || core.starts_with('\'') && core.ends_with('\''))
        && &core[1..core.len() - 1] == source
    {
        let quote = &core[..1];
        format!("{quote}{target}{quote}")
    } else {
        core.to_string()
    };

    format!("{leading}{replaced}{trailing}")
}
