//! Save decoded attachments to disk.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classify::ClassifiedPart;
use crate::error::{Result, StripError};

/// Write every attachment leaf of `classified` into `output_dir`.
///
/// Names come from the part's filename (or `part_<id>` when it has none) and
/// never overwrite an existing file. A part that fails to decode is skipped
/// with a warning.
pub fn extract_attachments(
    classified: &ClassifiedPart<'_>,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir).map_err(|e| StripError::io(output_dir, e))?;
    let mut paths = Vec::new();

    for leaf in classified.attachments() {
        let data = match leaf.part.decoded_body() {
            Ok(data) => data,
            Err(e) => {
                warn!(part_id = %leaf.part_id, error = %e, "Failed to decode attachment");
                continue;
            }
        };
        let name = match &leaf.filename {
            Some(name) => sanitize_filename_part(name, 150),
            None => format!("part_{}", sanitize_filename_part(&leaf.part_id, 20)),
        };
        let path = unique_path(&output_dir.join(name));
        std::fs::write(&path, &data).map_err(|e| StripError::io(&path, e))?;
        debug!(path = %path.display(), size = data.len(), "Extracted attachment");
        paths.push(path);
    }

    Ok(paths)
}

/// Folder name for one message's attachments: `<id>_<subject>`.
pub fn message_folder_name(id: &str, subject: Option<&str>) -> String {
    let id = sanitize_filename_part(id, 40);
    match subject {
        Some(subject) if !subject.trim().is_empty() => {
            format!("{id}_{}", sanitize_filename_part(subject, 60))
        }
        _ => id,
    }
}

/// Replace anything but alphanumerics and `-._@` with `_`, cut to
/// `max_len` characters. Leading dots are replaced too so the result is
/// never hidden or a relative path component.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let mut sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    let leading_dots = sanitized.chars().take_while(|&c| c == '.').count();
    if leading_dots > 0 {
        sanitized.replace_range(..leading_dots, &"_".repeat(leading_dots));
    }

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// If `path` already exists, append a counter to make it unique.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    parent.join(format!("{stem}_dup.{ext}"))
}
