use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Config Entity Trait
// ============================================================================

pub(crate) trait ConfigEntity: DeserializeOwned {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn config_path(id: &str) -> Result<PathBuf>;
    fn config_dir() -> Result<PathBuf>;
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error;

    /// Entity-specific validation. Called by `config::load()` after parsing.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn load<T: ConfigEntity>(id: &str) -> Result<T> {
    let path = T::config_path(id)?;
    if !path.exists() {
        let suggestions = find_similar_ids::<T>(id);
        return Err(T::not_found_error(id.to_string(), suggestions));
    }
    let entity: T = read_entity(&path, id)?;
    entity.validate()?;
    Ok(entity)
}

fn read_entity<T: ConfigEntity>(path: &Path, id: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", path.display()))))?;
    let mut entity: T = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    entity.set_id(id.to_string());
    Ok(entity)
}

pub(crate) fn list_ids<T: ConfigEntity>() -> Result<Vec<String>> {
    let dir = T::config_dir()?;
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&dir)
        .map_err(|e| Error::internal_io(e.to_string(), Some("list directory".to_string())))?;

    let mut ids: Vec<String> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    ids.sort();
    Ok(ids)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev_row: Vec<usize> = (0..=b_len).collect();
    let mut curr_row: Vec<usize> = vec![0; b_len + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = if a_char == b_char { 0 } else { 1 };
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_len]
}

/// Rank `candidates` by similarity to `target`: prefix, then suffix, then
/// Levenshtein distance <= 3. Returns up to 3 matches.
pub(crate) fn similar_names<'a, I>(target: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let target_lower = target.to_lowercase();
    let mut matches: Vec<(String, usize)> = Vec::new();

    for id in candidates {
        let id_lower = id.to_lowercase();
        if id_lower == target_lower {
            continue;
        }

        if id_lower.starts_with(&target_lower) {
            matches.push((id.to_string(), 0));
            continue;
        }

        if id_lower.ends_with(&target_lower) {
            matches.push((id.to_string(), 1));
            continue;
        }

        let dist = levenshtein(&target_lower, &id_lower);
        if dist <= 3 {
            matches.push((id.to_string(), dist + 10));
        }
    }

    matches.sort_by_key(|(_, priority)| *priority);
    matches.into_iter().take(3).map(|(id, _)| id).collect()
}

pub(crate) fn find_similar_ids<T: ConfigEntity>(target: &str) -> Vec<String> {
    match list_ids::<T>() {
        Ok(ids) => similar_names(target, ids.iter().map(String::as_str)),
        Err(_) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_names_prefers_prefix_matches() {
        let names = ["api", "api-worker", "web", "apx"];
        let found = similar_names("api", names.iter().copied());
        assert_eq!(found.first().map(String::as_str), Some("api-worker"));
        assert!(found.contains(&"apx".to_string()));
        assert!(!found.contains(&"api".to_string()));
    }

    #[test]
    fn similar_names_ignores_distant_names() {
        let names = ["database", "frontend"];
        assert!(similar_names("api", names.iter().copied()).is_empty());
    }
}
