//! The integer tag on a service's image reference.
//!
//! A built service's image is `{image_name}:{N}` in the descriptor. Extraction
//! and rewriting share one pattern so a rewritten descriptor always extracts
//! to the version that was written.

use regex::{Captures, Regex};

use crate::error::{Error, Result};

fn image_pattern(image_name: &str) -> Result<Regex> {
    let pattern = format!(
        r#"(?m)^([ \t]*(?:-[ \t]*)?image:[ \t]*["']?{}:)(\d+)(["']?[ \t]*\r?)$"#,
        regex::escape(image_name)
    );
    Regex::new(&pattern).map_err(|e| {
        Error::validation_invalid_argument("image_name", format!("Invalid regex: {}", e), None)
    })
}

/// Version referenced for `image_name`, or 0 when the descriptor has none.
pub fn extract(descriptor: &str, image_name: &str) -> Result<u32> {
    let re = image_pattern(image_name)?;
    Ok(re
        .captures(descriptor)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0))
}

/// Replace the version of every `image_name` reference. Everything else,
/// including other services' references, is left byte-for-byte identical.
/// Returns `None` when there is nothing to rewrite.
pub fn rewrite(descriptor: &str, image_name: &str, version: u32) -> Result<Option<String>> {
    let re = image_pattern(image_name)?;
    if !re.is_match(descriptor) {
        return Ok(None);
    }

    let replaced = re.replace_all(descriptor, |caps: &Captures| {
        format!("{}{}{}", &caps[1], version, &caps[3])
    });
    Ok(Some(replaced.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = "name: myapp\nservices:\n  api:\n    image: myapp-api:3\n    restart: unless-stopped\n  api-worker:\n    image: \"myapp-api-worker:7\"\n  db:\n    image: postgres:16\n";

    #[test]
    fn extract_finds_the_named_image_only() {
        assert_eq!(extract(DESCRIPTOR, "myapp-api").unwrap(), 3);
        assert_eq!(extract(DESCRIPTOR, "myapp-api-worker").unwrap(), 7);
        assert_eq!(extract(DESCRIPTOR, "myapp-web").unwrap(), 0);
        assert_eq!(extract("", "myapp-api").unwrap(), 0);
    }

    #[test]
    fn non_numeric_tag_is_version_zero() {
        assert_eq!(extract("    image: myapp-api:latest\n", "myapp-api").unwrap(), 0);
    }

    #[test]
    fn rewrite_changes_only_the_target_tag() {
        let out = rewrite(DESCRIPTOR, "myapp-api", 4).unwrap().unwrap();
        assert_eq!(out, DESCRIPTOR.replace("myapp-api:3", "myapp-api:4"));
        assert_eq!(extract(&out, "myapp-api").unwrap(), 4);
        assert_eq!(extract(&out, "myapp-api-worker").unwrap(), 7);
    }

    #[test]
    fn rewrite_keeps_quotes_and_line_endings() {
        let crlf = "services:\r\n  web:\r\n    image: 'myapp-web:12'\r\n";
        let out = rewrite(crlf, "myapp-web", 11).unwrap().unwrap();
        assert_eq!(out, "services:\r\n  web:\r\n    image: 'myapp-web:11'\r\n");
    }

    #[test]
    fn rewrite_without_reference_is_none() {
        assert!(rewrite(DESCRIPTOR, "myapp-web", 1).unwrap().is_none());
    }

    #[test]
    fn image_name_metacharacters_are_literal() {
        let text = "    image: myappXapi:9\n";
        assert_eq!(extract(text, "myapp.api").unwrap(), 0);
    }
}
