use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::services::FormRuleSet;

/// Load the form rule table. The built-in table is used when no path is
/// given; a file that is unreadable or fails validation is a startup error.
pub fn load_form_rules(path: Option<&Path>) -> Result<FormRuleSet> {
    let Some(path) = path else {
        return Ok(FormRuleSet::reference());
    };

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read form rules from {}", path.display()))?;
    let rules = FormRuleSet::from_json(&json)
        .with_context(|| format!("Invalid form rule table in {}", path.display()))?;

    info!("Loaded form rules from {}", path.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_rules_without_path() {
        assert_eq!(load_form_rules(None).unwrap(), FormRuleSet::reference());
    }

    #[test]
    fn test_rules_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&FormRuleSet::reference()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        assert_eq!(load_form_rules(Some(file.path())).unwrap(), FormRuleSet::reference());
    }

    #[test]
    fn test_corrupt_rules_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"pushup": []}"#).unwrap();

        let err = load_form_rules(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Invalid form rule table"));
    }

    #[test]
    fn test_missing_rules_file_fails() {
        assert!(load_form_rules(Some(Path::new("/nonexistent/rules.json"))).is_err());
    }
}
