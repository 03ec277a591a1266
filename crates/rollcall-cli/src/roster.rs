//! TOML roster files.
//!
//! ```toml
//! [groups]
//! cs101 = ["s1", "s2", "s3"]
//! ```

use rollcall_core::{PersonId, RosterError, StaticRoster};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RosterFile {
    #[serde(default)]
    groups: BTreeMap<String, Vec<PersonId>>,
}

pub fn load_roster(path: &Path) -> Result<StaticRoster, RosterError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RosterError::Backend(format!("cannot read {}: {e}", path.display())))?;
    parse_roster(&text).map_err(|e| RosterError::Backend(format!("{}: {e}", path.display())))
}

fn parse_roster(text: &str) -> Result<StaticRoster, toml::de::Error> {
    let file: RosterFile = toml::from_str(text)?;
    Ok(file
        .groups
        .into_iter()
        .fold(StaticRoster::new(), |roster, (group, persons)| {
            roster.with_group(group, persons)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::RosterProvider;

    #[test]
    fn test_parse_groups_in_file_order() {
        let roster = parse_roster(
            r#"
            [groups]
            cs101 = ["s3", "s1", "s2"]
            empty = []
            "#,
        )
        .unwrap();
        let ids: Vec<PersonId> = vec!["s3".into(), "s1".into(), "s2".into()];
        assert_eq!(roster.roster_of(&"cs101".into()).unwrap(), ids);
        assert!(roster.roster_of(&"empty".into()).unwrap().is_empty());
        assert!(matches!(
            roster.roster_of(&"math".into()),
            Err(RosterError::UnknownGroup(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(parse_roster("[classes]\na = [\"x\"]").is_err());
    }

    #[test]
    fn test_load_errors_are_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_roster(&dir.path().join("missing.toml")),
            Err(RosterError::Backend(_))
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[groups]\ncs101 = \"s1\"").unwrap();
        assert!(matches!(load_roster(&bad), Err(RosterError::Backend(_))));
    }
}
