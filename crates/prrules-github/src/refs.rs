//! Parsing of the identifiers a GitHub Actions run hands us.

use std::fmt;
use std::str::FromStr;

use prrules_types::PrRulesError;

/// `owner/name`, as found in `GITHUB_REPOSITORY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl FromStr for Repository {
    type Err = PrRulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PrRulesError::CollaboratorFailure {
            collaborator: "github".into(),
            message: format!("repository '{s}' is not of the form owner/name"),
        };
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Extract the pull number from `refs/pull/<n>/merge` (or `/head`).
pub fn parse_pull_number(git_ref: &str) -> Result<u64, PrRulesError> {
    let invalid = || PrRulesError::CollaboratorFailure {
        collaborator: "github".into(),
        message: format!("ref '{git_ref}' is not a pull request ref"),
    };
    let rest = git_ref.trim().strip_prefix("refs/pull/").ok_or_else(invalid)?;
    let (number, kind) = rest.split_once('/').ok_or_else(invalid)?;
    if !matches!(kind, "merge" | "head") {
        return Err(invalid());
    }
    number.parse().map_err(|_| invalid())
}
