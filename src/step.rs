// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step model.
//!
//! A __step__ is a titled group of __substeps__ that applies to one or more
//! machine categories. A substep is the smallest schedulable unit of work,
//! i.e., either a listing of apps to install one at a time through the
//! configured install command, or a listing of raw shell commands to run one
//! at a time.
//!
//! Steps are defined statically through a playbook, and never change during a
//! run. The only piece of a step that outlives a run is its `id`, which a
//! resume checkpoint may refer to.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Title or identifier that halts a run the moment it is reached.
pub const STOPPER: &str = "stopper";

/// Coarse tag used to filter which steps apply to a machine template.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Applies to every template.
    Common,

    #[default]
    Desktop,

    HomeServer,

    Termux,
}

impl Display for Category {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Common => "common",
            Self::Desktop => "desktop",
            Self::HomeServer => "homeServer",
            Self::Termux => "termux",
        };
        fmt.write_str(name)
    }
}

/// Category tags of a step.
///
/// Playbooks may either give a single tag, or a listing of tags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Categories {
    One(Category),
    Many(Vec<Category>),
}

impl Categories {
    /// Check if tags contain target category.
    pub fn contains(&self, category: Category) -> bool {
        match self {
            Self::One(tag) => *tag == category,
            Self::Many(tags) => tags.contains(&category),
        }
    }
}

impl Default for Categories {
    fn default() -> Self {
        Self::One(Category::Common)
    }
}

impl Display for Categories {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::One(tag) => write!(fmt, "{tag}"),
            Self::Many(tags) => {
                let tags = tags.iter().map(ToString::to_string).collect::<Vec<_>>();
                fmt.write_str(tags.join("+").as_str())
            }
        }
    }
}

/// A titled group of substeps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Display title.
    pub title: String,

    /// Category tags that select which templates this step applies to.
    #[serde(default)]
    pub category: Categories,

    /// Disabled steps are never executed.
    #[serde(default = "enabled", skip_serializing_if = "is_enabled")]
    pub enabled: bool,

    /// Stable identifier for dependency and checkpoint references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Identifiers of steps that must complete before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Ordered units of work.
    #[serde(default, rename = "substep", skip_serializing_if = "Vec::is_empty")]
    pub substeps: Vec<Substep>,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            title: String::new(),
            category: Categories::default(),
            enabled: true,
            id: None,
            depends_on: Vec::new(),
            substeps: Vec::new(),
        }
    }
}

impl Step {
    /// Construct new enabled step with no substeps.
    pub fn new(title: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            category: Categories::One(category),
            ..Default::default()
        }
    }

    /// Set stable identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Append substep.
    pub fn with_substep(mut self, substep: Substep) -> Self {
        self.substeps.push(substep);
        self
    }

    /// Add dependency on another step identifier.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Disable step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check if step applies to target template.
    ///
    /// Common steps apply to every template.
    pub fn applies_to(&self, template: Category) -> bool {
        self.category.contains(Category::Common) || self.category.contains(template)
    }

    /// Check if step is the stopper sentinel.
    pub fn is_stopper(&self) -> bool {
        self.title == STOPPER || self.id.as_deref() == Some(STOPPER)
    }

    /// Check if step carries target identifier.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    /// Iterate through every app this step installs.
    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.substeps
            .iter()
            .flat_map(|substep| substep.apps.iter().flatten())
            .map(String::as_str)
    }
}

/// Smallest schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Substep {
    /// Optional display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Disabled substeps are never executed.
    #[serde(default = "enabled", skip_serializing_if = "is_enabled")]
    pub enabled: bool,

    /// Packages to install one at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<Vec<String>>,

    /// Raw shell commands to run one at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
}

impl Default for Substep {
    fn default() -> Self {
        Self {
            title: None,
            enabled: true,
            apps: None,
            cmd: None,
        }
    }
}

impl Substep {
    /// Construct substep that installs apps.
    pub fn apps(apps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            apps: Some(apps.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Construct substep that runs shell commands.
    pub fn cmd(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: Some(cmd.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Set display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Disable substep.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check if substep has no work to do.
    pub fn is_noop(&self) -> bool {
        self.apps.as_ref().is_none_or(Vec::is_empty) && self.cmd.as_ref().is_none_or(Vec::is_empty)
    }

    /// Check if substep declares both apps and commands.
    pub fn is_ambiguous(&self) -> bool {
        self.apps.is_some() && self.cmd.is_some()
    }
}

fn enabled() -> bool {
    true
}

fn is_enabled(value: &bool) -> bool {
    *value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case(Categories::One(Category::Common), Category::HomeServer, true; "common always applies")]
    #[test_case(Categories::One(Category::Desktop), Category::Desktop, true; "matching template")]
    #[test_case(Categories::One(Category::Desktop), Category::HomeServer, false; "other template")]
    #[test_case(Categories::Many(vec![Category::Desktop, Category::Termux]), Category::Termux, true; "tag listing")]
    #[test]
    fn step_applies_to_template(category: Categories, template: Category, expect: bool) {
        let step = Step {
            title: "blah".into(),
            category,
            ..Default::default()
        };
        self::assert_eq!(step.applies_to(template), expect);
    }

    #[test]
    fn step_stopper_by_title_or_id() {
        assert!(Step::new(STOPPER, Category::Common).is_stopper());
        assert!(Step::new("halt here", Category::Desktop)
            .with_id(STOPPER)
            .is_stopper());
        assert!(!Step::new("halt here", Category::Desktop).is_stopper());
    }

    #[test]
    fn step_lists_all_apps() {
        let step = Step::new("tools", Category::Common)
            .with_substep(Substep::apps(["git", "curl"]))
            .with_substep(Substep::cmd(["echo hi"]))
            .with_substep(Substep::apps(["rsync"]));
        assert_eq!(step.apps().collect::<Vec<_>>(), vec!["git", "curl", "rsync"]);
    }

    #[test]
    fn substep_noop_and_ambiguity() {
        assert!(Substep::default().is_noop());
        assert!(Substep::apps(Vec::<String>::new()).is_noop());
        assert!(!Substep::cmd(["ls"]).is_noop());

        let mut both = Substep::apps(["git"]);
        both.cmd = Some(vec!["echo hi".into()]);
        assert!(both.is_ambiguous());
        assert!(!Substep::apps(["git"]).is_ambiguous());
    }
}
