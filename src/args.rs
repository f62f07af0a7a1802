// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Option grammar of the provisioning runner.
//!
//! Options are not the usual GNU style flags. Every argument is either a
//! __long option__, `name` or `name:value`, or a __short option__, `-x`,
//! `-x:value`, or a squeezed `-xyz` that turns on flags x, y, and z all at
//! once. Key-value pairs cannot be squeezed.
//!
//! # Option Dependencies
//!
//! Some options only mean something in the context of another option, e.g.,
//! `dryRun` and `offsetID` tweak `run`, and `listDisabledSteps` tweaks
//! `list`. Such options declare their __parent__. Options are evaluated in
//! topological order of these edges, so a parent is always resolved before
//! the options that depend on it. Only options without a parent produce
//! [`Action`]s; dependent options are folded into the action of their parent.

use std::collections::{HashMap, HashSet, VecDeque};

/// Value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Boolean switch.
    Flag,

    /// Free text, requires a value.
    Text,

    /// Integer, bare flag means one.
    Number,
}

/// Option descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Long name of option.
    pub name: &'static str,

    /// Single letter shorthand.
    pub short: Option<char>,

    /// Value type.
    pub kind: Kind,

    /// Flag value when absent from command line.
    pub default_on: bool,

    /// Option this one modifies.
    pub dependency_of: Option<&'static str>,

    /// Alternative names of this option when given as value of its parent,
    /// e.g., `list:includeDisabled`.
    pub aliases: &'static [&'static str],

    /// One line summary for usage text.
    pub about: &'static str,
}

impl OptionSpec {
    const fn new(name: &'static str, kind: Kind, about: &'static str) -> Self {
        Self {
            name,
            short: None,
            kind,
            default_on: false,
            dependency_of: None,
            aliases: &[],
            about,
        }
    }

    const fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    const fn on(mut self) -> Self {
        self.default_on = true;
        self
    }

    const fn of(mut self, parent: &'static str) -> Self {
        self.dependency_of = Some(parent);
        self
    }

    const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

/// Every option the runner understands, in declaration order.
pub const OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("help", Kind::Flag, "show this usage text").short('h'),
    OptionSpec::new("list", Kind::Flag, "list steps of playbook").short('l'),
    OptionSpec::new("listDisabledSteps", Kind::Flag, "include disabled steps in listing")
        .of("list")
        .aliases(&["includeDisabled"]),
    OptionSpec::new("listApps", Kind::Flag, "list every app of playbook"),
    OptionSpec::new("disarm", Kind::Flag, "remove armed resume checkpoint"),
    OptionSpec::new("run", Kind::Flag, "run playbook steps"),
    OptionSpec::new("check", Kind::Flag, "abort run if environment is not ready")
        .on()
        .of("run"),
    OptionSpec::new("dryRun", Kind::Flag, "walk steps without executing anything")
        .short('d')
        .of("run"),
    OptionSpec::new("offsetID", Kind::Text, "skip every step until the one with this id")
        .of("run"),
    OptionSpec::new("arm", Kind::Text, "arm resume checkpoint at step id, then reboot"),
    OptionSpec::new("verbose", Kind::Number, "diagnostic verbosity, 0 to 2").short('v'),
];

/// Order option descriptors so that parents precede their dependents.
///
/// Options that are ready at the same time keep their declaration order.
/// Options caught in a dependency cycle are left out.
pub fn evaluation_order(specs: &[OptionSpec]) -> Vec<&OptionSpec> {
    let mut pending: HashMap<&str, usize> = specs
        .iter()
        .map(|spec| {
            let blocked = spec
                .dependency_of
                .filter(|parent| specs.iter().any(|other| other.name == *parent))
                .map_or(0, |_| 1);
            (spec.name, blocked)
        })
        .collect();

    let mut ready = specs
        .iter()
        .filter(|spec| pending.get(spec.name) == Some(&0))
        .collect::<VecDeque<_>>();
    let mut order = Vec::with_capacity(specs.len());

    while let Some(spec) = ready.pop_front() {
        order.push(spec);
        for child in specs
            .iter()
            .filter(|child| child.dependency_of == Some(spec.name))
        {
            if let Some(count) = pending.get_mut(child.name) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(child);
                }
            }
        }
    }

    order
}

/// Build usage text from option descriptors.
///
/// Dependent options are listed right under their parent.
pub fn usage() -> String {
    let mut out = String::from(
        "Usage: provisor [--config <path>] [options]...\n\n\
         Options are given as `name`, `name:value`, `-x`, `-x:value`, or `-xyz`.\n\nOptions:\n",
    );

    let order = evaluation_order(OPTIONS);
    for root in order.iter().filter(|spec| spec.dependency_of.is_none()) {
        out.push_str(usage_line(root, "  ").as_str());
        for child in order
            .iter()
            .filter(|spec| spec.dependency_of == Some(root.name))
        {
            out.push_str(usage_line(child, "    ").as_str());
        }
    }

    out
}

fn usage_line(spec: &OptionSpec, indent: &str) -> String {
    let mut name = spec.name.to_string();
    match spec.kind {
        Kind::Text => name.push_str(":<value>"),
        Kind::Number => name.push_str("[:<n>]"),
        Kind::Flag => {}
    }
    if let Some(short) = spec.short {
        name.push_str(format!(", -{short}").as_str());
    }

    let mut about = spec.about.to_string();
    if spec.default_on {
        about.push_str(" [default: true]");
    }

    format!("{indent}{name:<28}{about}\n")
}

/// Parsed value of an option.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Flag(bool),
    Text(Option<String>),
    Number(i64),
}

impl Value {
    fn default_for(spec: &OptionSpec) -> Self {
        match spec.kind {
            Kind::Flag => Self::Flag(spec.default_on),
            Kind::Text => Self::Text(None),
            Kind::Number => Self::Number(0),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Text(text) => text.is_some(),
            Self::Number(number) => *number != 0,
        }
    }
}

/// Raw option values keyed by option name.
#[derive(Debug)]
struct Values<'a> {
    specs: &'a [OptionSpec],
    values: HashMap<&'static str, Value>,
    explicit: HashSet<&'static str>,
}

impl<'a> Values<'a> {
    fn new(specs: &'a [OptionSpec]) -> Self {
        Self {
            specs,
            values: specs
                .iter()
                .map(|spec| (spec.name, Value::default_for(spec)))
                .collect(),
            explicit: HashSet::new(),
        }
    }

    fn by_name(&self, name: &str) -> Option<&'a OptionSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    fn by_short(&self, short: char) -> Option<&'a OptionSpec> {
        self.specs.iter().find(|spec| spec.short == Some(short))
    }

    fn set(&mut self, spec: &OptionSpec, value: Value) {
        self.values.insert(spec.name, value);
        self.explicit.insert(spec.name);
    }

    fn parse_token(&mut self, token: &str) -> Result<()> {
        if let Some(long) = token.strip_prefix("--") {
            return self.parse_long(long, token);
        }

        if let Some(short) = token.strip_prefix('-') {
            return self.parse_short(short, token);
        }

        self.parse_long(token, token)
    }

    fn parse_long(&mut self, body: &str, token: &str) -> Result<()> {
        let (name, value) = match body.split_once(':') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let spec = self
            .by_name(name)
            .ok_or_else(|| ParseError::UnknownOption(token.into()))?;

        self.assign(spec, value, token)
    }

    fn parse_short(&mut self, body: &str, token: &str) -> Result<()> {
        // INVARIANT: A colon decides between key-value and squeezed flags.
        if let Some((keys, value)) = body.split_once(':') {
            let mut letters = keys.chars();
            let key = match (letters.next(), letters.next()) {
                (Some(key), None) => key,
                _ => return Err(ParseError::SqueezedKeyValue(token.into())),
            };
            let spec = self
                .by_short(key)
                .ok_or_else(|| ParseError::UnknownShortFlag {
                    flag: key,
                    token: token.into(),
                })?;

            return self.assign(spec, Some(value), token);
        }

        if body.is_empty() {
            return Err(ParseError::UnknownOption(token.into()));
        }

        for flag in body.chars() {
            let spec = self
                .by_short(flag)
                .ok_or_else(|| ParseError::UnknownShortFlag {
                    flag,
                    token: token.into(),
                })?;
            self.assign(spec, None, token)?;
        }

        Ok(())
    }

    fn assign(&mut self, spec: &OptionSpec, value: Option<&str>, token: &str) -> Result<()> {
        let invalid = || ParseError::InvalidValue {
            option: spec.name,
            token: token.into(),
        };

        let parsed = match (spec.kind, value) {
            (Kind::Flag, None) => Value::Flag(true),
            (Kind::Flag, Some(value)) => match coerce_bool(value) {
                Some(flag) => Value::Flag(flag),
                None => {
                    // INVARIANT: A value naming a dependent option turns on both.
                    let dependency = self
                        .specs
                        .iter()
                        .find(|other| {
                            other.dependency_of == Some(spec.name)
                                && other.kind == Kind::Flag
                                && other.answers_to(value)
                        })
                        .ok_or_else(invalid)?;
                    self.set(dependency, Value::Flag(true));
                    Value::Flag(true)
                }
            },
            (Kind::Number, None) => Value::Number(1),
            (Kind::Number, Some(value)) => match coerce_bool(value) {
                Some(flag) => Value::Number(i64::from(flag)),
                None => Value::Number(value.parse::<i64>().map_err(|_| invalid())?),
            },
            (Kind::Text, Some(value)) if !value.is_empty() => Value::Text(Some(value.into())),
            (Kind::Text, _) => {
                return Err(ParseError::MissingValue {
                    option: spec.name,
                    token: token.into(),
                })
            }
        };

        self.set(spec, parsed);
        Ok(())
    }

    fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::Flag(true)))
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(Value::Text(text)) => text.clone(),
            _ => None,
        }
    }

    fn number(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(Value::Number(number)) => *number,
            _ => 0,
        }
    }
}

fn coerce_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse raw command-line arguments.
///
/// # Errors
///
/// - Return [`ParseError`] naming the offending token if any argument is
///   malformed.
pub fn parse(raw: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Args> {
    let mut values = Values::new(OPTIONS);
    for token in raw {
        values.parse_token(token.as_ref())?;
    }

    let dry_run = values.flag("dryRun");
    let dangling = evaluation_order(OPTIONS)
        .into_iter()
        .filter(|spec| values.explicit.contains(spec.name))
        .filter(|spec| {
            spec.dependency_of
                .is_some_and(|parent| !values.values.get(parent).is_some_and(Value::is_truthy))
        })
        // INVARIANT: Dry run forces run, so it never dangles.
        .filter(|spec| !(spec.name == "dryRun" || (dry_run && spec.dependency_of == Some("run"))))
        .map(|spec| spec.name)
        .collect();

    Ok(Args {
        help: values.flag("help"),
        // INVARIANT: Dry run forces run.
        run: values.flag("run") || dry_run,
        check: values.flag("check"),
        dry_run,
        list: values.flag("list"),
        list_apps: values.flag("listApps"),
        list_disabled_steps: values.flag("listDisabledSteps"),
        offset_id: values.text("offsetID"),
        verbose: values.number("verbose").clamp(0, u8::MAX.into()) as u8,
        arm: values.text("arm"),
        disarm: values.flag("disarm"),
        dangling,
    })
}

/// Typed option set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub help: bool,
    pub run: bool,
    pub check: bool,
    pub dry_run: bool,
    pub list: bool,
    pub list_apps: bool,
    pub list_disabled_steps: bool,
    pub offset_id: Option<String>,
    pub verbose: u8,
    pub arm: Option<String>,
    pub disarm: bool,
    dangling: Vec<&'static str>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            help: false,
            run: false,
            check: true,
            dry_run: false,
            list: false,
            list_apps: false,
            list_disabled_steps: false,
            offset_id: None,
            verbose: 0,
            arm: None,
            disarm: false,
            dangling: Vec::new(),
        }
    }
}

impl Args {
    /// Actions to perform, in declaration order.
    pub fn actions(&self) -> Vec<Action> {
        evaluation_order(OPTIONS)
            .into_iter()
            .filter(|spec| spec.dependency_of.is_none())
            .filter_map(|spec| self.action_for(spec.name))
            .collect()
    }

    /// Dependent options that were given without their parent option.
    pub fn dangling(&self) -> &[&'static str] {
        self.dangling.as_slice()
    }

    fn action_for(&self, name: &str) -> Option<Action> {
        match name {
            "help" if self.help => Some(Action::Help),
            "list" if self.list => Some(Action::List {
                include_disabled: self.list_disabled_steps,
            }),
            "listApps" if self.list_apps => Some(Action::ListApps),
            "disarm" if self.disarm => Some(Action::Disarm),
            "run" if self.run => Some(Action::Run {
                dry_run: self.dry_run,
                check: self.check,
                resume_id: self.offset_id.clone(),
            }),
            "arm" => self.arm.clone().map(|step_id| Action::Arm { step_id }),
            _ => None,
        }
    }
}

/// Something the runner was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print usage text.
    Help,

    /// List steps of playbook.
    List { include_disabled: bool },

    /// List every app of playbook.
    ListApps,

    /// Remove armed resume checkpoint.
    Disarm,

    /// Run playbook steps.
    Run {
        dry_run: bool,
        check: bool,
        resume_id: Option<String>,
    },

    /// Arm resume checkpoint, then reboot.
    Arm { step_id: String },
}

/// Malformed command-line argument.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Short key-value pair with more than one letter before the colon.
    #[error(
        "no squeezing for key-value pairs, use only one letter between '-' and ':' \
         (flawed argument: {0:?})"
    )]
    SqueezedKeyValue(String),

    /// Long option name is not known.
    #[error("unknown option {0:?}")]
    UnknownOption(String),

    /// Short flag letter is not known.
    #[error("unknown short flag '-{flag}' in {token:?}")]
    UnknownShortFlag { flag: char, token: String },

    /// Text option given without value.
    #[error("option {option:?} requires a value, e.g., '{option}:<value>' (flawed argument: {token:?})")]
    MissingValue { option: &'static str, token: String },

    /// Value cannot be coerced to option type.
    #[error("invalid value for option {option:?} (flawed argument: {token:?})")]
    InvalidValue { option: &'static str, token: String },
}

/// Friendly result alias :3
pub type Result<T, E = ParseError> = std::result::Result<T, E>;
