// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declarative machine provisioning.
//!
//! Provisor takes a fresh installation of some machine to its finished state
//! by running a __playbook__: an ordered listing of steps, each made of
//! substeps that either install apps through a configured install command, or
//! run raw shell commands.
//!
//! # Run Semantics
//!
//! Steps run one at a time in declared order. Steps can be filtered by
//! machine template, disabled, or gated on other steps. Failing units of work
//! are recorded into an append-only audit log without ever stopping the run,
//! so the operator can fix them by hand afterwards. A run can be handed over
//! across a reboot through a resume checkpoint, and halted on purpose through
//! a stopper step.

pub mod args;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod env;
pub mod log;
pub mod path;
pub mod shell;
pub mod step;

pub use args::{Action, Args};
pub use checkpoint::{CheckpointStore, SystemdCheckpoint};
pub use config::{Playbook, RunConfig};
pub use engine::{Engine, RunOutcome, RunReport};
pub use env::{EnvironmentStatus, Prober};
pub use shell::{Bash, Shell};
