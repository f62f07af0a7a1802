// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{CheckpointFixture, ShellFixture};

use provisor::{
    args::{self, Action},
    checkpoint::CheckpointStore,
    config::{Playbook, RunConfig},
    engine::{list_apps, list_steps, Engine, EngineError, RunOutcome, RunReport, SkipReason},
    env::Prober,
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::fs::read_to_string;

const PLAYBOOK: &str = indoc! {r#"
    manual = ["re-login for the default shell to be set"]

    [settings]
    template = "homeServer"
    install_command_prefix = "sudo apt-get install -y"
    log = "provisor.log"

    [[step]]
    title = "package managers"
    category = "common"
    id = "pkg"

    [[step.substep]]
    title = "apt wrappers"
    apps = ["nala", "badpkg", "flatpak"]

    [[step]]
    title = "desktop theme"
    category = "desktop"

    [[step.substep]]
    cmd = ["echo theme"]

    [[step]]
    title = "after reboot"
    category = ["homeServer", "desktop"]
    id = "after-reboot"
    dependsOn = ["pkg"]

    [[step.substep]]
    cmd = ["echo resumed", "systemctl --user enable syncthing"]

    [[step]]
    title = "stopper"
    category = "common"

    [[step]]
    title = "never reached"
    category = "common"

    [[step.substep]]
    cmd = ["echo unreachable"]
"#};

fn load(raw: &[&str]) -> Result<(Playbook, RunConfig)> {
    let playbook: Playbook = PLAYBOOK.parse()?;
    assert!(playbook.validate()?.is_empty());

    let action = args::parse(raw)?
        .actions()
        .into_iter()
        .find(|action| matches!(action, Action::Run { .. }))
        .ok_or_else(|| anyhow::anyhow!("no run action in {raw:?}"))?;
    let config = RunConfig::new(&playbook.settings, "unused.log", &action);

    Ok((playbook, config))
}

fn run_with(shell: &ShellFixture, raw: &[&str]) -> Result<RunReport> {
    let (playbook, config) = load(raw)?;
    Ok(Engine::new(shell)?.run(&playbook, &config)?)
}

#[sealed_test]
fn run_only_matching_template() -> Result<()> {
    let shell = ShellFixture::new();
    let playbook: Playbook = indoc! {r#"
        [settings]
        template = "homeServer"
        log = "provisor.log"

        [[step]]
        title = "A"
        category = "common"

        [[step.substep]]
        apps = ["git"]

        [[step]]
        title = "B"
        category = "desktop"

        [[step.substep]]
        cmd = ["echo hi"]
    "#}
    .parse()?;
    let action = Action::Run {
        dry_run: false,
        check: false,
        resume_id: None,
    };
    let config = RunConfig::new(&playbook.settings, "unused.log", &action);

    let report = Engine::new(&shell)?.run(&playbook, &config)?;

    assert_eq!(shell.calls(), vec!["sudo apt-get install -y git".to_string()]);
    assert_eq!(report.executed, vec![1]);
    assert_eq!(report.skipped, vec![(2, SkipReason::Category)]);
    assert_eq!(report.outcome, RunOutcome::Completed);

    Ok(())
}

#[sealed_test]
fn full_run_logs_failures_and_halts_at_stopper() -> Result<()> {
    let shell = ShellFixture::new().failing("badpkg", "E: Unable to locate package badpkg\n");

    let report = run_with(&shell, &["run", "check:false"])?;

    assert_eq!(
        shell.calls(),
        vec![
            "sudo apt-get install -y nala".to_string(),
            "sudo apt-get install -y badpkg".to_string(),
            "sudo apt-get install -y flatpak".to_string(),
        ]
    );
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.executed, vec![1]);
    assert_eq!(
        report.skipped,
        vec![
            (2, SkipReason::Category),
            (3, SkipReason::UnmetDependency("pkg".into()))
        ]
    );

    let log = read_to_string("provisor.log")?;
    assert_eq!(log.matches("installation start").count(), 1);
    assert!(log.contains(" - 2 / 3\n[app] badpkg\nE: Unable to locate package badpkg\n<<"));

    Ok(())
}

#[sealed_test]
fn resume_after_reboot() -> Result<()> {
    let shell = ShellFixture::new();

    let report = run_with(&shell, &["run", "offsetID:after-reboot", "check:0"])?;

    assert_eq!(
        shell.calls(),
        vec![
            "echo resumed".to_string(),
            "systemctl --user enable syncthing".to_string()
        ]
    );
    assert_eq!(report.executed, vec![3]);
    assert_eq!(report.outcome, RunOutcome::Stopped);

    Ok(())
}

#[sealed_test]
fn resume_at_stopper_runs_nothing() -> Result<()> {
    let shell = ShellFixture::new();

    let report = run_with(&shell, &["offsetID:stopper", "run", "check:false"])?;

    assert!(shell.calls().is_empty());
    assert!(report.executed.is_empty());
    assert_eq!(report.outcome, RunOutcome::Stopped);

    Ok(())
}

#[sealed_test]
fn dry_run_from_short_flag() -> Result<()> {
    let shell = ShellFixture::new().failing("", "everything fails");

    let report = run_with(&shell, &["-d", "check:false"])?;

    assert!(shell.calls().is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(report.executed, vec![1, 3]);
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(!std::path::Path::new("provisor.log").exists());

    Ok(())
}

#[sealed_test]
fn environment_not_ready_aborts_before_any_step() -> Result<()> {
    let shell = ShellFixture::new();
    let offline = ShellFixture::new().failing("ping", "network unreachable\n");
    let checkpoint = CheckpointFixture::armed_at("after-reboot");
    let (playbook, config) = load(&["run", "offsetID:after-reboot"])?;

    let prober = Prober::new(&offline, playbook.settings.drive.clone());
    let result = Engine::new(&shell)?.provision(&prober, &checkpoint, &playbook, &config);

    assert!(matches!(
        result,
        Err(EngineError::EnvironmentNotReady(status)) if !status.internet_available
    ));
    assert!(shell.calls().is_empty());
    assert_eq!(offline.calls().len(), 1);
    assert_eq!(checkpoint.is_armed()?, Some("after-reboot".into()));

    Ok(())
}

#[sealed_test]
fn unchecked_run_never_touches_environment() -> Result<()> {
    let shell = ShellFixture::new();
    let offline = ShellFixture::new().failing("ping", "network unreachable\n");
    let checkpoint = CheckpointFixture::default();
    let (playbook, config) = load(&["run", "check:false"])?;

    let prober = Prober::new(&offline, playbook.settings.drive.clone());
    let report = Engine::new(&shell)?.provision(&prober, &checkpoint, &playbook, &config)?;

    assert!(offline.calls().is_empty());
    assert_eq!(report.executed, vec![1]);

    Ok(())
}

#[sealed_test]
fn resumed_run_consumes_matching_checkpoint() -> Result<()> {
    let shell = ShellFixture::new();
    let online = ShellFixture::new();
    let checkpoint = CheckpointFixture::armed_at("after-reboot");
    let (playbook, config) = load(&["run", "offsetID:after-reboot"])?;

    let prober = Prober::new(&online, playbook.settings.drive.clone());
    let report = Engine::new(&shell)?.provision(&prober, &checkpoint, &playbook, &config)?;

    assert_eq!(report.resumed_at, Some(3));
    assert_eq!(report.executed, vec![3]);
    assert_eq!(checkpoint.is_armed()?, None);
    assert_eq!(online.calls().len(), 1);

    Ok(())
}

#[sealed_test]
fn resumed_run_keeps_other_checkpoint() -> Result<()> {
    let shell = ShellFixture::new();
    let online = ShellFixture::new();
    let checkpoint = CheckpointFixture::armed_at("pkg");
    let (playbook, config) = load(&["run", "offsetID:after-reboot"])?;

    let prober = Prober::new(&online, playbook.settings.drive.clone());
    Engine::new(&shell)?.provision(&prober, &checkpoint, &playbook, &config)?;

    assert_eq!(checkpoint.is_armed()?, Some("pkg".into()));

    Ok(())
}

#[sealed_test]
fn unreached_resume_point_keeps_checkpoint() -> Result<()> {
    let shell = ShellFixture::new();
    let online = ShellFixture::new();
    let checkpoint = CheckpointFixture::armed_at("ghost");
    let (playbook, config) = load(&["run", "offsetID:ghost"])?;

    let prober = Prober::new(&online, playbook.settings.drive.clone());
    let report = Engine::new(&shell)?.provision(&prober, &checkpoint, &playbook, &config)?;

    assert_eq!(report.resumed_at, None);
    assert!(shell.calls().is_empty());
    assert_eq!(checkpoint.is_armed()?, Some("ghost".into()));

    Ok(())
}

#[test]
fn list_playbook() -> Result<()> {
    let mut playbook: Playbook = PLAYBOOK.parse()?;
    playbook.steps[1].enabled = false;

    let result = list_steps(&playbook, false)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let expect = vec![
        "1 / 5 - common - package managers",
        "3 / 5 - homeServer+desktop - after reboot",
        "4 / 5 - common - stopper",
        "5 / 5 - common - never reached",
    ];
    assert_eq!(result, expect);
    assert_eq!(list_apps(&playbook), vec!["nala", "badpkg", "flatpak"]);

    Ok(())
}
