// tests/local_runner.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, read_trimmed};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use projrun::config::RunSettings;
use projrun::errors::ProjrunError;
use projrun::exec::RunHandle;
use projrun::external::{Services, TrackingStore};
use projrun::project::{UserParams, shell_escape};
use projrun::runner::{DetachedLaunch, LocalRunner, RunRequest, cancel_and_record, wait_and_record};
use projrun::types::{EnvironmentKind, RunStatus};
use projrun_test_utils::builders::{BackendConfigBuilder, ProjectDirBuilder};
use projrun_test_utils::fakes::{FakeServices, FakeTrackingStore};
use projrun_test_utils::with_timeout;

const TRAIN_PROJECT: &str = r#"
name: train
entry_points:
  main:
    parameters:
      alpha: {type: float, default: 0.5}
      label: string
    command: "echo {alpha} {label} $MLFLOW_RUN_ID $MLFLOW_EXPERIMENT_ID > out.txt"
  fail:
    command: "exit 3"
  sleep:
    command: "sleep 30"
  fetch:
    parameters:
      data: path
    command: "cat {data} > copied.txt"
"#;

fn runner(fakes: &FakeServices) -> LocalRunner {
    LocalRunner::new(fakes.services.clone(), RunSettings::new("/tmp/projrun-test-runs", "42"))
}

#[tokio::test]
async fn synchronous_run_records_params_tags_and_status() {
    init_tracing();
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let fakes = FakeServices::new();
    let runner = runner(&fakes);

    let request = RunRequest::new(project.path().display().to_string(), "main")
        .with_param("label", "first try")
        .with_param("epochs", "3");
    let mut handle = runner
        .run(&request, &BackendConfigBuilder::new().build())
        .await
        .unwrap();
    assert_eq!(handle.run_id(), "run-1");

    let status = with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Finished);
    assert_eq!(fakes.tracking.status("run-1"), Some(RunStatus::Finished));

    let out = read_trimmed(project.path().join("out.txt"));
    // Undeclared parameters are appended as `--name value`.
    assert_eq!(out, "0.5 first try run-1 42 --epochs 3");

    let run = fakes.tracking.run("run-1").unwrap();
    assert_eq!(run.info.experiment_id, "42");
    assert_eq!(
        run.params,
        BTreeMap::from([
            ("alpha".to_string(), "0.5".to_string()),
            ("epochs".to_string(), "3".to_string()),
            ("label".to_string(), "first try".to_string()),
        ])
    );
    assert_eq!(
        run.tags.get("projrun.source.entry_point").map(String::as_str),
        Some("main")
    );
    assert!(run.tags.contains_key("projrun.source.uri"));
    // A host-environment project carries no environment tag.
    assert!(!run.tags.contains_key("projrun.project.env"));
}

#[tokio::test]
async fn failing_command_is_recorded_as_failed() {
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "fail");
    let mut handle = runner(&fakes)
        .run(&request, &BackendConfigBuilder::new().build())
        .await
        .unwrap();

    let status = with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(fakes.tracking.status("run-1"), Some(RunStatus::Failed));
}

#[tokio::test]
async fn cancelled_run_is_recorded_as_killed() {
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "sleep");
    let mut handle = runner(&fakes)
        .run(&request, &BackendConfigBuilder::new().build())
        .await
        .unwrap();
    assert_eq!(handle.status().unwrap(), RunStatus::Running);

    let status = with_timeout(cancel_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Killed);
    assert_eq!(fakes.tracking.status("run-1"), Some(RunStatus::Killed));
}

#[tokio::test]
async fn missing_parameter_fails_before_a_run_is_created() {
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "main");
    let err = runner(&fakes)
        .run(&request, &BackendConfigBuilder::new().build())
        .await
        .unwrap_err();

    assert!(matches!(err, ProjrunError::MissingParameter(_)), "{err:?}");
    assert!(fakes.tracking.run_ids().is_empty());
}

#[tokio::test]
async fn remote_path_parameter_is_downloaded_into_storage_dir() {
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let storage = tempfile::tempdir().unwrap();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "fetch")
        .with_param("data", "s3://bucket/train.csv");
    let config = BackendConfigBuilder::new().storage_dir(storage.path()).build();
    let mut handle = runner(&fakes).run(&request, &config).await.unwrap();
    with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();

    let calls = fakes.artifacts.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "s3://bucket/train.csv");
    assert!(calls[0].1.starts_with(storage.path()));
    assert!(calls[0].1.ends_with("param_0"));

    let copied = fs::read_to_string(project.path().join("copied.txt")).unwrap();
    assert_eq!(copied, "s3://bucket/train.csv");
    // The raw URI is what gets logged.
    assert_eq!(
        fakes.tracking.run("run-1").unwrap().params["data"],
        "s3://bucket/train.csv"
    );
}

#[tokio::test]
async fn conda_project_runs_inside_activated_env() {
    let project = ProjectDirBuilder::new()
        .with_descriptor(
            "name: envy\nentry_points:\n  main:\n    command: \"echo $FAKE_CONDA_ENV > env.txt\"\n",
        )
        .with_file("conda.yaml", "name: envy\ndependencies: [python]\n")
        .build();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "main");
    let mut handle = runner(&fakes)
        .run(&request, &BackendConfigBuilder::new().build())
        .await
        .unwrap();
    with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();

    let env = read_trimmed(project.path().join("env.txt"));
    assert_eq!(env, "projrun-fake-env");
    assert_eq!(fakes.conda.resolved(), vec![project.path().join("conda.yaml")]);
    assert_eq!(fakes.tracking.tag("run-1", "projrun.project.env").as_deref(), Some("conda"));
}

#[tokio::test]
async fn no_conda_runs_in_host_environment() {
    let project = ProjectDirBuilder::new()
        .with_descriptor("entry_points:\n  main:\n    command: \"echo ${{FAKE_CONDA_ENV:-host}} > env.txt\"\n")
        .with_file("conda.yaml", "dependencies: [python]\n")
        .build();
    let fakes = FakeServices::new();

    let request = RunRequest::new(project.path().display().to_string(), "main");
    let config = BackendConfigBuilder::new().no_conda().build();
    let mut handle = runner(&fakes).run(&request, &config).await.unwrap();
    with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();

    let env = read_trimmed(project.path().join("env.txt"));
    assert_eq!(env, "host");
    assert!(fakes.conda.resolved().is_empty());
}

#[tokio::test]
async fn existing_run_id_is_attached_without_logging_params() {
    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let fakes = FakeServices::with_tracking(FakeTrackingStore::new());
    let existing = fakes.tracking.create_run("9", &BTreeMap::new()).unwrap();

    let request = RunRequest::new(project.path().display().to_string(), "main")
        .with_param("label", "x");
    let config = BackendConfigBuilder::new().run_id(&existing.run_id).build();
    let mut handle = runner(&fakes).run(&request, &config).await.unwrap();
    assert_eq!(handle.run_id(), existing.run_id);
    with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();

    assert_eq!(fakes.tracking.run_ids(), vec![existing.run_id.clone()]);
    assert!(fakes.tracking.run(&existing.run_id).unwrap().params.is_empty());
    let out = read_trimmed(project.path().join("out.txt"));
    assert_eq!(out, "0.5 x run-1 9");
}

#[test]
fn plan_renders_without_downloading() {
    let project = ProjectDirBuilder::new()
        .with_descriptor(TRAIN_PROJECT)
        .with_file("conda.yaml", "dependencies: []\n")
        .build();
    let fakes = FakeServices::new();
    let runner = runner(&fakes);

    let request = RunRequest::new(project.path().display().to_string(), "fetch")
        .with_param("data", "s3://bucket/train.csv");
    let plan = runner
        .plan(&request, &BackendConfigBuilder::new().build())
        .unwrap();

    assert_eq!(
        plan.command,
        format!("cat {} > copied.txt", shell_escape("s3://bucket/train.csv"))
    );
    assert_eq!(plan.entry_point, "fetch");
    assert_eq!(plan.environment, Some(EnvironmentKind::Conda));
    assert!(fakes.artifacts.calls().is_empty());
    assert!(fakes.tracking.run_ids().is_empty());

    let no_conda = runner
        .plan(&request, &BackendConfigBuilder::new().no_conda().build())
        .unwrap();
    assert_eq!(no_conda.environment, None);
}

#[test]
fn plan_runs_scripts_without_a_descriptor() {
    let project = ProjectDirBuilder::new().with_file("train.py", "print(1)\n").build();
    let fakes = FakeServices::new();

    let plan = runner(&fakes)
        .plan(
            &RunRequest::new(project.path().display().to_string(), "train.py"),
            &BackendConfigBuilder::new().build(),
        )
        .unwrap();
    assert_eq!(plan.command, "python train.py");
    assert_eq!(plan.environment, None);
}

#[test]
fn detached_launch_arguments() {
    let mut params = UserParams::new();
    params.insert("alpha".into(), "0.1".into());
    params.insert("label".into(), "a b".into());

    let launch = DetachedLaunch {
        program: "/usr/bin/projrun".into(),
        work_dir: "/work/proj".into(),
        entry_point: "main".into(),
        run_id: "r1".into(),
        experiment_id: "3".into(),
        tracking_uri: "/srv/mlruns".into(),
        storage_dir: Some("/scratch".into()),
        use_conda: false,
        params,
        env_args: vec!["--docker-args".into(), "gpus=all".into()],
    };

    assert_eq!(
        launch.args(),
        vec![
            "/work/proj",
            "-e",
            "main",
            "--run-id",
            "r1",
            "--experiment-id",
            "3",
            "--tracking-uri",
            "/srv/mlruns",
            "--inherit-process-group",
            "--storage-dir",
            "/scratch",
            "--no-conda",
            "--docker-args",
            "gpus=all",
            "-P",
            "alpha=0.1",
            "-P",
            "label=a b",
        ]
    );
}

#[tokio::test]
async fn detached_run_relaunches_program_for_same_run() {
    use std::os::unix::fs::PermissionsExt;

    let project = ProjectDirBuilder::new().with_descriptor(TRAIN_PROJECT).build();
    let bin = tempfile::tempdir().unwrap();
    let program = bin.path().join("fake-projrun");
    fs::write(
        &program,
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > relaunch-args.txt\necho \"$MLFLOW_RUN_ID\" > relaunch-run.txt\n",
    )
    .unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let fakes = FakeServices::new();
    let request = RunRequest::new(project.path().display().to_string(), "main")
        .with_param("label", "x");
    let config = BackendConfigBuilder::new()
        .detached()
        .relaunch_program(&program)
        .build();

    let mut handle = runner(&fakes).run(&request, &config).await.unwrap();
    let status = with_timeout(wait_and_record(&mut handle, &fakes.services))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Finished);

    let args = fs::read_to_string(project.path().join("relaunch-args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(&args[1..5], &["-e", "main", "--run-id", "run-1"]);
    assert!(args.contains(&"label=x"));
    let run_env = read_trimmed(project.path().join("relaunch-run.txt"));
    assert_eq!(run_env, "run-1");
    // The parent created exactly one run for the child to attach to.
    assert_eq!(fakes.tracking.run_ids(), vec!["run-1".to_string()]);
}

/// Poll `check` every 50ms until it holds or `limit` passes.
async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// A zombie waiting for a reaper counts as gone.
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .and_then(|(_, rest)| rest.chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => !Path::new("/proc/self").exists(),
    }
}

#[tokio::test]
async fn cancelling_detached_run_stops_its_entry_point() {
    init_tracing();
    let project = ProjectDirBuilder::new()
        .with_descriptor("entry_points:\n  main:\n    command: \"echo $$ > pid.txt; sleep 30\"\n")
        .build();
    let tracking = tempfile::tempdir().unwrap();
    let settings = RunSettings::new(tracking.path().display().to_string(), "0");
    let services = Services::local(&settings).unwrap();
    let runner = LocalRunner::new(services.clone(), settings);

    let config = BackendConfigBuilder::new()
        .detached()
        .no_conda()
        .relaunch_program(env!("CARGO_BIN_EXE_projrun"))
        .build();
    let request = RunRequest::new(project.path().display().to_string(), "main");
    let mut handle = runner.run(&request, &config).await.unwrap();

    let pid_file = project.path().join("pid.txt");
    assert!(
        eventually(Duration::from_secs(10), || {
            fs::read_to_string(&pid_file).is_ok_and(|s| !s.trim().is_empty())
        })
        .await,
        "entry point never started"
    );
    let pid: i32 = read_trimmed(&pid_file).parse().unwrap();
    assert!(process_alive(pid));

    let status = with_timeout(cancel_and_record(&mut handle, &services))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Killed);
    assert!(
        eventually(Duration::from_secs(5), || !process_alive(pid)).await,
        "entry point {pid} outlived the cancelled run"
    );
}
