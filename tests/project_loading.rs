// tests/project_loading.rs

mod common;
use crate::common::init_tracing;

use std::path::{Path, PathBuf};

use projrun::errors::ProjrunError;
use projrun::fs::mock::MockFileSystem;
use projrun::project::loader::find_descriptor;
use projrun::project::{
    EnvEntry, ParameterType, ProjectEnvironment, load_project, load_project_with_fs,
};
use projrun::types::EnvironmentKind;
use projrun_test_utils::builders::ProjectDirBuilder;

fn expect_invalid(result: projrun::errors::Result<projrun::project::Project>) -> String {
    match result {
        Err(ProjrunError::InvalidProjectSpec(msg)) => msg,
        Err(other) => panic!("expected InvalidProjectSpec, got {other:?}"),
        Ok(p) => panic!("expected InvalidProjectSpec, got project {:?}", p.name),
    }
}

#[test]
fn loads_entry_points_in_declaration_order() {
    init_tracing();
    let dir = ProjectDirBuilder::new()
        .with_descriptor(
            r#"
name: tutorial
entry_points:
  main:
    parameters:
      alpha: {type: float, default: 0.5}
      l1_ratio: {type: float, default: 0.1}
      data_file: path
    command: "python train.py {alpha} {l1_ratio} {data_file}"
  validate:
    command: "python validate.py"
"#,
        )
        .build();

    let project = load_project(dir.path()).unwrap();
    assert_eq!(project.name.as_deref(), Some("tutorial"));
    assert_eq!(
        project.entry_point_names().collect::<Vec<_>>(),
        vec!["main", "validate"]
    );
    assert_eq!(project.environment, ProjectEnvironment::System);

    let main = project.get_entry_point("main").unwrap();
    let names: Vec<&str> = main.parameters.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["alpha", "l1_ratio", "data_file"]);
    assert_eq!(main.parameters["alpha"].kind, ParameterType::Float);
    assert_eq!(main.parameters["alpha"].default.as_deref(), Some("0.5"));
    assert_eq!(main.parameters["data_file"].kind, ParameterType::Path);
    assert_eq!(main.parameters["data_file"].default, None);
}

#[test]
fn descriptor_name_is_matched_case_insensitively() {
    let dir = ProjectDirBuilder::new()
        .with_file("mlproject", "name: lower\nentry_points: {}\n")
        .build();

    let project = load_project(dir.path()).unwrap();
    assert_eq!(project.name.as_deref(), Some("lower"));
}

#[test]
fn directory_without_descriptor_is_an_empty_project() {
    let dir = ProjectDirBuilder::new().with_file("train.py", "print(1)").build();

    let project = load_project(dir.path()).unwrap();
    assert!(project.name.is_none());
    assert_eq!(project.entry_point_names().count(), 0);
    assert_eq!(project.environment, ProjectEnvironment::System);
}

#[test]
fn descriptor_file_path_uses_parent_as_work_dir() {
    let fs = MockFileSystem::new();
    fs.add_file("proj/MLproject", "name: p\n");

    let location = find_descriptor(&fs, Path::new("proj/MLproject")).unwrap();
    assert_eq!(location.descriptor, Some(PathBuf::from("proj/MLproject")));
    assert_eq!(location.directory, PathBuf::from("proj"));
}

#[test]
fn missing_path_is_project_not_found() {
    let fs = MockFileSystem::new();
    let err = load_project_with_fs(&fs, Path::new("nowhere")).unwrap_err();
    assert!(matches!(err, ProjrunError::ProjectNotFound(_)), "{err:?}");
}

#[test]
fn mock_fs_discovers_descriptor_and_default_conda_file() {
    let fs = MockFileSystem::new();
    fs.add_file("proj/MLProject", "name: mocked\nentry_points:\n  main:\n    command: echo hi\n");
    fs.add_file("proj/conda.yaml", "name: env\n");

    let project = load_project_with_fs(&fs, Path::new("proj")).unwrap();
    assert_eq!(project.name.as_deref(), Some("mocked"));
    assert_eq!(
        project.environment,
        ProjectEnvironment::Conda(PathBuf::from("proj/conda.yaml"))
    );
    assert_eq!(project.environment.kind(), Some(EnvironmentKind::Conda));
}

#[test]
fn explicit_conda_file_must_exist() {
    let fs = MockFileSystem::new();
    fs.add_file("proj/MLproject", "conda_env: env.yaml\n");

    let msg = expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
    assert!(msg.contains("env.yaml"), "{msg}");

    fs.add_file("proj/env.yaml", "name: env\n");
    let project = load_project_with_fs(&fs, Path::new("proj")).unwrap();
    assert_eq!(project.conda_env_path(), Some(Path::new("proj/env.yaml")));
}

#[test]
fn conda_and_docker_together_are_rejected() {
    let fs = MockFileSystem::new();
    fs.add_file("proj/conda.yaml", "name: env\n");
    fs.add_file(
        "proj/MLproject",
        "conda_env: conda.yaml\ndocker_env:\n  image: python:3.12\n",
    );

    let msg = expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
    assert!(msg.contains("single"), "{msg}");
}

#[test]
fn docker_and_singularity_together_are_rejected() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "proj/MLproject",
        "docker_env:\n  image: a\nsingularity_env:\n  image: docker://b\n",
    );
    expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
}

#[test]
fn docker_section_is_parsed() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "proj/MLproject",
        r#"
name: dockerized
docker_env:
  image: python:3.12
  volumes: ["/data:/data", "$HOME/cache:/cache"]
  environment: [["NEW_VAR", "new value"], "COPIED_VAR"]
entry_points:
  main:
    command: python train.py
"#,
    );

    let project = load_project_with_fs(&fs, Path::new("proj")).unwrap();
    let docker = project.docker_env().expect("docker env");
    assert_eq!(docker.image, "python:3.12");
    assert_eq!(docker.volumes, vec!["/data:/data", "$HOME/cache:/cache"]);
    assert_eq!(
        docker.environment,
        vec![
            EnvEntry::Set("NEW_VAR".into(), "new value".into()),
            EnvEntry::CopyFromHost("COPIED_VAR".into()),
        ]
    );
    assert!(project.singularity_env().is_none());
}

#[test]
fn singularity_section_keeps_build_dir() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "proj/MLproject",
        "name: s\nsingularity_env:\n  image: docker://python:3.12\n  build_dir: images\n",
    );

    let project = load_project_with_fs(&fs, Path::new("proj")).unwrap();
    let env = project.singularity_env().expect("singularity env");
    assert_eq!(env.build_dir.as_deref(), Some("images"));
    assert_eq!(project.environment.kind(), Some(EnvironmentKind::Singularity));
}

#[test]
fn container_sections_are_validated() {
    let cases = [
        ("docker_env:\n  volumes: [\"/a:/a\"]\n", "image"),
        ("docker_env:\n  image: x\n  volumes: /a:/a\n", "volumes"),
        ("docker_env:\n  image: x\n  volumes: [1, 2]\n", "volumes"),
        ("docker_env:\n  image: x\n  environment: [[\"A\"]]\n", "environment"),
        ("docker_env:\n  image: x\n  environment: {A: b}\n", "environment"),
        ("singularity_env:\n  build_dir: x\n", "image"),
    ];

    for (yaml, needle) in cases {
        let fs = MockFileSystem::new();
        fs.add_file("proj/MLproject", yaml);
        let msg = expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
        assert!(msg.contains(needle), "{yaml:?} -> {msg}");
    }
}

#[test]
fn entry_point_without_command_is_rejected() {
    let fs = MockFileSystem::new();
    fs.add_file("proj/MLproject", "entry_points:\n  main:\n    parameters: {a: string}\n");
    let msg = expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
    assert!(msg.contains("main"), "{msg}");
}

#[test]
fn unknown_parameter_type_is_rejected() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "proj/MLproject",
        "entry_points:\n  main:\n    parameters: {a: integer}\n    command: echo {a}\n",
    );
    let msg = expect_invalid(load_project_with_fs(&fs, Path::new("proj")));
    assert!(msg.contains("integer"), "{msg}");
}

#[test]
fn scalar_defaults_are_stringified() {
    let fs = MockFileSystem::new();
    fs.add_file(
        "proj/MLproject",
        r#"
entry_points:
  main:
    parameters:
      epochs: {type: float, default: 10}
      verbose: {default: true}
      name: {type: string, default: null}
    command: "run {epochs} {verbose} {name}"
"#,
    );

    let project = load_project_with_fs(&fs, Path::new("proj")).unwrap();
    let ep = project.get_entry_point("main").unwrap();
    assert_eq!(ep.parameters["epochs"].default.as_deref(), Some("10"));
    assert_eq!(ep.parameters["verbose"].default.as_deref(), Some("true"));
    assert_eq!(ep.parameters["verbose"].kind, ParameterType::String);
    assert_eq!(ep.parameters["name"].default, None);
}
