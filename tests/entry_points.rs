// tests/entry_points.rs

mod common;
use crate::common::init_tracing;

use indexmap::IndexMap;
use projrun::errors::ProjrunError;
use projrun::external::artifacts::HttpArtifactFetcher;
use projrun::project::{
    EntryPoint, Parameter, ParameterType, Project, ProjectEnvironment, UserParams, shell_escape,
};
use projrun_test_utils::fakes::FakeArtifactFetcher;

fn entry_point(params: &[(&str, ParameterType, Option<&str>)], command: &str) -> EntryPoint {
    let parameters = params
        .iter()
        .map(|(name, kind, default)| {
            (
                name.to_string(),
                Parameter::new(*name, *kind, default.map(str::to_string)),
            )
        })
        .collect();
    EntryPoint::new("main", parameters, command)
}

fn user(pairs: &[(&str, &str)]) -> UserParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn missing_parameters_are_reported_together() {
    let ep = entry_point(
        &[
            ("a", ParameterType::String, None),
            ("b", ParameterType::String, Some("x")),
            ("c", ParameterType::Float, None),
        ],
        "echo {a} {b} {c}",
    );

    let err = ep
        .compute_parameters(&UserParams::new(), None, &FakeArtifactFetcher::new())
        .unwrap_err();
    match err {
        ProjrunError::MissingParameter(msg) => {
            assert_eq!(msg, "No value given for missing parameters: 'a', 'c'");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // All defaults: nothing missing.
    let ep = entry_point(&[("b", ParameterType::String, Some("x"))], "echo {b}");
    ep.validate_parameters(&UserParams::new()).unwrap();
}

#[test]
fn default_is_used_and_extras_are_appended() {
    let ep = entry_point(&[("greeting", ParameterType::String, Some("hi"))], "echo {greeting}");
    let fetcher = FakeArtifactFetcher::new();

    let cmd = ep.compute_command(&UserParams::new(), None, &fetcher).unwrap();
    assert_eq!(cmd, "echo hi");

    let cmd = ep
        .compute_command(&user(&[("foo", "bar")]), None, &fetcher)
        .unwrap();
    assert_eq!(cmd, "echo hi --foo bar");
}

#[test]
fn values_are_shell_escaped() {
    let ep = entry_point(&[("msg", ParameterType::String, None)], "echo {msg}");
    let fetcher = FakeArtifactFetcher::new();

    let params = ep
        .compute_parameters(
            &user(&[("msg", "hello; rm -rf /"), ("extra", "a b")]),
            None,
            &fetcher,
        )
        .unwrap();
    assert_eq!(params.declared["msg"], "'hello; rm -rf /'");
    assert_eq!(params.extra["extra"], "'a b'");
    assert!(!params.declared.contains_key("extra"));
    assert!(!params.extra.contains_key("msg"));
}

#[test]
fn local_path_resolves_to_absolute_without_download() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.csv");
    std::fs::write(&data, "1,2\n").unwrap();
    let storage = tempfile::tempdir().unwrap();
    let fetcher = FakeArtifactFetcher::new();

    let ep = entry_point(&[("data", ParameterType::Path, None)], "cat {data}");
    let params = ep
        .compute_parameters(
            &user(&[("data", data.to_str().unwrap())]),
            Some(storage.path()),
            &fetcher,
        )
        .unwrap();

    let expected = shell_escape(data.to_str().unwrap());
    assert_eq!(params.declared["data"], expected);
    assert!(fetcher.calls().is_empty());
    assert_eq!(std::fs::read_dir(storage.path()).unwrap().count(), 0);
}

#[test]
fn missing_local_path_is_invalid() {
    let storage = tempfile::tempdir().unwrap();
    let ep = entry_point(&[("data", ParameterType::Path, None)], "cat {data}");
    let err = ep
        .compute_parameters(
            &user(&[("data", "/definitely/not/here.csv")]),
            Some(storage.path()),
            &FakeArtifactFetcher::new(),
        )
        .unwrap_err();
    assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{err:?}");
}

#[test]
fn remote_paths_download_into_per_position_dirs() {
    let storage = tempfile::tempdir().unwrap();
    let fetcher = FakeArtifactFetcher::new();
    let ep = entry_point(
        &[
            ("first", ParameterType::Path, None),
            ("second", ParameterType::Path, None),
        ],
        "train {first} {second}",
    );

    let same = "s3://bucket/data.csv";
    ep.compute_parameters(
        &user(&[("second", same), ("first", same)]),
        Some(storage.path()),
        &fetcher,
    )
    .unwrap();

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], (same.to_string(), storage.path().join("param_0")));
    assert_eq!(calls[1], (same.to_string(), storage.path().join("param_1")));
    assert!(storage.path().join("param_0/artifact").is_file());
    assert!(storage.path().join("param_1/artifact").is_file());
}

#[test]
fn path_without_storage_dir_is_reported_verbatim() {
    let fetcher = FakeArtifactFetcher::new();
    let ep = entry_point(&[("data", ParameterType::Path, None)], "cat {data}");
    let cmd = ep
        .compute_command(&user(&[("data", "s3://bucket/key")]), None, &fetcher)
        .unwrap();
    assert_eq!(cmd, format!("cat {}", shell_escape("s3://bucket/key")));
    assert!(fetcher.calls().is_empty());
}

#[test]
fn uri_parameters_require_a_scheme() {
    let ep = entry_point(&[("model", ParameterType::Uri, None)], "serve {model}");
    let fetcher = FakeArtifactFetcher::new();

    let err = ep
        .compute_parameters(&user(&[("model", "just/a/path")]), None, &fetcher)
        .unwrap_err();
    assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{err:?}");

    // A drive letter is not a scheme.
    assert!(
        ep.compute_parameters(&user(&[("model", "C:\\models\\m")]), None, &fetcher)
            .is_err()
    );

    let ok = ep
        .compute_parameters(&user(&[("model", "runs:/abc/model")]), None, &fetcher)
        .unwrap();
    assert_eq!(ok.declared["model"], shell_escape("runs:/abc/model"));
}

#[test]
fn float_parameters_must_parse() {
    let ep = entry_point(&[("alpha", ParameterType::Float, None)], "train {alpha}");
    let fetcher = FakeArtifactFetcher::new();

    assert!(
        ep.compute_parameters(&user(&[("alpha", "0.25")]), None, &fetcher)
            .is_ok()
    );
    let err = ep
        .compute_parameters(&user(&[("alpha", "lots")]), None, &fetcher)
        .unwrap_err();
    assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{err:?}");
}

#[test]
fn undeclared_placeholder_fails_to_render() {
    let ep = entry_point(&[], "echo {missing}");
    let err = ep
        .compute_command(&UserParams::new(), None, &FakeArtifactFetcher::new())
        .unwrap_err();
    assert!(matches!(err, ProjrunError::TemplateRender(_)), "{err:?}");
}

#[test]
fn literal_braces_survive_rendering() {
    let ep = entry_point(&[("n", ParameterType::String, Some("3"))], "awk '{{print $1}}' {n}");
    let cmd = ep
        .compute_command(&UserParams::new(), None, &FakeArtifactFetcher::new())
        .unwrap();
    assert_eq!(cmd, "awk '{print $1}' 3");
}

#[test]
fn implicit_script_entry_points() {
    let project = Project::new(None, IndexMap::new(), ProjectEnvironment::System);

    let py = project.get_entry_point("train.py").unwrap();
    assert_eq!(py.command, "python train.py");
    assert!(py.parameters.is_empty());

    let r = project.get_entry_point("analysis.R").unwrap();
    assert_eq!(r.command, "Rscript -e \"source('analysis.R')\" --args");

    let sh = project.get_entry_point("run.sh").unwrap();
    assert!(sh.command.ends_with(" run.sh"), "{}", sh.command);

    let spaced = project.get_entry_point("my script.py").unwrap();
    assert_eq!(spaced.command, "python 'my script.py'");
}

#[test]
fn unsupported_entry_point_lists_options() {
    let mut entry_points = IndexMap::new();
    entry_points.insert("main".to_string(), entry_point(&[], "echo main"));
    let project = Project::new(None, entry_points, ProjectEnvironment::System);

    match project.get_entry_point("train.exe") {
        Err(ProjrunError::UnsupportedEntryPoint(msg)) => {
            assert!(msg.contains("main"), "{msg}");
            assert!(msg.contains(".py"), "{msg}");
            assert!(msg.contains(".R"), "{msg}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// Serve `body` at `/data/train.csv` and 404 everywhere else, for
/// `requests` requests.
fn serve_artifacts(body: &'static str, requests: usize) -> (String, std::thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = std::thread::spawn(move || {
        for request in server.incoming_requests().take(requests) {
            let response = if request.url() == "/data/train.csv" {
                tiny_http::Response::from_string(body)
            } else {
                tiny_http::Response::from_string("not found").with_status_code(404)
            };
            request.respond(response).unwrap();
        }
    });
    (format!("http://{addr}"), handle)
}

#[test]
fn http_path_parameters_are_downloaded() {
    init_tracing();
    let (base, server) = serve_artifacts("a,b\n1,2\n", 2);
    let storage = tempfile::tempdir().unwrap();
    let param = Parameter::new("data", ParameterType::Path, None);

    let local = param
        .resolve(&format!("{base}/data/train.csv"), Some(storage.path()), 0, &HttpArtifactFetcher)
        .unwrap();
    let expected = storage.path().join("param_0").join("train.csv");
    assert_eq!(local, expected.to_str().unwrap());
    assert_eq!(std::fs::read_to_string(&expected).unwrap(), "a,b\n1,2\n");

    let err = param
        .resolve(&format!("{base}/data/missing.csv"), Some(storage.path()), 1, &HttpArtifactFetcher)
        .unwrap_err();
    assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{err:?}");

    server.join().unwrap();

    let err = param
        .resolve("s3://bucket/key", Some(storage.path()), 2, &HttpArtifactFetcher)
        .unwrap_err();
    assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{err:?}");
}

#[test]
fn existing_download_dir_is_not_reused() {
    let storage = tempfile::tempdir().unwrap();
    std::fs::create_dir(storage.path().join("param_0")).unwrap();
    std::fs::write(storage.path().join("param_0/stale.csv"), "old").unwrap();
    let fetcher = FakeArtifactFetcher::new();

    let param = Parameter::new("data", ParameterType::Path, None);
    let err = param
        .resolve("s3://bucket/data.csv", Some(storage.path()), 0, &fetcher)
        .unwrap_err();

    assert!(matches!(err, ProjrunError::Execution(_)), "{err:?}");
    assert!(fetcher.calls().is_empty());
}

#[test]
fn extra_parameter_names_must_be_plain() {
    let ep = entry_point(&[], "echo run");
    let fetcher = FakeArtifactFetcher::new();

    for bad in ["x;touch pwned", "a b", "$(id)", ""] {
        let err = ep
            .compute_command(&user(&[(bad, "1")]), None, &fetcher)
            .unwrap_err();
        assert!(matches!(err, ProjrunError::InvalidParameter(_)), "{bad:?}: {err:?}");
    }

    let cmd = ep
        .compute_command(&user(&[("learning-rate.v_2", "0.1")]), None, &fetcher)
        .unwrap();
    assert_eq!(cmd, "echo run --learning-rate.v_2 0.1");
}
