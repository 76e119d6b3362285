mod common;

use common::FakeNix;
use flake_selector::Selector;
use nix_executor::{
    CommandError, DEFAULT_NIX_FLAGS, Evaluated, NixCommand, ShellMode, ShellSession,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::util::SubscriberInitExt;

fn selector(text: &str) -> Selector {
    Selector::parse(text).unwrap()
}

#[tokio::test]
async fn test_evaluate_passes_flags_and_installable() {
    let nix = FakeNix::new(r#"echo '{"name":"hello","version":"1.0"}'"#);
    let command = NixCommand::new(nix.options());

    let value = command
        .evaluate(".", &selector("packages.hello"))
        .await
        .unwrap();
    assert_eq!(
        value,
        Evaluated::Value(json!({"name": "hello", "version": "1.0"}))
    );

    let calls = nix.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(&calls[0][..DEFAULT_NIX_FLAGS.len()], DEFAULT_NIX_FLAGS);
    assert_eq!(nix.subcommands()[0], vec!["eval", "--json", ".#packages.hello"]);
}

#[tokio::test]
async fn test_evaluate_failure_carries_stderr() {
    let nix = FakeNix::new(
        r#"echo "error: attribute 'missing' missing" >&2
exit 1"#,
    );
    let command = NixCommand::new(nix.options());

    let err = command
        .evaluate(".", &selector("packages.missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Evaluation { code: Some(1), .. }));
    assert_eq!(
        err.stderr().map(str::trim),
        Some("error: attribute 'missing' missing")
    );
    assert!(!err.to_string().contains("attribute 'missing'"));
}

#[tokio::test]
async fn test_evaluate_rejects_malformed_json() {
    let nix = FakeNix::new("echo 'not json'");
    let command = NixCommand::new(nix.options());

    let err = command.evaluate(".", &selector("a")).await.unwrap_err();
    assert!(matches!(err, CommandError::MalformedOutput { .. }), "{err:?}");
}

#[tokio::test]
async fn test_evaluate_rejects_patterns() {
    let nix = FakeNix::new("echo 1");
    let command = NixCommand::new(nix.options());

    let err = command.evaluate(".", &selector("packages.*")).await.unwrap_err();
    assert!(matches!(err, CommandError::NotConcrete { .. }));
    assert!(nix.calls().is_empty());
}

#[tokio::test]
async fn test_timeout_kills_the_process() {
    let nix = FakeNix::new("exec sleep 30");
    let mut options = nix.options();
    options.timeout = Duration::from_millis(200);
    let command = NixCommand::new(options);

    let start = Instant::now();
    let err = command.evaluate(".", &selector("a")).await.unwrap_err();
    assert!(matches!(err, CommandError::Timeout { after, .. } if after == Duration::from_millis(200)));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_spawn_failure_is_typed() {
    let command = NixCommand::new(nix_executor::Options {
        nix_binary: PathBuf::from("/nonexistent/bin/nix"),
        ..Default::default()
    });
    let err = command.evaluate(".", &selector("a")).await.unwrap_err();
    assert!(matches!(err, CommandError::Spawn { .. }));
}

#[tokio::test]
async fn test_optional_segment_absent() {
    let nix = FakeNix::new(r#"echo '{"present":false}'"#);
    let command = NixCommand::new(nix.options());

    let value = command
        .evaluate(".", &selector("nixosConfigurations.host.?extra"))
        .await
        .unwrap();
    assert_eq!(value, Evaluated::Absent);

    let call = &nix.subcommands()[0];
    assert_eq!(&call[..3], ["eval", "--json", ".#nixosConfigurations.host"]);
    assert_eq!(call[3], "--apply");
    assert!(call[4].contains(r#"v ? "extra""#));
}

#[tokio::test]
async fn test_optional_segment_present() {
    let nix = FakeNix::new(r#"echo '{"present":true,"value":{"enable":true}}'"#);
    let command = NixCommand::new(nix.options());

    let value = command
        .evaluate(".", &selector("hosts.?web"))
        .await
        .unwrap();
    assert_eq!(value, Evaluated::Value(json!({"enable": true})));
}

#[tokio::test]
async fn test_leading_optional_checks_top_level_outputs() {
    let nix = FakeNix::new(
        r#"case "$*" in
  *"flake show"*) echo '{"packages":{},"lib":{"type":"unknown"}}' ;;
  *) echo '"1.0"' ;;
esac"#,
    );
    let command = NixCommand::new(nix.options());

    let absent = command
        .evaluate(".", &selector("?missingThing"))
        .await
        .unwrap();
    assert_eq!(absent, Evaluated::Absent);
    assert_eq!(nix.calls().len(), 1);

    let present = command.evaluate(".", &selector("?lib.version")).await.unwrap();
    assert_eq!(present.clone().into_value(), Some(json!("1.0")));
    assert_eq!(present, Evaluated::Value(json!("1.0")));
    assert_eq!(
        nix.subcommands().last().unwrap(),
        &vec!["eval", "--json", ".#lib.version"]
    );
}

#[tokio::test]
async fn test_build_returns_store_paths() {
    let nix = FakeNix::new(
        r#"echo /nix/store/00000000000000000000000000000000-hello-2.12
echo /nix/store/11111111111111111111111111111111-hello-2.12-man"#,
    );
    let command = NixCommand::new(nix.options());

    let paths = command
        .build(".", &selector("packages.hello"), None)
        .await
        .unwrap();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("/nix/store/00000000000000000000000000000000-hello-2.12"),
            PathBuf::from("/nix/store/11111111111111111111111111111111-hello-2.12-man"),
        ]
    );
    assert_eq!(
        nix.subcommands()[0],
        vec!["build", "--print-out-paths", "--no-link", ".#packages.hello"]
    );
}

#[tokio::test]
async fn test_build_with_out_link_and_failure() {
    let nix = FakeNix::new("echo 'builder failed' >&2; exit 100");
    let command = NixCommand::new(nix.options());

    let link = nix.dir.path().join("result");
    let err = command
        .build(".", &selector("packages.hello"), Some(&link))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Build { code: Some(100), .. }));
    assert_eq!(err.stderr().map(str::trim), Some("builder failed"));

    let call = &nix.subcommands()[0];
    assert_eq!(call[2], "--out-link");
    assert_eq!(Path::new(&call[3]), link);
}

#[tokio::test]
async fn test_build_expands_wildcards() {
    let nix = FakeNix::new(
        r#"case "$*" in
  *"flake show"*) echo '{"packages":{"x86_64-linux":{"a":{"type":"derivation"},"b":{"type":"derivation"}}}}' ;;
  *) echo /nix/store/00000000000000000000000000000000-a; echo /nix/store/11111111111111111111111111111111-b ;;
esac"#,
    );
    let command = NixCommand::new(nix.options());

    let paths = command
        .build(".", &selector("packages.x86_64-linux.*"), None)
        .await
        .unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(
        nix.subcommands()[1],
        vec![
            "build",
            "--print-out-paths",
            "--no-link",
            ".#packages.x86_64-linux.a",
            ".#packages.x86_64-linux.b",
        ]
    );
}

#[tokio::test]
async fn test_flake_show_and_metadata() {
    let nix = FakeNix::new(
        r#"case "$*" in
  *"flake show"*) echo '{"packages":{"x86_64-linux":{}}}' ;;
  *"flake metadata"*) echo '{"revision":"abc123","lastModified":1700000000,"url":"git+file:///src?rev=abc123"}' ;;
esac"#,
    );
    let command = NixCommand::new(nix.options());

    let show = command.flake_show(".").await.unwrap();
    assert_eq!(show, json!({"packages": {"x86_64-linux": {}}}));
    assert_eq!(
        nix.subcommands()[0],
        vec!["flake", "show", "--json", "--all-systems", "."]
    );

    let metadata = command.metadata(".").await.unwrap();
    assert_eq!(metadata.revision.as_deref(), Some("abc123"));
    assert_eq!(metadata.last_modified, Some(1700000000));
    assert_eq!(metadata.fingerprint().as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_flake_show_requires_an_object() {
    let nix = FakeNix::new("echo '[]'");
    let command = NixCommand::new(nix.options());
    let err = command.flake_show(".").await.unwrap_err();
    assert!(matches!(err, CommandError::MalformedOutput { .. }));
}

#[tokio::test]
async fn test_config_is_typed() {
    let nix = FakeNix::new(
        r#"cat <<'JSON'
{
  "store": { "value": "auto" },
  "substituters": { "value": ["https://cache.nixos.org/"] },
  "experimental-features": { "value": ["flakes", "nix-command"] },
  "system": { "value": "x86_64-linux" }
}
JSON"#,
    );
    let command = NixCommand::new(nix.options());

    let config = command.config().await.unwrap();
    assert_eq!(config.store, "auto");
    assert_eq!(config.substituters, vec!["https://cache.nixos.org/"]);
    assert!(config.has_feature("flakes"));
    assert_eq!(nix.subcommands()[0], vec!["config", "show", "--json"]);
}

#[tokio::test]
async fn test_shell_descriptor_and_environment() {
    let nix = FakeNix::new(r#"echo '{"variables":{"PATH":{"type":"exported","value":"/bin"}}}'"#);
    let mut options = nix.options();
    options.cwd = Some(nix.dir.path().to_path_buf());
    let command = NixCommand::new(options);

    let session = command
        .shell(".", &selector("devShells.x86_64-linux.default"), ShellMode::Command(vec!["make".into(), "test".into()]))
        .await
        .unwrap();
    let ShellSession::Interactive(shell) = session else {
        panic!("expected an interactive session");
    };
    assert_eq!(shell.program, nix.binary);
    assert_eq!(
        &shell.args[DEFAULT_NIX_FLAGS.len()..],
        ["develop", ".#devShells.x86_64-linux.default", "--command", "make", "test"]
    );
    assert_eq!(shell.cwd.as_deref(), Some(nix.dir.path()));
    let std_command = shell.to_command();
    assert_eq!(std_command.as_std().get_program(), nix.binary.as_os_str());
    // Describing an interactive shell runs nothing.
    assert!(nix.calls().is_empty());

    let session = command
        .shell(".", &selector("devShells.x86_64-linux.default"), ShellMode::Environment)
        .await
        .unwrap();
    assert_eq!(
        session,
        ShellSession::Environment(json!({"variables": {"PATH": {"type": "exported", "value": "/bin"}}}))
    );
    assert_eq!(nix.subcommands()[0][0], "print-dev-env");
}

#[tokio::test]
async fn test_add_gc_root_uses_nix_store() {
    let nix = FakeNix::new("exit 1").with_sibling("nix-store", r#"ln -s "$4" "$2""#);
    let command = NixCommand::new(nix.options());

    let target = nix.dir.path().join("output");
    std::fs::create_dir(&target).unwrap();
    let link = nix.dir.path().join("gcroot");

    let created = command.add_gc_root(&target, &link).await.unwrap();
    assert_eq!(created, link);
    assert_eq!(std::fs::read_link(&link).unwrap(), target);

    // nix-store gets no nix-command flags.
    let call = &nix.calls()[0];
    assert_eq!(call[0], "--add-root");
    assert_eq!(call[2], "--realise");
}

#[tokio::test]
async fn test_environment_reaches_the_process() {
    let nix = FakeNix::new(r#"printf '"%s"' "$ISOLATED_STORE_ROOT""#);
    let mut options = nix.options();
    options
        .env
        .insert("ISOLATED_STORE_ROOT".into(), "/tmp/isolated".into());
    let command = NixCommand::new(options);

    let value = command.evaluate(".", &selector("a")).await.unwrap();
    assert_eq!(value, Evaluated::Value(json!("/tmp/isolated")));
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_selector_trace_uses_executor_target() {
    let nix = FakeNix::new(r#"echo '{"present":false}'"#);
    let mut options = nix.options();
    options.debug.selectors = true;
    let command = NixCommand::new(options);

    let captured = Captured::default();
    let writer = captured.clone();
    let _guard = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(true)
        .set_default();

    let value = command.evaluate(".", &selector("hosts.?web")).await.unwrap();
    assert_eq!(value, Evaluated::Absent);

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    let line = output
        .lines()
        .find(|line| line.contains("decision"))
        .unwrap_or_else(|| panic!("no selector trace in {output:?}"));
    assert!(line.contains("nix_executor::selectors"), "{line}");
    assert!(line.contains("hosts.?web"), "{line}");
}
