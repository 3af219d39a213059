//! CLI Session Integration Tests
//!
//! A shell script stands in for the `claude` binary. It appends its argv and
//! stdin to log files and prints a fixed stream of records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelgate::core::EventKind;
use modelgate::llm::collect_events;
use modelgate::{
    CliEntry, GatewayConfig, Message, ProviderEntry, ProviderKind, ProviderRegistry, TextRequest,
    Usage,
};

const STDIN_SEPARATOR: &str = "\n---\n";

struct FakeCli {
    _dir: tempfile::TempDir,
    argv_log: PathBuf,
    stdin_log: PathBuf,
    registry: Arc<ProviderRegistry>,
}

impl FakeCli {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let argv_log = dir.path().join("argv.log");
        let stdin_log = dir.path().join("stdin.log");
        let script = dir.path().join("claude.sh");
        std::fs::write(&script, script_body(&argv_log, &stdin_log)).unwrap();

        let mut entry = ProviderEntry::new("claude", ProviderKind::ClaudeCode);
        entry.cli = Some(CliEntry {
            program: Some("sh".into()),
            program_args: vec![script.to_string_lossy().into_owned()],
            idle_timeout_secs: Some(10),
            ..Default::default()
        });
        let config = GatewayConfig {
            providers: vec![entry],
            failover: None,
        };
        Self {
            _dir: dir,
            argv_log,
            stdin_log,
            registry: Arc::new(ProviderRegistry::from_config(&config).unwrap()),
        }
    }

    fn argv(&self) -> Vec<String> {
        std::fs::read_to_string(&self.argv_log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn stdin(&self) -> Vec<String> {
        let log = std::fs::read_to_string(&self.stdin_log).unwrap();
        log.split(STDIN_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn script_body(argv_log: &Path, stdin_log: &Path) -> String {
    format!(
        r#"printf '%s\n' "$*" >> '{argv}'
cat >> '{stdin}'
printf '\n---\n' >> '{stdin}'
echo '{{"type":"system","subtype":"init","session_id":"s1","model":"sonnet"}}'
echo '{{"type":"stream_event","event":{{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"hello"}}}}}}'
echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"hello"}}]}},"session_id":"s1"}}'
echo '{{"type":"result","subtype":"success","is_error":false,"result":"hello","session_id":"s1","usage":{{"input_tokens":3,"output_tokens":1}}}}'
"#,
        argv = argv_log.display(),
        stdin = stdin_log.display(),
    )
}

#[tokio::test]
async fn test_session_is_resumed_on_continuation() {
    let cli = FakeCli::new();
    let provider = cli.registry.get("claude").unwrap();

    let first = provider
        .generate_text(
            TextRequest::new(vec![Message::user("Hi")]).with_instructions("Be helpful"),
        )
        .await
        .unwrap();
    assert_eq!(first.text, "hello");
    assert_eq!(first.session_id.as_deref(), Some("s1"));
    assert_eq!(first.usage, Usage::new(3, 1));

    let second = provider
        .generate_text(
            TextRequest::new(vec![
                Message::user("Hi"),
                Message::assistant("hello"),
                Message::user("And again?"),
            ])
            .with_instructions("Be helpful"),
        )
        .await
        .unwrap();
    assert_eq!(second.text, "hello");

    let argv = cli.argv();
    assert_eq!(argv.len(), 2);
    assert!(argv[0].contains("--output-format stream-json"));
    assert!(!argv[0].contains("--resume"));
    assert!(argv[1].contains("--resume s1"));

    let stdin = cli.stdin();
    assert_eq!(stdin, vec!["Be helpful\n\nHi".to_string(), "And again?".to_string()]);
}

#[tokio::test]
async fn test_unknown_conversation_sends_full_history() {
    let cli = FakeCli::new();
    let provider = cli.registry.get("claude").unwrap();

    provider
        .generate_text(TextRequest::new(vec![
            Message::user("Earlier question"),
            Message::assistant("Earlier answer"),
            Message::user("Follow-up"),
        ]))
        .await
        .unwrap();

    assert!(!cli.argv()[0].contains("--resume"));
    assert_eq!(
        cli.stdin(),
        vec!["User: Earlier question\n\nAssistant: Earlier answer\n\nUser: Follow-up".to_string()]
    );
}

#[tokio::test]
async fn test_stream_text_through_cli() {
    let cli = FakeCli::new();
    let provider = cli.registry.get("claude").unwrap();

    let events = collect_events(
        provider
            .stream_text(TextRequest::new(vec![Message::user("Hi")]).with_model("opus"))
            .await
            .unwrap(),
    )
    .await
    .unwrap();

    assert!(matches!(&events[0].kind, EventKind::StreamStart { model, .. } if model == "opus"));
    let text: String = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "hello");
    assert!(events.last().unwrap().is_stream_end());
    assert!(cli.argv()[0].contains("--model opus"));
}
