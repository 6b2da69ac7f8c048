//! End-to-end pipeline tests against a recording sandbox and mock HTTP APIs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sandbox_review::{
    CloneOptions, CommandOutput, CommentOutcome, Error, OutputEvent, PipelineOutcome, Result,
    ReviewConfig, ReviewPipeline, RunOptions, Sandbox, SandboxProvider, SandboxSpec,
    FALLBACK_REVIEW,
};

const TOKEN: &str = "ghs_test_token";
const SNAPSHOT: &str = "abc123 Add widget\n---\npackage.json\nsrc\n";

/// Something the fake sandbox was asked to do.
#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create(SandboxSpec),
    Clone { url: String, options: CloneOptions },
    Run { command: String, cwd: Option<String> },
    Kill,
}

/// How the fake sandbox answers a command.
#[derive(Debug, Clone)]
enum Scripted {
    Exit { stdout: String, code: i32 },
    Fatal,
}

#[derive(Clone, Default)]
struct FakeProvider {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<HashMap<String, Scripted>>,
    fail_create: bool,
    fail_clone: bool,
}

impl FakeProvider {
    fn new() -> Self {
        let mut script = HashMap::new();
        let defaults = ReviewConfig::new("acme/widgets", "feature-x").commands;
        script.insert(
            defaults.inspect,
            Scripted::Exit {
                stdout: SNAPSHOT.to_string(),
                code: 0,
            },
        );
        script.insert(
            defaults.install,
            Scripted::Exit {
                stdout: "added 12 packages\n".to_string(),
                code: 0,
            },
        );
        script.insert(
            defaults.test,
            Scripted::Exit {
                stdout: "3 passing\n".to_string(),
                code: 0,
            },
        );
        Self {
            script: Arc::new(script),
            ..Default::default()
        }
    }

    fn scripted(mut self, command: &str, answer: Scripted) -> Self {
        Arc::make_mut(&mut self.script).insert(command.to_string(), answer);
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn kill_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Kill).count()
    }

    fn commands_run(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }
}

struct FakeSandbox {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<HashMap<String, Scripted>>,
    fail_clone: bool,
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        "fake-sandbox"
    }

    async fn git_clone(&self, url: &str, options: CloneOptions) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Clone {
            url: url.to_string(),
            options,
        });
        if self.fail_clone {
            return Err(Error::Git("remote branch not found".to_string()));
        }
        Ok(())
    }

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call::Run {
            command: command.to_string(),
            cwd: options.cwd.clone(),
        });

        match self.script.get(command).cloned() {
            Some(Scripted::Exit { stdout, code }) => {
                if let Some(tx) = &options.output {
                    for line in stdout.lines() {
                        let _ = tx.send(OutputEvent::Stdout(line.to_string())).await;
                    }
                }
                CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_code: code,
                }
                .into_result()
            }
            Some(Scripted::Fatal) => Err(Error::Io(std::io::Error::other("connection reset"))),
            None => panic!("unexpected command: {}", command),
        }
    }

    async fn kill(self: Box<Self>) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Kill);
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>> {
        self.calls.lock().unwrap().push(Call::Create(spec));
        if self.fail_create {
            return Err(Error::SandboxCreation("quota exceeded".to_string()));
        }
        Ok(Box::new(FakeSandbox {
            calls: self.calls.clone(),
            script: self.script.clone(),
            fail_clone: self.fail_clone,
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn config_for(server: &MockServer, llm_key: Option<&str>) -> ReviewConfig {
    let mut config = ReviewConfig::new("acme/widgets", "feature-x");
    config.pr_number = Some(42);
    config.github_repository = Some("acme/widgets".to_string());
    config.github_token = Some(TOKEN.to_string());
    config.llm_api_key = llm_key.map(str::to_string);
    config.github.api_url = server.uri();
    config.review.base_url = server.uri();
    config
}

async fn mount_comment_endpoint(server: &MockServer, response: ResponseTemplate, times: u64) {
    Mock::given(method("POST"))
        .and(path("/repos/acme/widgets/issues/42/comments"))
        .and(header("Authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_completion_endpoint(server: &MockServer, content: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": content}}
            ]
        })))
        .expect(times)
        .mount(server)
        .await;
}

async fn posted_comment_body(server: &MockServer) -> String {
    let requests = server.received_requests().await.expect("request recording enabled");
    let comment = requests
        .iter()
        .find(|r| r.url.path().ends_with("/comments"))
        .expect("comment was posted");
    let body: Value = comment.body_json().expect("comment body is JSON");
    body["body"].as_str().expect("body field").to_string()
}

#[tokio::test]
async fn passing_tests_with_model_key_post_model_review() {
    let server = MockServer::start().await;
    mount_completion_endpoint(&server, "Consider validating widget sizes.", 1).await;
    mount_comment_endpoint(
        &server,
        ResponseTemplate::new(201).set_body_json(json!({
            "html_url": "https://github.com/acme/widgets/pull/42#issuecomment-1"
        })),
        1,
    )
    .await;

    let provider = FakeProvider::new();
    let pipeline =
        ReviewPipeline::from_config(config_for(&server, Some("sk-test")), provider.clone())
            .unwrap();

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    match &outcome {
        PipelineOutcome::Completed {
            review, comment, ..
        } => {
            assert_eq!(review, "Consider validating widget sizes.");
            assert_eq!(
                *comment,
                CommentOutcome::Posted {
                    url: Some("https://github.com/acme/widgets/pull/42#issuecomment-1".to_string())
                }
            );
        }
        other => panic!("expected Completed, got {:?}", other),
    }

    let body = posted_comment_body(&server).await;
    assert!(body.starts_with("## AI Code Review\n\nConsider validating widget sizes."));

    // The snapshot is what the model was asked about.
    let requests = server.received_requests().await.unwrap();
    let completion = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .unwrap();
    let request: Value = completion.body_json().unwrap();
    assert_eq!(request["model"], "gpt-4o-mini");
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][1]["role"], "user");
    assert_eq!(request["messages"][1]["content"], SNAPSHOT);

    assert_eq!(provider.kill_count(), 1);
    server.verify().await;
}

#[tokio::test]
async fn missing_model_key_posts_fallback_without_calling_model() {
    let server = MockServer::start().await;
    mount_completion_endpoint(&server, "unused", 0).await;
    mount_comment_endpoint(&server, ResponseTemplate::new(201), 1).await;

    let provider = FakeProvider::new();
    let pipeline = ReviewPipeline::from_config(config_for(&server, None), provider.clone()).unwrap();

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    let body = posted_comment_body(&server).await;
    assert!(body.contains(FALLBACK_REVIEW));
    assert_eq!(provider.kill_count(), 1);
    server.verify().await;
}

#[tokio::test]
async fn failing_tests_exit_one_and_post_nothing() {
    let server = MockServer::start().await;
    mount_comment_endpoint(&server, ResponseTemplate::new(201), 0).await;

    let provider = FakeProvider::new().scripted(
        "npm test",
        Scripted::Exit {
            stdout: "1 failing\n".to_string(),
            code: 3,
        },
    );
    let pipeline = ReviewPipeline::from_config(config_for(&server, None), provider.clone()).unwrap();

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(
        outcome,
        PipelineOutcome::TestsFailed {
            sandbox_id: "fake-sandbox".to_string(),
            exit_code: 3,
        }
    );
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(provider.kill_count(), 1);
    assert_eq!(provider.calls().last(), Some(&Call::Kill));
    server.verify().await;
}

#[tokio::test]
async fn failing_install_skips_test_command() {
    let server = MockServer::start().await;
    mount_comment_endpoint(&server, ResponseTemplate::new(201), 0).await;

    let provider = FakeProvider::new().scripted(
        "npm install --silent",
        Scripted::Exit {
            stdout: String::new(),
            code: 1,
        },
    );
    let pipeline = ReviewPipeline::from_config(config_for(&server, None), provider.clone()).unwrap();

    let outcome = pipeline.run().await.unwrap();

    assert!(matches!(outcome, PipelineOutcome::TestsFailed { exit_code: 1, .. }));
    assert!(!provider.commands_run().contains(&"npm test".to_string()));
    assert_eq!(provider.kill_count(), 1);
    server.verify().await;
}

#[tokio::test]
async fn rejected_comment_still_completes() {
    let server = MockServer::start().await;
    mount_comment_endpoint(
        &server,
        ResponseTemplate::new(403).set_body_string("Resource not accessible by integration"),
        1,
    )
    .await;

    let provider = FakeProvider::new();
    let pipeline = ReviewPipeline::from_config(config_for(&server, None), provider.clone()).unwrap();

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    match outcome {
        PipelineOutcome::Completed { comment, .. } => assert_eq!(
            comment,
            CommentOutcome::Rejected {
                status: 403,
                body: "Resource not accessible by integration".to_string(),
            }
        ),
        other => panic!("expected Completed, got {:?}", other),
    }
    assert_eq!(provider.kill_count(), 1);
}

#[tokio::test]
async fn clone_targets_pr_branch_with_token_auth() {
    let server = MockServer::start().await;
    mount_comment_endpoint(&server, ResponseTemplate::new(201), 1).await;

    let provider = FakeProvider::new();
    let pipeline = ReviewPipeline::from_config(config_for(&server, None), provider.clone()).unwrap();
    pipeline.run().await.unwrap();

    let calls = provider.calls();
    assert_eq!(
        calls[0],
        Call::Create(
            SandboxSpec::new(std::time::Duration::from_secs(300)).with_image("node:20")
        )
    );
    assert_eq!(
        calls[1],
        Call::Clone {
            url: "https://github.com/acme/widgets.git".to_string(),
            options: CloneOptions {
                path: "/home/user/repo".to_string(),
                branch: "feature-x".to_string(),
                username: "x-access-token".to_string(),
                password: Some(TOKEN.to_string()),
                depth: 1,
            },
        }
    );

    // Every command runs inside the clone, in pipeline order.
    let runs: Vec<Call> = calls
        .iter()
        .filter(|c| matches!(c, Call::Run { .. }))
        .cloned()
        .collect();
    let expected: Vec<Call> = [
        r#"git log --oneline -3 && echo "---" && ls -la"#,
        "npm install --silent",
        "npm test",
    ]
    .iter()
    .map(|command| Call::Run {
        command: command.to_string(),
        cwd: Some("/home/user/repo".to_string()),
    })
    .collect();
    assert_eq!(runs, expected);
}

#[tokio::test]
async fn fatal_error_after_provisioning_still_disposes() {
    let inspect = ReviewConfig::new("a/b", "c").commands.inspect;
    let provider = FakeProvider::new().scripted(&inspect, Scripted::Fatal);

    let mut config = ReviewConfig::new("acme/widgets", "feature-x");
    config.github_token = Some(TOKEN.to_string());
    let pipeline = ReviewPipeline::from_config(config, provider.clone()).unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    assert_eq!(provider.kill_count(), 1);
    assert!(!provider.commands_run().contains(&"npm test".to_string()));
}

#[tokio::test]
async fn fatal_error_during_tests_propagates_after_disposal() {
    let provider = FakeProvider::new().scripted("npm test", Scripted::Fatal);
    let pipeline = ReviewPipeline::from_config(
        ReviewConfig::new("acme/widgets", "feature-x"),
        provider.clone(),
    )
    .unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.exit_code(), None);
    assert_eq!(provider.kill_count(), 1);
}

#[tokio::test]
async fn clone_failure_disposes_sandbox() {
    let provider = FakeProvider {
        fail_clone: true,
        ..FakeProvider::new()
    };
    let pipeline = ReviewPipeline::from_config(
        ReviewConfig::new("acme/widgets", "missing-branch"),
        provider.clone(),
    )
    .unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, Error::Git(_)));
    assert_eq!(provider.kill_count(), 1);
    assert!(provider.commands_run().is_empty());
}

#[tokio::test]
async fn provisioning_failure_has_nothing_to_dispose() {
    let provider = FakeProvider {
        fail_create: true,
        ..FakeProvider::new()
    };
    let pipeline = ReviewPipeline::from_config(
        ReviewConfig::new("acme/widgets", "feature-x"),
        provider.clone(),
    )
    .unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, Error::SandboxCreation(_)));
    assert_eq!(provider.kill_count(), 0);
}

#[tokio::test]
async fn incomplete_reporting_inputs_skip_comment() {
    // Token present but no PR number: the comment step is skipped.
    let mut config = ReviewConfig::new("acme/widgets", "feature-x");
    config.github_token = Some(TOKEN.to_string());
    config.github_repository = Some("acme/widgets".to_string());

    let provider = FakeProvider::new();
    let pipeline = ReviewPipeline::from_config(config, provider.clone()).unwrap();

    let outcome = pipeline.run().await.unwrap();

    match outcome {
        PipelineOutcome::Completed {
            comment, review, ..
        } => {
            assert_eq!(comment, CommentOutcome::Skipped);
            assert_eq!(review, FALLBACK_REVIEW);
        }
        other => panic!("expected Completed, got {:?}", other),
    }
    assert_eq!(provider.kill_count(), 1);
}

#[tokio::test]
async fn model_error_is_fatal_but_disposes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    mount_comment_endpoint(&server, ResponseTemplate::new(201), 0).await;

    let provider = FakeProvider::new();
    let pipeline =
        ReviewPipeline::from_config(config_for(&server, Some("sk-test")), provider.clone())
            .unwrap();

    let err = pipeline.run().await.unwrap_err();

    match err {
        Error::Review(msg) => {
            assert!(msg.contains("500"));
            assert!(msg.contains("upstream overloaded"));
        }
        other => panic!("expected Review error, got {:?}", other),
    }
    assert_eq!(provider.kill_count(), 1);
    server.verify().await;
}

#[tokio::test]
async fn empty_choices_is_a_review_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let provider = FakeProvider::new();
    let pipeline =
        ReviewPipeline::from_config(config_for(&server, Some("sk-test")), provider.clone())
            .unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, Error::Review(msg) if msg.contains("no choices")));
    assert_eq!(provider.kill_count(), 1);
}
