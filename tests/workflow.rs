//! End-to-end runs of the workflow against a scripted model.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use selftool::directory::{Directory, DirectoryError, Registration, ToolDirectory};
use selftool::inference::LanguageModel;
use selftool::types::{ToolCategory, ToolSpec};
use selftool::workflow::prompts::{
    ANALYZE_HEADER, FORMAT_HEADER, GENERATE_HEADER, PLAN_HEADER, REPLY_HEADER,
};
use selftool::workflow::{Step, WorkflowConfig, WorkflowEngine, WorkflowState};

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Answers each prompt through a closure and records every prompt it saw.
struct ScriptedModel {
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts_with(&self, header: &str) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|p| p.starts_with(header))
            .cloned()
            .collect()
    }

    fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        (self.respond)(prompt)
    }
}

fn needs_tool(description: &str, category: &str) -> String {
    json!({
        "need_tool": true,
        "task_description": description,
        "task_category": category,
        "direct_answer": ""
    })
    .to_string()
}

fn plan_of(tasks: &[(&str, &str)]) -> String {
    let tasks: Vec<_> = tasks
        .iter()
        .enumerate()
        .map(|(i, (description, category))| {
            json!({"id": i + 1, "description": description, "category": category})
        })
        .collect();
    json!({ "tasks": tasks }).to_string()
}

fn tool_json(name: &str, category: &str, code: &str) -> String {
    format!(
        "```json\n{}\n```",
        json!({
            "name": name,
            "description": format!("{} tool", name),
            "parameters": {},
            "return_kind": "string",
            "category": category,
            "code": code
        })
    )
}

const DATE_CODE: &str = "fn get_current_date() {\n    datetime::today()\n}";
const DICE_CODE: &str = r#"fn roll_two_dice() {
    import "random" as rng;
    let a = rng::int(1, 6);
    let b = rng::int(1, 6);
    `${a} and ${b}`
}"#;

fn spec(name: &str, description: &str, category: ToolCategory, code: &str) -> ToolSpec {
    ToolSpec {
        name: name.into(),
        description: description.into(),
        parameters: Default::default(),
        return_kind: "string".into(),
        category,
        code: code.into(),
        version: 1,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    directory: Arc<Directory>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(Directory::in_memory(dir.path().join("tools")));
        Self {
            _dir: dir,
            directory,
        }
    }

    fn engine(&self, llm: Arc<ScriptedModel>) -> WorkflowEngine {
        WorkflowEngine::new(llm, self.directory.clone(), WorkflowConfig::default())
    }
}

fn is_iso_date(text: &str) -> bool {
    text.len() == 10 && text.as_bytes()[4] == b'-' && text.as_bytes()[7] == b'-'
}

// ---------------------------------------------------------------------------
// Multi-subtask flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_subtasks_are_generated_executed_and_registered_in_order() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("Date and dice", "other")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("Get the current date", "datetime"), ("Roll two dice", "math")])
        } else if prompt.starts_with(GENERATE_HEADER) && prompt.contains("Get the current date") {
            tool_json("get_current_date", "datetime", DATE_CODE)
        } else if prompt.starts_with(GENERATE_HEADER) && prompt.contains("Roll two dice") {
            tool_json("roll_two_dice", "math", DICE_CODE)
        } else if prompt.starts_with(FORMAT_HEADER) {
            "Here you go.".to_string()
        } else {
            bail!("unexpected prompt")
        })
    });

    let state = harness
        .engine(llm.clone())
        .run("What is today's date? Also roll two dice.")
        .await;

    assert!(state.succeeded(), "{:?}", state.task_results);
    assert_eq!(state.task_list.len(), 2);
    assert_eq!(state.task_results.len(), 2);

    let date = &state.task_results[0];
    assert_eq!(date.task_id, 1);
    assert!(is_iso_date(date.result.as_deref().unwrap()));
    assert!(date.tool_file.as_deref().unwrap().ends_with("get_current_date.rhai"));

    let dice = &state.task_results[1];
    assert_eq!(dice.task_id, 2);
    assert!(dice.result.as_deref().unwrap().contains(" and "));

    assert!(state
        .aggregated
        .starts_with("Task 1 (Get the current date): "));
    assert!(state.aggregated.contains("\nTask 2 (Roll two dice): "));
    assert_eq!(state.response, "Here you go.");

    assert_eq!(
        &state.trace[..9],
        &[
            Step::Analyze,
            Step::PlanTasks,
            Step::PrepareTask,
            Step::Search,
            Step::Generate,
            Step::SafetyCheck,
            Step::Execute,
            Step::Register,
            Step::SaveResult,
        ]
    );
    assert_eq!(
        &state.trace[state.trace.len() - 3..],
        &[Step::Aggregate, Step::FormatResponse, Step::End]
    );
    assert!(state.tool_registered);
    assert!(state.tool_cached);

    assert_eq!(
        harness.directory.list_names().await.unwrap(),
        vec!["get_current_date", "roll_two_dice"]
    );
    assert_eq!(
        harness.directory.audit_files().await.unwrap(),
        vec!["get_current_date", "roll_two_dice"]
    );
    assert_eq!(llm.prompts_with(GENERATE_HEADER).len(), 2);
}

// ---------------------------------------------------------------------------
// No tool needed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn greeting_is_answered_directly() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|prompt| {
        if prompt.starts_with(ANALYZE_HEADER) {
            Ok(json!({
                "need_tool": false,
                "task_description": "greeting",
                "task_category": "other",
                "direct_answer": "Hi! How can I help?"
            })
            .to_string())
        } else {
            bail!("only analysis expected")
        }
    });

    let state = harness.engine(llm.clone()).run("hello").await;

    assert_eq!(state.trace, vec![Step::Analyze, Step::End]);
    assert_eq!(state.response, "Hi! How can I help?");
    assert!(state.task_list.is_empty());
    assert!(state.task_results.is_empty());
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn blank_direct_answer_asks_for_a_reply() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            json!({"need_tool": false, "direct_answer": "  "}).to_string()
        } else if prompt.starts_with(REPLY_HEADER) {
            "Hello yourself.".to_string()
        } else {
            bail!("unexpected prompt")
        })
    });

    let state = harness.engine(llm.clone()).run("hello").await;

    assert_eq!(state.response, "Hello yourself.");
    assert_eq!(llm.prompts_with(REPLY_HEADER).len(), 1);
}

// ---------------------------------------------------------------------------
// Retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsafe_code_is_rejected_after_the_attempt_budget() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("List the files here", "other")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("List the files here", "other")])
        } else if prompt.starts_with(GENERATE_HEADER) {
            tool_json(
                "list_files",
                "other",
                "fn list_files() { import \"os\" as o; o::system(\"ls\") }",
            )
        } else if prompt.starts_with(FORMAT_HEADER) {
            "Sorry.".to_string()
        } else {
            bail!("unexpected prompt")
        })
    });

    let engine = harness.engine(llm.clone());
    let budget = engine.config().max_generation_attempts as usize;
    assert_eq!(budget, 3);
    let state = engine.run("List the files here").await;

    assert_eq!(state.visits(Step::Generate), budget);
    assert_eq!(state.visits(Step::Regenerate), budget - 1);
    assert_eq!(state.visits(Step::Reject), 1);
    assert_eq!(state.visits(Step::Execute), 0);
    assert_eq!(state.visits(Step::Register), 0);

    let result = &state.task_results[0];
    assert!(result.result.is_none());
    let error = result.error.as_deref().unwrap();
    assert!(error.contains("after 3 attempt(s)"), "{}", error);
    assert!(error.contains("os"));
    assert!(!state.succeeded());

    let prompts = llm.prompts_with(GENERATE_HEADER);
    assert!(!prompts[0].contains("Safety check failed"));
    assert!(prompts[1].contains("Safety check failed"));
    assert!(prompts[2].contains("forbidden module referenced: os"));

    assert!(harness.directory.list_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_failure_feeds_the_next_attempt() {
    let harness = Harness::new();
    let generations = Arc::new(AtomicUsize::new(0));
    let counter = generations.clone();
    let llm = ScriptedModel::new(move |prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("Roll a die", "math")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("Roll a die", "math")])
        } else if prompt.starts_with(GENERATE_HEADER) {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                tool_json("roll_die", "math", "fn roll_die() { throw \"kaboom\"; }")
            } else {
                tool_json("roll_die", "math", "fn roll_die() { random::dice(6) }")
            }
        } else if prompt.starts_with(FORMAT_HEADER) {
            "Rolled.".to_string()
        } else {
            bail!("unexpected prompt")
        })
    });

    let state = harness.engine(llm.clone()).run("Roll a die").await;

    assert!(state.succeeded(), "{:?}", state.task_results);
    assert_eq!(state.visits(Step::Execute), 2);
    assert_eq!(state.visits(Step::Regenerate), 1);
    assert_eq!(state.generation_attempt, 2);

    let roll: i64 = state.task_results[0].result.as_deref().unwrap().parse().unwrap();
    assert!((1..=6).contains(&roll));

    let prompts = llm.prompts_with(GENERATE_HEADER);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Execution failed"));
    assert!(prompts[1].contains("kaboom"));

    let stored = harness.directory.get("roll_die").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn model_outage_degrades_to_a_rejected_subtask() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|_| bail!("connection refused"));

    let state = harness.engine(llm).run("add 2 and 3").await;

    assert!(state.error.is_none());
    assert_eq!(state.task_list.len(), 1);
    assert_eq!(state.task_list[0].description, "add 2 and 3");
    assert_eq!(state.visits(Step::Reject), 1);

    let error = state.task_results[0].error.as_deref().unwrap();
    assert!(error.contains("model call failed"), "{}", error);
    // Formatting failed too, so the raw aggregate is returned.
    assert_eq!(state.response, state.aggregated);
}

// ---------------------------------------------------------------------------
// Reuse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registered_tool_is_reused_without_generation() {
    let harness = Harness::new();
    harness
        .directory
        .register(&spec(
            "get_current_date",
            "Return today's date",
            ToolCategory::Datetime,
            DATE_CODE,
        ))
        .await
        .unwrap();

    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("Get the current date", "datetime")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("Get the current date", "datetime")])
        } else if prompt.starts_with(FORMAT_HEADER) {
            "Today.".to_string()
        } else {
            bail!("generation must not happen")
        })
    });

    let state = harness.engine(llm.clone()).run("what's the date today?").await;

    assert!(state.succeeded());
    assert_eq!(state.visits(Step::UseExisting), 1);
    assert_eq!(state.visits(Step::Generate), 0);
    assert!(llm.prompts_with(GENERATE_HEADER).is_empty());
    assert!(is_iso_date(state.task_results[0].result.as_deref().unwrap()));
    assert!(!state.tool_registered);
    assert!(state.task_results[0].tool_file.is_none());
}

#[tokio::test]
async fn stored_tool_that_fails_policy_is_not_run() {
    let harness = Harness::new();
    harness
        .directory
        .register(&spec(
            "get_current_time",
            "Return the current time",
            ToolCategory::Datetime,
            "fn get_current_time() { print(\"leak\"); datetime::now() }",
        ))
        .await
        .unwrap();

    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("What time is it now", "datetime")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("What time is it now", "datetime")])
        } else if prompt.starts_with(FORMAT_HEADER) {
            "No luck.".to_string()
        } else {
            bail!("unexpected prompt")
        })
    });

    let state = harness.engine(llm).run("What time is it now?").await;

    assert_eq!(state.visits(Step::UseExisting), 1);
    assert_eq!(state.visits(Step::Execute), 0);
    let error = state.task_results[0].error.as_deref().unwrap();
    assert!(error.contains("no longer passes"), "{}", error);
    assert!(error.contains("print"));
}

// ---------------------------------------------------------------------------
// Degraded collaborators
// ---------------------------------------------------------------------------

/// A directory whose backing store is gone.
struct BrokenDirectory;

#[async_trait]
impl ToolDirectory for BrokenDirectory {
    async fn lookup_by_category_keywords(
        &self,
        _text: &str,
        _category: ToolCategory,
    ) -> Result<Option<ToolSpec>, DirectoryError> {
        Err(DirectoryError::Unavailable("disk gone".into()))
    }

    async fn register(&self, _spec: &ToolSpec) -> Result<Registration, DirectoryError> {
        Err(DirectoryError::Unavailable("disk gone".into()))
    }

    async fn persist_as_file(&self, _spec: &ToolSpec) -> Result<PathBuf, DirectoryError> {
        Err(DirectoryError::Unavailable("disk gone".into()))
    }

    async fn list_names(&self) -> Result<Vec<String>, DirectoryError> {
        Err(DirectoryError::Unavailable("disk gone".into()))
    }

    async fn get(&self, _name: &str) -> Result<Option<ToolSpec>, DirectoryError> {
        Err(DirectoryError::Unavailable("disk gone".into()))
    }
}

#[tokio::test]
async fn broken_directory_does_not_block_answers() {
    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("Get the current date", "datetime")
        } else if prompt.starts_with(PLAN_HEADER) {
            plan_of(&[("Get the current date", "datetime")])
        } else if prompt.starts_with(GENERATE_HEADER) {
            tool_json("get_current_date", "datetime", DATE_CODE)
        } else {
            "Done.".to_string()
        })
    });
    let engine = WorkflowEngine::new(llm, Arc::new(BrokenDirectory), WorkflowConfig::default());

    let state = engine.run("what is the date").await;

    assert!(state.succeeded());
    assert_eq!(state.visits(Step::Register), 1);
    assert!(!state.tool_registered);
    assert!(!state.tool_cached);
    assert!(state.tool_file.is_none());
    assert!(is_iso_date(state.task_results[0].result.as_deref().unwrap()));
}

// ---------------------------------------------------------------------------
// Planning edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_request_ends_with_an_error() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|_| bail!("no calls expected"));

    let state: WorkflowState = harness.engine(llm.clone()).run("   ").await;

    assert!(state.error.is_some());
    assert_eq!(state.trace, vec![Step::Analyze, Step::PlanTasks, Step::End]);
    assert!(state.task_results.is_empty());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn unusable_plan_falls_back_to_one_subtask() {
    let harness = Harness::new();
    let llm = ScriptedModel::new(|prompt| {
        Ok(if prompt.starts_with(ANALYZE_HEADER) {
            needs_tool("Get the current date", "datetime")
        } else if prompt.starts_with(PLAN_HEADER) {
            "I would rather not plan this.".to_string()
        } else if prompt.starts_with(GENERATE_HEADER) {
            tool_json("get_current_date", "datetime", DATE_CODE)
        } else {
            "Done.".to_string()
        })
    });

    let state = harness.engine(llm).run("date please").await;

    assert_eq!(state.task_list.len(), 1);
    assert_eq!(state.task_list[0].id, 1);
    assert_eq!(state.task_list[0].description, "Get the current date");
    assert_eq!(state.task_list[0].category, ToolCategory::Datetime);
    assert!(state.succeeded());
}
