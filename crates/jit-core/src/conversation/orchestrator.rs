//! The synthesis session: cache check, conversation loop, candidate
//! evaluation and persistence.
//!
//! ```text
//! CHECK_CACHE -> PROMPTING -> AWAITING_RESPONSE -> DISPATCHING
//!     -> COMPILING_AND_TESTING -> ACCEPTED | RETRY | EXHAUSTED
//! ```
//!
//! Reasoning and reveal calls loop back to `AWAITING_RESPONSE` without
//! consuming an attempt. Only submissions that fail to load or fail a test
//! count against `max_tries`.

use std::fmt;

use chrono::{SubsecRound, Utc};
use tracing::{debug, info, warn};

use crate::conversation::messages::{Message, ToolCall};
use crate::conversation::operator::{Operator, StdinOperator};
use crate::conversation::prompt::{
    failure_feedback, implementation_request, unavailable_type, REASONING_ACK, SYSTEM_PROMPT,
    TOOL_REQUIRED,
};
use crate::conversation::service::{CompletionRequest, GenerativeService};
use crate::conversation::tools::{tool_definitions, SubmitVersion, ToolAction};
use crate::errors::{JitError, JitResult};
use crate::evaluate::formatter::{format_or_passthrough, Formatter, RuffFormatter};
use crate::evaluate::{hoist_imports, CandidateEvaluator};
use crate::models::{
    Declaration, SessionOptions, SynthesisOutcome, Synthesized, TestOutcome, TestPredicate,
    MAX_TURNS_PER_TRY,
};
use crate::resolver::TypeResolver;
use crate::source::declarations::clean_source;
use crate::source::rewrite::rewrite_in_place;
use crate::source::SourceProvider;
use crate::store::artifact::{merge_unit, Artifact};
use crate::store::{fingerprint, VersionStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    CheckCache,
    Prompting,
    AwaitingResponse,
    Dispatching,
    CompilingAndTesting,
    Accepted,
    Retry,
    Exhausted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::CheckCache => "CHECK_CACHE",
            SessionState::Prompting => "PROMPTING",
            SessionState::AwaitingResponse => "AWAITING_RESPONSE",
            SessionState::Dispatching => "DISPATCHING",
            SessionState::CompilingAndTesting => "COMPILING_AND_TESTING",
            SessionState::Accepted => "ACCEPTED",
            SessionState::Retry => "RETRY",
            SessionState::Exhausted => "EXHAUSTED",
        };
        f.write_str(name)
    }
}

/// Mutable state of one conversation.
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    state: SessionState,
    messages: Vec<Message>,
    chain_of_thought: Vec<String>,
    /// Highest version number handed out so far.
    version: u32,
    /// Rejected submissions.
    tries: usize,
    turns: usize,
}

impl ConversationState {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tries(&self) -> usize {
        self.tries
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {} -> {}", self.state, next);
        self.state = next;
    }
}

enum Attempt<T> {
    Accepted { synthesized: Synthesized<T>, unit: String },
    Rejected { feedback: String },
}

/// Run every predicate, without short-circuiting, logging each outcome.
fn run_tests<T>(tests: &[Box<dyn TestPredicate<T>>], target: &T) -> Vec<TestOutcome> {
    tests
        .iter()
        .map(|test| {
            let outcome = test.check(target);
            info!(
                "Test case `{}`: {}",
                outcome.description,
                if outcome.passed { "PASSED" } else { "FAILED" }
            );
            outcome
        })
        .collect()
}

/// Drives one declaration from signature to accepted implementation.
pub struct Coder<E: CandidateEvaluator> {
    service: Box<dyn GenerativeService>,
    evaluator: E,
    sources: Box<dyn SourceProvider>,
    store: VersionStore,
    formatter: Box<dyn Formatter>,
    operator: Box<dyn Operator>,
    options: SessionOptions,
}

impl<E: CandidateEvaluator> Coder<E> {
    pub fn new(
        service: impl GenerativeService + 'static,
        evaluator: E,
        sources: impl SourceProvider + 'static,
        store: VersionStore,
    ) -> Self {
        Self {
            service: Box::new(service),
            evaluator,
            sources: Box::new(sources),
            store,
            formatter: Box::new(RuffFormatter::default()),
            operator: Box::new(StdinOperator),
            options: SessionOptions::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    pub fn with_operator(mut self, operator: impl Operator + 'static) -> Self {
        self.operator = Box::new(operator);
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Produce a tested implementation of `declaration`.
    pub fn run(
        &mut self,
        declaration: &Declaration,
        tests: &[Box<dyn TestPredicate<E::Output>>],
    ) -> JitResult<SynthesisOutcome<E::Output>> {
        let max_tries = self.options.max_tries;
        if max_tries == 0 {
            return Err(JitError::Exhausted { max_tries });
        }

        let mut state = ConversationState::default();
        let fingerprint = fingerprint(declaration, tests);
        if self.options.reuse_cached {
            if let Some(hit) = self.load_cached(declaration, &fingerprint)? {
                state.transition(SessionState::Accepted);
                return Ok(SynthesisOutcome::Ready(hit));
            }
        }

        state.transition(SessionState::Prompting);
        self.service.check_ready()?;

        let mut resolver = TypeResolver::new(self.sources.as_ref());
        resolver.seed(declaration);
        let cleaned = clean_source(&declaration.source);
        info!(
            "Implementing {} {}:\n{cleaned}",
            declaration.kind, declaration.qualified_name
        );
        state.messages.push(Message::system(SYSTEM_PROMPT));
        state.messages.push(Message::user(implementation_request(&cleaned)));

        let max_turns = max_tries.saturating_mul(MAX_TURNS_PER_TRY);
        let mut confirmed = 0;
        loop {
            if state.turns >= max_turns {
                warn!("No accepted submission after {} turns", state.turns);
                state.transition(SessionState::Exhausted);
                return Err(JitError::Exhausted { max_tries });
            }
            if !self.options.autonomous && state.tries > confirmed {
                if !self.operator.confirm_continue(state.tries) {
                    info!("Operation cancelled by operator");
                    return Ok(SynthesisOutcome::Cancelled);
                }
                confirmed = state.tries;
            }

            state.transition(SessionState::AwaitingResponse);
            let revealable = resolver.unread();
            let tools = tool_definitions(&revealable);
            let reply = self.service.complete(&CompletionRequest {
                messages: &state.messages,
                tools: &tools,
            })?;
            state.turns += 1;

            let calls: Vec<ToolCall> = reply.tool_calls.clone();
            state.messages.push(reply);
            if calls.is_empty() {
                debug!("Turn {} carried no tool call", state.turns);
                state.messages.push(Message::user(TOOL_REQUIRED));
                continue;
            }

            state.transition(SessionState::Dispatching);
            for call in calls {
                let action = match ToolAction::parse(&call, &revealable) {
                    Ok(action) => action,
                    Err(e) => {
                        warn!("Rejected tool call {}: {e}", call.name);
                        state
                            .messages
                            .push(Message::tool_result(&call.id, format!("Error: {e}")));
                        continue;
                    }
                };

                match action {
                    ToolAction::Reasoning(reasoning) => {
                        for note in &reasoning.chain_of_thought {
                            info!("Reasoning: {note}");
                        }
                        state.chain_of_thought.extend(reasoning.chain_of_thought);
                        state
                            .messages
                            .push(Message::tool_result(&call.id, REASONING_ACK));
                    }
                    ToolAction::Reveal(reveal) => {
                        let content = match resolver.resolve(&reveal.type_name) {
                            Some(source) => {
                                info!("Source of {}:\n{source}", reveal.type_name);
                                source.to_string()
                            }
                            None => unavailable_type(&reveal.type_name),
                        };
                        state.messages.push(Message::tool_result(&call.id, content));
                    }
                    ToolAction::Submit(candidate) => {
                        state.transition(SessionState::CompilingAndTesting);
                        match self.attempt(declaration, tests, &fingerprint, &mut state, candidate)? {
                            Attempt::Accepted { synthesized, unit } => {
                                state.transition(SessionState::Accepted);
                                if self.options.in_place {
                                    let rewritten = rewrite_in_place(declaration, &unit)?;
                                    return Ok(SynthesisOutcome::Relaunch { rewritten });
                                }
                                return Ok(SynthesisOutcome::Ready(synthesized));
                            }
                            Attempt::Rejected { feedback } => {
                                state.tries += 1;
                                state.messages.push(Message::tool_result(&call.id, feedback));
                                if state.tries >= max_tries {
                                    state.transition(SessionState::Exhausted);
                                    return Err(JitError::Exhausted { max_tries });
                                }
                                state.transition(SessionState::Retry);
                            }
                        }
                    }
                }
            }
        }
    }

    /// The persisted implementation, when its fingerprint still matches and
    /// it loads. A unit that no longer loads is a miss.
    fn load_cached(
        &self,
        declaration: &Declaration,
        fingerprint: &str,
    ) -> JitResult<Option<Synthesized<E::Output>>> {
        let Some(artifact) = self.store.cached(declaration, fingerprint)? else {
            debug!("No cached implementation of {}", declaration.qualified_name);
            return Ok(None);
        };
        match self.evaluator.load(&artifact.unit(), &declaration.name) {
            Ok(value) => {
                info!(
                    "Reusing version {} of {}",
                    artifact.version, declaration.qualified_name
                );
                Ok(Some(Synthesized {
                    value,
                    version: artifact.version,
                    fingerprint: fingerprint.to_string(),
                    artifact_path: self.store.slot(declaration),
                    from_cache: true,
                }))
            }
            Err(e) => {
                warn!(
                    "Cached implementation of {} failed to load, regenerating: {e}",
                    declaration.qualified_name
                );
                Ok(None)
            }
        }
    }

    fn attempt(
        &self,
        declaration: &Declaration,
        tests: &[Box<dyn TestPredicate<E::Output>>],
        fingerprint: &str,
        state: &mut ConversationState,
        candidate: SubmitVersion,
    ) -> JitResult<Attempt<E::Output>> {
        state.version += 1;
        let version = state.version;

        let formatted = format_or_passthrough(self.formatter.as_ref(), &candidate.code);
        let (imports, code) = hoist_imports(&candidate.imports, &formatted);
        let unit = merge_unit(&imports, &code);
        info!("Implementation version {version}:\n{unit}");

        let (loaded, failing, compile_error) =
            match self.evaluator.load(&unit, &declaration.name) {
                Ok(value) => {
                    let failing: Vec<String> = run_tests(tests, &value)
                        .into_iter()
                        .filter(|outcome| !outcome.passed)
                        .map(|outcome| outcome.description)
                        .collect();
                    (Some(value), failing, None)
                }
                Err(e) => {
                    warn!("Version {version} failed to load: {e}");
                    (None, Vec::new(), Some(e.message))
                }
            };
        let passed = loaded.is_some() && failing.is_empty();

        let artifact = Artifact {
            version,
            timestamp: Utc::now().trunc_subsecs(0),
            tests_passed: passed,
            declaration_file: declaration.origin.display().to_string(),
            checksum: fingerprint.to_string(),
            chain_of_thought: state.chain_of_thought.clone(),
            imports,
            code,
        };
        let path = self.store.write(declaration, &artifact)?;

        match loaded {
            Some(value) if passed => {
                info!("All tests passed for version {version}");
                Ok(Attempt::Accepted {
                    synthesized: Synthesized {
                        value,
                        version,
                        fingerprint: fingerprint.to_string(),
                        artifact_path: path,
                        from_cache: false,
                    },
                    unit,
                })
            }
            _ => {
                info!("Version {version} rejected, saved to {}", path.display());
                Ok(Attempt::Rejected {
                    feedback: failure_feedback(&failing, compile_error.as_deref()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::messages::{Role, ToolDefinition};
    use crate::conversation::prompt::TOOL_REQUIRED;
    use crate::conversation::tools::{REASONING_TOOL, REVEAL_TOOL, SUBMIT_TOOL};
    use crate::evaluate::formatter::{FormatterError, NoopFormatter};
    use crate::evaluate::CompileError;
    use crate::models::FnPredicate;
    use crate::source::modules::PythonSource;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::TempDir;

    type Window = fn(&[i64], usize) -> Vec<Vec<i64>>;
    type Requests = Rc<RefCell<Vec<(Vec<Message>, Vec<ToolDefinition>)>>>;

    fn overlapping(seq: &[i64], size: usize) -> Vec<Vec<i64>> {
        seq.windows(size).map(<[i64]>::to_vec).collect()
    }

    fn chunked(seq: &[i64], size: usize) -> Vec<Vec<i64>> {
        seq.chunks(size).map(<[i64]>::to_vec).collect()
    }

    const WINDOW_PY: &str = "\
from typing import List


def sliding_window(sequence: List[int], window_size: int) -> List[List[int]]:
    \"\"\"Create a sliding window of the given size over the sequence.\"\"\"
";

    const OVERLAPPING: &str = "def sliding_window(sequence: List[int], window_size: int) -> List[List[int]]:\n    return [sequence[i : i + window_size] for i in range(len(sequence) - window_size + 1)]\n";
    const CHUNKED: &str = "def sliding_window(sequence: List[int], window_size: int) -> List[List[int]]:\n    return [sequence[i : i + window_size] for i in range(0, len(sequence), window_size)]\n";

    /// Maps recognizable code shapes to Rust implementations.
    struct WindowEvaluator {
        loads: Rc<Cell<usize>>,
    }

    impl CandidateEvaluator for WindowEvaluator {
        type Output = Window;

        fn load(&self, unit: &str, symbol: &str) -> Result<Window, CompileError> {
            self.loads.set(self.loads.get() + 1);
            if !unit.contains(&format!("def {symbol}(")) {
                return Err(CompileError::new(format!(
                    "NameError: name '{symbol}' is not defined"
                )));
            }
            if unit.contains("len(sequence) - window_size + 1") {
                Ok(overlapping)
            } else if unit.contains("range(0, len(sequence), window_size)") {
                Ok(chunked)
            } else {
                Err(CompileError::new("SyntaxError: invalid syntax"))
            }
        }
    }

    /// Loads anything that defines the symbol; the value is the unit text.
    struct EchoEvaluator;

    impl CandidateEvaluator for EchoEvaluator {
        type Output = String;

        fn load(&self, unit: &str, symbol: &str) -> Result<String, CompileError> {
            if unit.contains(&format!("def {symbol}(")) {
                Ok(unit.to_string())
            } else {
                Err(CompileError::new(format!("NameError: name '{symbol}' is not defined")))
            }
        }
    }

    struct ScriptedService {
        replies: VecDeque<Message>,
        requests: Requests,
        ready: bool,
    }

    impl GenerativeService for ScriptedService {
        fn check_ready(&self) -> JitResult<()> {
            if self.ready {
                Ok(())
            } else {
                Err(JitError::Config("OPENAI_API_KEY environment variable not set".into()))
            }
        }

        fn complete(&mut self, request: &CompletionRequest<'_>) -> JitResult<Message> {
            self.requests
                .borrow_mut()
                .push((request.messages.to_vec(), request.tools.to_vec()));
            self.replies
                .pop_front()
                .ok_or_else(|| JitError::Service("script exhausted".into()))
        }
    }

    fn scripted(replies: Vec<Message>) -> (ScriptedService, Requests) {
        let requests = Requests::default();
        let service = ScriptedService {
            replies: replies.into(),
            requests: Rc::clone(&requests),
            ready: true,
        };
        (service, requests)
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
        Message::assistant_calls(vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }])
    }

    fn submit(id: &str, code: &str) -> Message {
        call(
            id,
            SUBMIT_TOOL,
            json!({"imports": ["from typing import List"], "code": code}),
        )
    }

    fn reason(id: &str, notes: &[&str]) -> Message {
        call(id, REASONING_TOOL, json!({ "chain_of_thought": notes }))
    }

    fn window_tests() -> Vec<Box<dyn TestPredicate<Window>>> {
        vec![Box::new(FnPredicate::new(
            "lambda f: f([1, 2, 3, 4, 5], 3) == [[1, 2, 3], [2, 3, 4], [3, 4, 5]]",
            |f: &Window| {
                (
                    f(&[1, 2, 3, 4, 5], 3) == vec![vec![1, 2, 3], vec![2, 3, 4], vec![3, 4, 5]],
                    "sliding window of three over five items".to_string(),
                )
            },
        ))]
    }

    struct Fixture {
        dir: TempDir,
        origin: PathBuf,
        declaration: Declaration,
    }

    impl Fixture {
        fn new(file: &str, contents: &str, name: &str) -> Self {
            let dir = tempfile::Builder::new().prefix("jitproj").tempdir().unwrap();
            let origin = dir.path().join(file);
            std::fs::write(&origin, contents).unwrap();
            let declaration = PythonSource::new(dir.path(), &origin)
                .declaration(name)
                .unwrap();
            Self {
                dir,
                origin,
                declaration,
            }
        }

        fn window() -> Self {
            Self::new("window.py", WINDOW_PY, "sliding_window")
        }

        fn store(&self) -> VersionStore {
            VersionStore::new(self.dir.path().join(".jit_code"), self.dir.path())
        }

        fn sources(&self) -> PythonSource {
            PythonSource::new(self.dir.path(), &self.origin)
        }

        fn coder(&self, service: ScriptedService) -> Coder<WindowEvaluator> {
            Coder::new(
                service,
                WindowEvaluator {
                    loads: Rc::default(),
                },
                self.sources(),
                self.store(),
            )
            .with_formatter(NoopFormatter)
        }
    }

    fn options(max_tries: usize) -> SessionOptions {
        SessionOptions {
            max_tries,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn test_sliding_window_retries_after_failed_tests() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![submit("c1", CHUNKED), submit("c2", OVERLAPPING)]);
        let mut coder = fx.coder(service);

        let synthesized = coder
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 2);
        assert!(!synthesized.from_cache);
        assert_eq!(
            (synthesized.value)(&[1, 2, 3, 4], 2),
            vec![vec![1, 2], vec![2, 3], vec![3, 4]]
        );

        let store = fx.store();
        assert_eq!(synthesized.artifact_path, store.slot(&fx.declaration));
        let failed = std::fs::read_to_string(store.failed_slot(&fx.declaration, 1)).unwrap();
        assert!(failed.contains("# Tests Passed: FAILED"));
        assert!(failed.contains("range(0, len(sequence), window_size)"));

        let accepted = store.read(&fx.declaration).unwrap().unwrap();
        assert!(accepted.tests_passed);
        assert_eq!(accepted.version, 2);
        assert_eq!(accepted.imports, vec!["from typing import List".to_string()]);
        assert_eq!(accepted.checksum, synthesized.fingerprint);

        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);
        let feedback = requests[1].0.last().unwrap();
        assert_eq!(feedback.role, Role::Tool);
        assert_eq!(feedback.tool_call_id.as_deref(), Some("c1"));
        assert!(feedback.content_text().starts_with("Tests failed"));
        assert!(feedback
            .content_text()
            .contains("sliding window of three over five items"));
    }

    #[test]
    fn test_prompt_shows_cleaned_declaration() {
        let fx = Fixture::new(
            "window.py",
            &WINDOW_PY.replace("def sliding_window", "@implement(max_tries=3)\ndef sliding_window"),
            "sliding_window",
        );
        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        fx.coder(service).run(&fx.declaration, &window_tests()).unwrap();

        let requests = requests.borrow();
        let first = &requests[0].0;
        assert_eq!(first[0].role, Role::System);
        let user = first[1].content_text();
        assert!(user.contains("def sliding_window(sequence: List[int]"));
        assert!(!user.contains("@implement"));
    }

    #[test]
    fn test_cache_hit_skips_service() {
        let fx = Fixture::window();
        let (service, _) = scripted(vec![submit("c1", OVERLAPPING)]);
        let first = fx
            .coder(service)
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();

        // No credentials and no script: a hit must not touch the service.
        let (mut service, requests) = scripted(Vec::new());
        service.ready = false;
        let loads = Rc::new(Cell::new(0));
        let mut coder = Coder::new(
            service,
            WindowEvaluator {
                loads: Rc::clone(&loads),
            },
            fx.sources(),
            fx.store(),
        )
        .with_formatter(NoopFormatter);

        let cached = coder
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.version, first.version);
        assert_eq!(cached.fingerprint, first.fingerprint);
        assert_eq!((cached.value)(&[1, 2, 3], 2), vec![vec![1, 2], vec![2, 3]]);
        assert!(requests.borrow().is_empty());
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn test_changed_tests_invalidate_cache() {
        let fx = Fixture::window();
        let (service, _) = scripted(vec![submit("c1", OVERLAPPING)]);
        fx.coder(service).run(&fx.declaration, &window_tests()).unwrap();

        let mut edited = window_tests();
        edited.push(Box::new(FnPredicate::new(
            "lambda f: f([1, 2], 2) == [[1, 2]]",
            |f: &Window| (f(&[1, 2], 2) == vec![vec![1, 2]], "exact fit".to_string()),
        )));
        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        let synthesized = fx
            .coder(service)
            .run(&fx.declaration, &edited)
            .unwrap()
            .into_ready()
            .unwrap();
        assert!(!synthesized.from_cache);
        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn test_reuse_disabled_regenerates() {
        let fx = Fixture::window();
        let (service, _) = scripted(vec![submit("c1", OVERLAPPING)]);
        fx.coder(service).run(&fx.declaration, &window_tests()).unwrap();

        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        let mut coder = fx.coder(service).with_options(SessionOptions {
            reuse_cached: false,
            ..SessionOptions::default()
        });
        let synthesized = coder.run(&fx.declaration, &window_tests()).unwrap().into_ready().unwrap();
        assert!(!synthesized.from_cache);
        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn test_cached_unit_that_fails_to_load_is_a_miss() {
        let fx = Fixture::window();
        let tests = window_tests();
        let store = fx.store();
        store
            .write(
                &fx.declaration,
                &Artifact {
                    version: 1,
                    timestamp: Utc::now().trunc_subsecs(0),
                    tests_passed: true,
                    declaration_file: "window.py".into(),
                    checksum: fingerprint(&fx.declaration, &tests),
                    chain_of_thought: Vec::new(),
                    imports: Vec::new(),
                    code: "def something_else():\n    pass\n".into(),
                },
            )
            .unwrap();

        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        let synthesized = fx.coder(service).run(&fx.declaration, &tests).unwrap().into_ready().unwrap();
        assert!(!synthesized.from_cache);
        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn test_exhaustion_after_max_tries() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![
            submit("c1", CHUNKED),
            submit("c2", CHUNKED),
            submit("c3", OVERLAPPING),
        ]);
        let mut coder = fx.coder(service).with_options(options(2));

        let err = coder.run(&fx.declaration, &window_tests()).unwrap_err();
        assert!(matches!(err, JitError::Exhausted { max_tries: 2 }));
        assert_eq!(requests.borrow().len(), 2);

        let store = fx.store();
        assert!(store.failed_slot(&fx.declaration, 1).exists());
        assert!(store.failed_slot(&fx.declaration, 2).exists());
        assert!(!store.failed_slot(&fx.declaration, 3).exists());
        assert!(!store.exists(&fx.declaration));
    }

    #[test]
    fn test_zero_tries_is_exhausted_immediately() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        let err = fx
            .coder(service)
            .with_options(options(0))
            .run(&fx.declaration, &window_tests())
            .unwrap_err();
        assert!(matches!(err, JitError::Exhausted { max_tries: 0 }));
        assert!(requests.borrow().is_empty());
    }

    #[test]
    fn test_every_predicate_runs_and_all_must_pass() {
        let fx = Fixture::window();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let (c1, c2) = (Rc::clone(&first), Rc::clone(&second));
        let tests: Vec<Box<dyn TestPredicate<Window>>> = vec![
            Box::new(FnPredicate::new("lambda f: False", move |_: &Window| {
                c1.set(c1.get() + 1);
                (false, "always fails".to_string())
            })),
            Box::new(FnPredicate::new("lambda f: True", move |_: &Window| {
                c2.set(c2.get() + 1);
                (true, "always passes".to_string())
            })),
        ];

        let (service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        let err = fx
            .coder(service)
            .with_options(options(1))
            .run(&fx.declaration, &tests)
            .unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!((first.get(), second.get()), (1, 1));
        assert!(!fx.store().exists(&fx.declaration));
        drop(requests);
    }

    #[test]
    fn test_compile_error_consumes_an_attempt() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![
            submit("c1", "def sliding_window(sequence, window_size) return\n"),
            submit("c2", OVERLAPPING),
        ]);
        let synthesized = fx
            .coder(service)
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 2);

        let requests = requests.borrow();
        let feedback = requests[1].0.last().unwrap().content_text().to_string();
        assert!(feedback.contains("could not be loaded"));
        assert!(feedback.contains("SyntaxError"));
        let failed = fx.store().failed_slot(&fx.declaration, 1);
        assert!(std::fs::read_to_string(failed).unwrap().contains("# Tests Passed: FAILED"));
    }

    #[test]
    fn test_reasoning_is_recorded_without_consuming_attempts() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![
            reason("c1", &["Windows overlap by size - 1 items.", "Stop at len - size."]),
            submit("c2", OVERLAPPING),
        ]);
        let synthesized = fx
            .coder(service)
            .with_options(options(1))
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 1);

        let accepted = fx.store().read(&fx.declaration).unwrap().unwrap();
        assert_eq!(
            accepted.chain_of_thought,
            vec!["Windows overlap by size - 1 items.", "Stop at len - size."]
        );
        let requests = requests.borrow();
        assert_eq!(requests[1].0.last().unwrap().content_text(), REASONING_ACK);
    }

    #[test]
    fn test_invalid_calls_get_error_results() {
        let fx = Fixture::window();
        let (service, requests) = scripted(vec![
            call("c1", "RunShell", json!({"cmd": "ls"})),
            call("c2", SUBMIT_TOOL, json!({"code": OVERLAPPING})),
            Message::assistant("Let me think about this."),
            submit("c3", OVERLAPPING),
        ]);
        let synthesized = fx
            .coder(service)
            .with_options(options(1))
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 1);

        let requests = requests.borrow();
        assert_eq!(requests.len(), 4);
        assert!(requests[1].0.last().unwrap().content_text().starts_with("Error: Unknown tool"));
        assert!(requests[2].0.last().unwrap().content_text().starts_with("Error: Invalid arguments"));
        let nudge = requests[3].0.last().unwrap();
        assert_eq!(nudge.role, Role::User);
        assert_eq!(nudge.content_text(), TOOL_REQUIRED);
    }

    #[test]
    fn test_turn_cap_stops_a_service_that_never_submits() {
        let fx = Fixture::window();
        let replies = (0..MAX_TURNS_PER_TRY + 2)
            .map(|i| reason(&format!("c{i}"), &["still thinking"]))
            .collect();
        let (service, requests) = scripted(replies);
        let err = fx
            .coder(service)
            .with_options(options(1))
            .run(&fx.declaration, &window_tests())
            .unwrap_err();
        assert!(matches!(err, JitError::Exhausted { max_tries: 1 }));
        assert_eq!(requests.borrow().len(), MAX_TURNS_PER_TRY);
    }

    #[test]
    fn test_missing_credentials_fail_before_any_call() {
        let fx = Fixture::window();
        let (mut service, requests) = scripted(vec![submit("c1", OVERLAPPING)]);
        service.ready = false;
        let err = fx.coder(service).run(&fx.declaration, &window_tests()).unwrap_err();
        assert!(matches!(err, JitError::Config(_)));
        assert!(requests.borrow().is_empty());
    }

    #[test]
    fn test_formatter_failure_keeps_submitted_code() {
        struct Unavailable;
        impl Formatter for Unavailable {
            fn format(&self, _: &str) -> Result<String, FormatterError> {
                Err(FormatterError::Unavailable("ruff not found".into()))
            }
        }

        let fx = Fixture::window();
        let messy = "def sliding_window(sequence,window_size):\n  return [sequence[i:i+window_size] for i in range(len(sequence) - window_size + 1)]\n";
        let (service, _) = scripted(vec![submit("c1", messy)]);
        let synthesized = fx
            .coder(service)
            .with_formatter(Unavailable)
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 1);
        assert_eq!(fx.store().read(&fx.declaration).unwrap().unwrap().code, messy);
    }

    struct ScriptedOperator {
        answer: bool,
        asked: Rc<Cell<usize>>,
    }

    impl Operator for ScriptedOperator {
        fn confirm_continue(&mut self, _failed: usize) -> bool {
            self.asked.set(self.asked.get() + 1);
            self.answer
        }
    }

    #[test]
    fn test_interactive_decline_cancels() {
        let fx = Fixture::window();
        let asked = Rc::new(Cell::new(0));
        let (service, requests) = scripted(vec![submit("c1", CHUNKED), submit("c2", OVERLAPPING)]);
        let outcome = fx
            .coder(service)
            .with_options(SessionOptions {
                autonomous: false,
                ..SessionOptions::default()
            })
            .with_operator(ScriptedOperator {
                answer: false,
                asked: Rc::clone(&asked),
            })
            .run(&fx.declaration, &window_tests())
            .unwrap();

        assert!(matches!(outcome, SynthesisOutcome::Cancelled));
        assert_eq!(asked.get(), 1);
        assert_eq!(requests.borrow().len(), 1);
        assert!(!fx.store().failed_slot(&fx.declaration, 2).exists());
        assert!(!fx.store().exists(&fx.declaration));
    }

    #[test]
    fn test_interactive_confirm_continues() {
        let fx = Fixture::window();
        let asked = Rc::new(Cell::new(0));
        let (service, _) = scripted(vec![
            submit("c1", CHUNKED),
            reason("c2", &["Windows must overlap."]),
            submit("c3", OVERLAPPING),
        ]);
        let synthesized = fx
            .coder(service)
            .with_options(SessionOptions {
                autonomous: false,
                ..SessionOptions::default()
            })
            .with_operator(ScriptedOperator {
                answer: true,
                asked: Rc::clone(&asked),
            })
            .run(&fx.declaration, &window_tests())
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(synthesized.version, 2);
        // Asked once per rejected attempt, not once per turn.
        assert_eq!(asked.get(), 1);
    }

    #[test]
    fn test_in_place_rewrites_origin_and_requests_relaunch() {
        let fx = Fixture::window();
        let (service, _) = scripted(vec![submit("c1", OVERLAPPING)]);
        let outcome = fx
            .coder(service)
            .with_options(SessionOptions {
                in_place: true,
                ..SessionOptions::default()
            })
            .run(&fx.declaration, &window_tests())
            .unwrap();

        match outcome {
            SynthesisOutcome::Relaunch { rewritten } => assert_eq!(rewritten, fx.origin),
            other => panic!("expected relaunch, got {other:?}"),
        }
        let contents = std::fs::read_to_string(&fx.origin).unwrap();
        assert!(contents.contains("range(len(sequence) - window_size + 1)"));
        assert!(!contents.contains("Create a sliding window"));
        assert!(fx.store().exists(&fx.declaration));
    }

    const GEOMETRY_PY: &str = "\
from typing import List


class Matrix:
    rows: List[List[float]]

    def __init__(self, rows: List[List[float]]):
        self.rows = rows


def transpose(m: Matrix) -> Matrix:
    \"\"\"Return the transpose of m.\"\"\"
";

    const TRANSPOSE: &str =
        "def transpose(m: Matrix) -> Matrix:\n    return Matrix([list(col) for col in zip(*m.rows)])\n";

    #[test]
    fn test_matrix_source_revealed_on_request() {
        let fx = Fixture::new("geometry.py", GEOMETRY_PY, "transpose");
        let (service, requests) = scripted(vec![
            call("c1", REVEAL_TOOL, json!({"type": "Matrix"})),
            submit("c2", TRANSPOSE),
        ]);
        let tests: Vec<Box<dyn TestPredicate<String>>> = vec![Box::new(FnPredicate::new(
            "lambda t: t(Matrix([[1, 2]])).rows == [[1], [2]]",
            |unit: &String| (unit.contains("zip(*m.rows)"), "transposes rows".to_string()),
        ))];
        let mut coder = Coder::new(service, EchoEvaluator, fx.sources(), fx.store())
            .with_formatter(NoopFormatter);
        let synthesized = coder.run(&fx.declaration, &tests).unwrap().into_ready().unwrap();
        assert_eq!(synthesized.version, 1);

        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);

        let (first_messages, first_tools) = &requests[0];
        assert!(first_messages
            .iter()
            .all(|m| !m.content_text().contains("class Matrix")));
        let reveal = first_tools.iter().find(|t| t.name == REVEAL_TOOL).unwrap();
        assert_eq!(reveal.parameters["properties"]["type"]["enum"], json!(["Matrix"]));

        let (second_messages, second_tools) = &requests[1];
        let revealed = second_messages.last().unwrap();
        assert_eq!(revealed.role, Role::Tool);
        assert!(revealed.content_text().starts_with("class Matrix:"));
        assert!(second_tools.iter().all(|t| t.name != REVEAL_TOOL));
    }
}
