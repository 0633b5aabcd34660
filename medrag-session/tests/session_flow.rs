//! Session state machine tests with a scripted collaborator and a recording retriever.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use medrag_retrieval::{Attributes, IndexRecord, RagError, Retriever, SearchResult};
use medrag_session::{
    Collaborator, InMemorySessionStore, SessionConfig, SessionError, SessionManager, SessionStatus,
    TurnContext,
};
use tokio::sync::Mutex;

enum Step {
    Answer(&'static str),
    Slow(Duration, &'static str),
}

/// Plays back answers in order; the last one repeats.
struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { steps: Mutex::new(steps.into()), calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collaborator for Scripted {
    async fn propose(&self, _ctx: &TurnContext<'_>) -> medrag_session::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().await;
            if steps.len() > 1 { steps.pop_front() } else { None }
        };
        let (delay, answer) = match step {
            Some(Step::Answer(a)) => (None, a),
            Some(Step::Slow(d, a)) => (Some(d), a),
            None => match self.steps.lock().await.front() {
                Some(Step::Answer(a)) => (None, *a),
                Some(Step::Slow(d, a)) => (Some(*d), *a),
                None => (None, ""),
            },
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(answer.to_string())
    }
}

#[derive(Default)]
struct RecordingRetriever {
    queries: Mutex<Vec<(String, String, usize)>>,
    fail: bool,
}

#[async_trait]
impl Retriever for RecordingRetriever {
    async fn retrieve(&self, corpus: &str, text: &str, k: usize) -> medrag_retrieval::Result<Vec<SearchResult>> {
        self.queries.lock().await.push((corpus.to_string(), text.to_string(), k));
        if self.fail {
            return Err(RagError::CorpusLoad { corpus: corpus.to_string(), message: "missing index".into() });
        }
        Ok(vec![SearchResult {
            record: IndexRecord {
                document_id: "g-1".into(),
                chunk_ordinal: 0,
                text: "Suspected acute coronary syndrome: call emergency services.".into(),
                attributes: Attributes::from([("source".to_string(), Some("nice_cg95.pdf".to_string()))]),
            },
            score: 0.42,
        }])
    }
}

const ASK_DURATION: &str = r#"{"symptom_dict": {"symptoms": [{"name": "chest pain"}], "has_enough_info": false},
    "bot_message": "I'm sorry to hear that. How long have you had the chest pain?"}"#;

const COMPLETE: &str = r#"Here is the update:
```json
{"symptom_dict": {"age": 58, "gender": "male",
  "symptoms": [{"name": "Chest Pain", "duration": "2 hours", "severity": "severe",
                "additional_context": "radiates to left arm"}],
  "has_enough_info": true},
 "bot_message": "Thank you, I have enough information now."}
```"#;

const GARBAGE: &str = "I'm not sure what you mean.";

fn manager(
    collaborator: Arc<Scripted>,
    retriever: Arc<RecordingRetriever>,
    config: SessionConfig,
) -> SessionManager {
    SessionManager::new(config, collaborator, retriever, Arc::new(InMemorySessionStore::new())).unwrap()
}

#[tokio::test]
async fn session_completes_once_and_then_rejects_turns() {
    let collaborator = Scripted::new(vec![Step::Answer(ASK_DURATION), Step::Answer(COMPLETE)]);
    let retriever = Arc::new(RecordingRetriever::default());
    let manager = manager(collaborator.clone(), retriever.clone(), SessionConfig::default());

    let started = manager.start_session().await.unwrap();
    assert_eq!(started.status, SessionStatus::Active);

    let first = manager.submit_turn(&started.session_id, "I have chest pain", None).await.unwrap();
    assert_eq!(first.status, SessionStatus::Active);
    assert!(!first.has_enough_info);
    assert!(first.retrieval.is_none());
    assert!(retriever.queries.lock().await.is_empty());

    let second = manager.submit_turn(&started.session_id, "About two hours, it's severe", None).await.unwrap();
    assert_eq!(second.status, SessionStatus::Complete);
    assert!(second.has_enough_info);
    let retrieval = second.retrieval.expect("completing turn carries the retrieval");
    assert_eq!(retrieval.results[0].record.document_id, "g-1");
    assert_eq!(second.structured_state.symptoms.len(), 1);
    assert_eq!(second.structured_state.symptoms[0].name, "chest pain");

    {
        let queries = retriever.queries.lock().await;
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "guidelines");
        assert_eq!(
            queries[0].1,
            "age 58 ; male ; duration: 2 hours severity: severe radiates to left arm"
        );
        assert_eq!(queries[0].2, 5);
    }

    let err = manager.submit_turn(&started.session_id, "Also nausea", None).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionComplete { .. }));
    assert_eq!(retriever.queries.lock().await.len(), 1);
    assert_eq!(collaborator.calls(), 2);

    let session = manager.get_session(&started.session_id).await.unwrap();
    assert_eq!(session.turn_log.len(), 5);
    assert!(session.result.is_some());
    let summaries = manager.list_sessions().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].turn_count, 2);
    assert!(summaries[0].has_result);
}

#[tokio::test]
async fn malformed_answer_is_retried_once() {
    let collaborator = Scripted::new(vec![Step::Answer(GARBAGE), Step::Answer(ASK_DURATION)]);
    let manager = manager(collaborator.clone(), Arc::default(), SessionConfig::default());
    let started = manager.start_session().await.unwrap();

    let reply = manager.submit_turn(&started.session_id, "chest pain", None).await.unwrap();
    assert!(reply.reply.contains("How long"));
    assert_eq!(collaborator.calls(), 2);
}

#[tokio::test]
async fn repeated_parse_failure_leaves_session_untouched() {
    let collaborator = Scripted::new(vec![Step::Answer(GARBAGE)]);
    let manager = manager(collaborator.clone(), Arc::default(), SessionConfig::default());
    let started = manager.start_session().await.unwrap();
    let before = manager.get_session(&started.session_id).await.unwrap();

    let err = manager.submit_turn(&started.session_id, "chest pain", None).await.unwrap_err();
    assert!(matches!(err, SessionError::CollaboratorParse { attempts: 2, .. }));
    assert_eq!(collaborator.calls(), 2);
    assert_eq!(manager.get_session(&started.session_id).await.unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn collaborator_timeout_leaves_session_active() {
    let collaborator = Scripted::new(vec![Step::Slow(Duration::from_secs(600), ASK_DURATION)]);
    let config = SessionConfig { collaborator_timeout_secs: 5, ..Default::default() };
    let manager = manager(collaborator, Arc::default(), config);
    let started = manager.start_session().await.unwrap();

    let err = manager.submit_turn(&started.session_id, "chest pain", None).await.unwrap_err();
    assert!(matches!(err, SessionError::CollaboratorTimeout { seconds: 5, .. }));
    let session = manager.get_session(&started.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.turn_log.len(), 1);
}

#[tokio::test]
async fn failed_completion_query_keeps_session_active() {
    let collaborator = Scripted::new(vec![Step::Answer(COMPLETE)]);
    let retriever = Arc::new(RecordingRetriever { fail: true, ..Default::default() });
    let manager = manager(collaborator, retriever.clone(), SessionConfig::default());
    let started = manager.start_session().await.unwrap();

    let err = manager.submit_turn(&started.session_id, "severe chest pain for 2 hours", None).await.unwrap_err();
    assert!(matches!(err, SessionError::Retrieval(RagError::CorpusLoad { .. })));
    assert_eq!(err.kind(), "corpus_load_error");

    let session = manager.get_session(&started.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.structured_state.symptoms.is_empty());
    assert_eq!(retriever.queries.lock().await.len(), 1);
}

#[tokio::test]
async fn repeated_request_id_replays_without_calling_collaborator() {
    let collaborator = Scripted::new(vec![Step::Answer(ASK_DURATION), Step::Answer(COMPLETE)]);
    let retriever = Arc::new(RecordingRetriever::default());
    let manager = manager(collaborator.clone(), retriever.clone(), SessionConfig::default());
    let id = manager.start_session().await.unwrap().session_id;

    let first = manager.submit_turn(&id, "chest pain", Some("turn-1")).await.unwrap();
    let again = manager.submit_turn(&id, "chest pain", Some("turn-1")).await.unwrap();
    assert!(again.replayed);
    assert_eq!(again.reply, first.reply);
    assert_eq!(collaborator.calls(), 1);

    let done = manager.submit_turn(&id, "2 hours, severe", Some("turn-2")).await.unwrap();
    assert_eq!(done.status, SessionStatus::Complete);

    // A late duplicate of the completing turn gets the cached result, not a second query.
    let late = manager.submit_turn(&id, "2 hours, severe", Some("turn-2")).await.unwrap();
    assert!(late.replayed);
    assert_eq!(late.retrieval, done.retrieval);
    assert_eq!(retriever.queries.lock().await.len(), 1);
    assert_eq!(manager.get_session(&id).await.unwrap().turn_log.len(), 5);
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialized() {
    let collaborator = Scripted::new(vec![Step::Slow(Duration::from_millis(20), ASK_DURATION)]);
    let manager = Arc::new(manager(collaborator.clone(), Arc::default(), SessionConfig::default()));
    let id = manager.start_session().await.unwrap().session_id;

    let a = {
        let (manager, id) = (manager.clone(), id.clone());
        tokio::spawn(async move { manager.submit_turn(&id, "chest pain", None).await })
    };
    let b = {
        let (manager, id) = (manager.clone(), id.clone());
        tokio::spawn(async move { manager.submit_turn(&id, "it started this morning", None).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let session = manager.get_session(&id).await.unwrap();
    assert_eq!(session.turn_log.len(), 5);
    assert_eq!(session.turn_count(), 2);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_call() {
    let collaborator = Scripted::new(vec![Step::Answer(ASK_DURATION)]);
    let config = SessionConfig { max_message_chars: 10, ..Default::default() };
    let manager = manager(collaborator.clone(), Arc::default(), config);
    let id = manager.start_session().await.unwrap().session_id;

    assert!(matches!(manager.submit_turn("abc", "hi", None).await, Err(SessionError::Validation(_))));
    assert!(matches!(manager.submit_turn(&id, "   ", None).await, Err(SessionError::Validation(_))));
    assert!(matches!(
        manager.submit_turn(&id, "this message is too long", None).await,
        Err(SessionError::Validation(_))
    ));
    let unknown = uuid_like();
    assert!(matches!(manager.submit_turn(&unknown, "hi", None).await, Err(SessionError::NotFound(_))));
    assert_eq!(collaborator.calls(), 0);
}

fn uuid_like() -> String {
    "00000000-0000-4000-8000-000000000000".to_string()
}
