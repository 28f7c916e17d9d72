use super::helpers::*;
use crate::continuation::ResumeToken;
use crate::parse::ParseMode;
use crate::types::{EngineError, ReturnCode};

#[tokio::test]
async fn test_close_revokes_parked_continuation() {
    let executor = ScriptExecutor::new();
    let engine = callback_engine(executor.clone(), FakeOpener::new());
    let session = engine.new_session("terminal", ParseMode::Interactive);

    let mut rx = engine.submit_line(&session, "suspend task").unwrap();
    engine.pump();
    let waker = executor.take_waker().expect("executor should have parked");

    // Teardown while parked
    session.close();
    assert_eq!(rx.try_recv().unwrap(), ReturnCode::Cancelled);
    assert_eq!(session.results(), vec![ReturnCode::Cancelled]);

    // A late wake for the revoked continuation is a no-op
    waker.fire(ResumeToken::Executor(serde_json::json!(null)));
    assert_eq!(engine.pump(), 0);
    assert_eq!(executor.resumes(), 0);
}

#[tokio::test]
async fn test_stale_resumption_is_cancelled() {
    let executor = ScriptExecutor::new();
    let engine = callback_engine(executor.clone(), FakeOpener::new());
    let session = engine.new_session("terminal", ParseMode::Interactive);

    let mut rx = engine.submit_line(&session, "suspend task").unwrap();
    engine.pump();
    let waker = executor.take_waker().expect("executor should have parked");

    // The wake dispatches first, then the session closes before it runs
    waker.fire(ResumeToken::Executor(serde_json::json!(null)));
    session.close();

    engine.pump();
    assert_eq!(rx.try_recv().unwrap(), ReturnCode::Cancelled);
    assert_eq!(executor.resumes(), 0);
}

#[tokio::test]
async fn test_submit_on_closed_session_is_rejected() {
    let executor = ScriptExecutor::new();
    let engine = callback_engine(executor, FakeOpener::new());
    let session = engine.new_session("terminal", ParseMode::Interactive);

    session.close();
    let err = engine.submit_line(&session, "ok nope").unwrap_err();
    assert!(matches!(err, EngineError::SessionClosed));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let executor = ScriptExecutor::new();
    let engine = callback_engine(executor.clone(), FakeOpener::new());
    let session = engine.new_session("terminal", ParseMode::Interactive);

    let mut rx = engine.submit_line(&session, "suspend task").unwrap();
    engine.pump();

    session.close();
    session.close();

    // The cancellation is recorded exactly once
    assert_eq!(rx.try_recv().unwrap(), ReturnCode::Cancelled);
    assert_eq!(session.results(), vec![ReturnCode::Cancelled]);
}
