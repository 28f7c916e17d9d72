use super::helpers::*;
use crate::parse::ParseMode;
use crate::types::ReturnCode;

#[tokio::test]
async fn test_pump_with_nothing_scheduled() {
    let engine = callback_engine(ScriptExecutor::new(), FakeOpener::new());
    assert_eq!(engine.pump(), 0);
}

#[tokio::test]
async fn test_callback_mode_runs_on_the_pumping_thread() {
    let executor = ScriptExecutor::new();
    let engine = callback_engine(executor.clone(), FakeOpener::new());
    let session = engine.new_session("terminal", ParseMode::Interactive);

    let mut rx = engine.submit_line(&session, "ok hello").unwrap();

    // Nothing happens until pumped
    assert!(rx.try_recv().is_err());
    assert_eq!(executor.calls(), 0);

    assert!(engine.pump() >= 1);
    assert_eq!(rx.try_recv().unwrap(), ReturnCode::Success);
    assert_eq!(executor.executed(), vec!["ok hello".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_both_modes_produce_the_same_results() {
    let script = ["ok a", "fail b", "ok c"];

    // Queued
    let queued_exec = ScriptExecutor::new();
    let queued = queued_engine(queued_exec.clone(), FakeOpener::new());
    let queued_session = queued.new_session("parity", ParseMode::Interactive);
    for line in script {
        queued_session.push_line(line);
    }
    let queued_results = queued.run_session(&queued_session).await.unwrap();
    queued.shutdown().await;

    // Callback
    let callback_exec = ScriptExecutor::new();
    let callback = callback_engine(callback_exec.clone(), FakeOpener::new());
    let callback_session = callback.new_session("parity", ParseMode::Interactive);
    for line in script {
        callback_session.push_line(line);
    }
    let callback_results = callback.run_session(&callback_session).await.unwrap();

    assert_eq!(queued_results, callback_results);
    assert_eq!(queued_exec.executed(), callback_exec.executed());
    assert!(matches!(queued_results[1], ReturnCode::ExecutionError(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sessions_progress_independently() {
    let executor = ScriptExecutor::new();
    let engine = queued_engine(executor.clone(), FakeOpener::new());

    let a = engine.new_session("a", ParseMode::Interactive);
    let b = engine.new_session("b", ParseMode::Interactive);

    let rx_a = engine.submit_line(&a, "ok from-a").unwrap();
    let rx_b = engine.submit_line(&b, "ok from-b").unwrap();

    assert_eq!(recv(rx_a).await, ReturnCode::Success);
    assert_eq!(recv(rx_b).await, ReturnCode::Success);

    let mut executed = executor.executed();
    executed.sort();
    assert_eq!(executed, vec!["ok from-a".to_string(), "ok from-b".to_string()]);

    engine.shutdown().await;
}
