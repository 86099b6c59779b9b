mod common;

use futures_util::future::join_all;
use sql_dispatcher::prelude::*;
use sql_dispatcher::test_utils::MockEngine;

#[tokio::test(flavor = "current_thread")]
async fn prepared_handle_always_runs_on_its_slot() -> Result<(), DispatchError> {
    common::init_tracing();
    let engine = MockEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), 4, 0)?;

    let handle = dispatcher.prepare("RETURN $1").await?;
    let home = handle.slot_index();
    assert!(engine.stats(home).is_prepared("RETURN $1"));

    let tasks = (0..100)
        .map(|i| dispatcher.spawn(&handle, Params::positional([i])))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(tasks.iter().all(|task| task.slot_index() == home));

    for (i, result) in join_all(tasks).await.into_iter().enumerate() {
        assert_eq!(common::scalar(result?), i64::try_from(i).unwrap());
    }
    for stats in engine.connections() {
        let expected = if stats.id() == home { 100 } else { 0 };
        assert_eq!(stats.prepared_executions(), expected);
    }
    assert_eq!(dispatcher.outstanding(), vec![0, 0, 0, 0]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn prepared_handle_ignores_load_elsewhere() -> Result<(), DispatchError> {
    // one worker keeps the pinned task queued behind the sleep, so the counters hold still
    let dispatcher = DispatcherOptions::builder()
        .pool_size(2)
        .worker_threads(1)
        .build(MockEngine::new())?;
    let handle = dispatcher.prepare("RETURN $1").await?;
    assert_eq!(handle.slot_index(), 0);

    // slot 0 is busier than slot 1, the handle still goes to slot 0
    let busy = dispatcher.spawn("SLEEP 100", Params::new())?;
    assert_eq!(busy.slot_index(), 0);
    let pinned = dispatcher.spawn(&handle, Params::positional([5]))?;
    assert_eq!(pinned.slot_index(), 0);
    assert_eq!(dispatcher.outstanding(), vec![2, 0]);

    assert_eq!(common::scalar(pinned.await?), 5);
    busy.await?;
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn prepare_failures_and_foreign_handles_are_rejected() -> Result<(), DispatchError> {
    let first = Dispatcher::new(MockEngine::new(), 2, 0)?;
    let second = Dispatcher::new(MockEngine::new(), 2, 0)?;

    let err = first.prepare("NOT A STATEMENT").await.unwrap_err();
    assert!(matches!(err, DispatchError::QueryError(_)));
    assert_eq!(first.outstanding(), vec![0, 0]);

    let handle = first.prepare("RETURN 1").await?;
    let err = second.execute(&handle, Params::new()).await.unwrap_err();
    assert!(matches!(err, DispatchError::ResourceError(_)));
    assert_eq!(second.outstanding(), vec![0, 0]);
    Ok(())
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "current_thread")]
async fn sqlite_prepared_statement_reuses_its_connection() -> Result<(), DispatchError> {
    let dispatcher = Dispatcher::new(SqliteEngine::memory("prepared_affinity"), 3, 0)?;
    let handle = dispatcher.prepare("SELECT $1 * 2 AS doubled").await?;

    let tasks = (0..20)
        .map(|i| dispatcher.spawn(handle.clone(), Params::positional([i])))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(tasks.iter().all(|task| task.slot_index() == handle.slot_index()));

    for (i, result) in join_all(tasks).await.into_iter().enumerate() {
        let set = result?.single().unwrap();
        assert_eq!(set.column_names(), ["doubled".to_string()]);
        let expected = Value::Int(i64::try_from(i * 2).unwrap());
        assert_eq!(set.results[0].get("doubled"), Some(&expected));
    }
    Ok(())
}
