mod common;

use futures_util::future::join_all;
use sql_dispatcher::prelude::*;
use sql_dispatcher::test_utils::MockEngine;

#[tokio::test(flavor = "current_thread")]
async fn hundred_concurrent_queries_resolve_with_their_own_results() -> Result<(), DispatchError> {
    common::init_tracing();
    let engine = MockEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), 4, 0)?;

    let tasks = (0..100)
        .map(|i| dispatcher.spawn(format!("RETURN {i}"), Params::new()))
        .collect::<Result<Vec<_>, _>>()?;
    let results = join_all(tasks).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(common::scalar(result?), i64::try_from(i).unwrap());
    }
    assert_eq!(dispatcher.outstanding(), vec![0, 0, 0, 0]);
    let executions: usize = engine.connections().iter().map(|s| s.executions()).sum();
    assert_eq!(executions, 100);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn busy_slots_push_new_work_to_idle_ones() -> Result<(), DispatchError> {
    let engine = MockEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), 4, 0)?;

    let sleepers = (0..4)
        .map(|_| dispatcher.spawn("SLEEP 150", Params::new()))
        .collect::<Result<Vec<_>, _>>()?;
    let slots: Vec<usize> = sleepers.iter().map(QueryTask::slot_index).collect();
    assert_eq!(slots, vec![0, 1, 2, 3]);
    assert_eq!(dispatcher.outstanding(), vec![1, 1, 1, 1]);

    let extra = dispatcher.spawn("RETURN 7", Params::new())?;
    assert_eq!(extra.slot_index(), 0);
    assert_eq!(common::scalar(extra.await?), 7);

    for result in join_all(sleepers).await {
        result?;
    }
    assert_eq!(dispatcher.outstanding(), vec![0, 0, 0, 0]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn multi_statement_queries_keep_statement_order() -> Result<(), DispatchError> {
    let dispatcher = Dispatcher::new(MockEngine::new(), 2, 0)?;
    let result = dispatcher
        .execute("RETURN 1; RETURN $two; RETURN 3", Params::new().bind("two", 2))
        .await?;
    assert_eq!(result.len(), 3);
    let values: Vec<i64> = result
        .into_vec()
        .iter()
        .map(|set| *set.first_row().unwrap()[0].as_int().unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn failures_surface_as_query_errors_and_release_the_slot() -> Result<(), DispatchError> {
    let dispatcher = Dispatcher::new(MockEngine::new(), 2, 0)?;
    let task = dispatcher.spawn("FAIL no such table", Params::new())?;
    let err = task.await.unwrap_err();
    assert!(matches!(err, DispatchError::QueryError(ref msg) if msg == "no such table"));
    assert_eq!(dispatcher.outstanding(), vec![0, 0]);

    let err = dispatcher
        .execute("RETURN 1", Params::new().bind("bad name", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ParameterError(_)));
    assert_eq!(dispatcher.outstanding(), vec![0, 0]);
    Ok(())
}
