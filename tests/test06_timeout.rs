mod common;

use sql_dispatcher::prelude::*;
use sql_dispatcher::test_utils::MockEngine;

#[tokio::test(flavor = "current_thread")]
async fn timeout_is_broadcast_and_enforced() -> Result<(), DispatchError> {
    common::init_tracing();
    let engine = MockEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), 3, 0)?;

    dispatcher.set_query_timeout(20)?;
    assert!(engine.connections().iter().all(|stats| stats.timeout_ms() == 20));
    assert_eq!(dispatcher.pool().query_timeout_ms(), 20);

    let err = dispatcher.execute("SLEEP 5000", Params::new()).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_query_error());
    assert_eq!(dispatcher.outstanding(), vec![0, 0, 0]);

    dispatcher.set_query_timeout(0)?;
    let result = dispatcher.execute("SLEEP 30", Params::new()).await?;
    assert_eq!(result.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn timed_out_connection_keeps_serving() -> Result<(), DispatchError> {
    let dispatcher = DispatcherOptions::builder()
        .pool_size(1)
        .query_timeout_ms(10)
        .build(MockEngine::new())?;

    assert!(dispatcher.execute("SLEEP 1000", Params::new()).await.unwrap_err().is_timeout());
    let result = dispatcher.execute("RETURN 3", Params::new()).await?;
    assert_eq!(common::scalar(result), 3);
    Ok(())
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "current_thread")]
async fn sqlite_progress_handler_enforces_timeout() -> Result<(), DispatchError> {
    let dispatcher = DispatcherOptions::builder()
        .pool_size(2)
        .query_timeout_ms(50)
        .build(SqliteEngine::memory("timeout_runaway"))?;

    let err = dispatcher
        .execute(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
            Params::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");

    let result = dispatcher.execute("SELECT 40 + 2", Params::new()).await?;
    assert_eq!(common::scalar(result), 42);
    Ok(())
}
