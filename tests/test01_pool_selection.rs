use sql_dispatcher::ConnectionPool;
use sql_dispatcher::DispatchError;
use sql_dispatcher::test_utils::MockEngine;

#[test]
fn selection_is_least_loaded_with_lowest_index_on_ties() -> Result<(), DispatchError> {
    let pool = ConnectionPool::new(MockEngine::new(), 4, 0)?;
    assert_eq!(pool.outstanding(), vec![0, 0, 0, 0]);

    let picks: Vec<usize> = (0..4)
        .map(|_| pool.select_and_increment())
        .collect::<Result<_, _>>()?;
    assert_eq!(picks, vec![0, 1, 2, 3]);
    assert_eq!(pool.outstanding(), vec![1, 1, 1, 1]);

    pool.decrement(2)?;
    assert_eq!(pool.select_and_increment()?, 2);

    // [1,1,1,1] again; ties resolve to slot 0
    assert_eq!(pool.select_and_increment()?, 0);
    assert_eq!(pool.outstanding(), vec![2, 1, 1, 1]);

    for (index, count) in pool.outstanding().into_iter().enumerate() {
        for _ in 0..count {
            pool.decrement(index)?;
        }
    }
    assert_eq!(pool.outstanding(), vec![0, 0, 0, 0]);
    Ok(())
}

#[test]
fn decrement_at_zero_stays_zero_and_is_counted() -> Result<(), DispatchError> {
    let pool = ConnectionPool::new(MockEngine::new(), 2, 0)?;
    pool.decrement(1)?;
    assert_eq!(pool.outstanding(), vec![0, 0]);
    assert_eq!(pool.underflow_count(), 1);
    assert!(matches!(pool.decrement(7), Err(DispatchError::ResourceError(_))));
    Ok(())
}

#[test]
fn leases_release_exactly_once() -> Result<(), DispatchError> {
    let pool = ConnectionPool::new(MockEngine::new(), 2, 0)?;
    let lease = pool.lease()?;
    assert_eq!(lease.index(), 0);
    assert_eq!(pool.outstanding(), vec![1, 0]);
    lease.release();
    lease.release();
    drop(lease);
    assert_eq!(pool.outstanding(), vec![0, 0]);
    assert_eq!(pool.underflow_count(), 0);

    {
        let _pinned = pool.lease_slot(1)?;
        assert_eq!(pool.outstanding(), vec![0, 1]);
    }
    assert_eq!(pool.outstanding(), vec![0, 0]);
    Ok(())
}

#[test]
fn pool_construction_validates_and_cleans_up() {
    assert!(matches!(
        ConnectionPool::new(MockEngine::new(), 0, 0),
        Err(DispatchError::ConfigError(_))
    ));

    let engine = MockEngine::failing_at(2);
    let err = ConnectionPool::new(engine.clone(), 4, 0).unwrap_err();
    assert!(matches!(err, DispatchError::ConnectionError(_)));
    let opened = engine.connections();
    assert_eq!(opened.len(), 2);
    assert!(opened.iter().all(|stats| stats.closes() == 1));
}

#[test]
fn thread_limit_is_applied_to_every_connection() -> Result<(), DispatchError> {
    let engine = MockEngine::new();
    let pool = ConnectionPool::new(engine.clone(), 3, 2)?;
    assert!(engine.connections().iter().all(|stats| stats.max_threads() == 2));
    pool.close();
    assert!(matches!(
        pool.select_and_increment(),
        Err(DispatchError::ResourceError(_))
    ));
    Ok(())
}
