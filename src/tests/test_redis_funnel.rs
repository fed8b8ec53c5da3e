use std::{sync::Arc, thread, time::Duration};

use redis::{ErrorKind, Value};

use super::{
    fake_store::{
        FakeStore, FakeStoreBuilder, REPLY_ENTRIES, SCRIPT_ARGS, STORED_FIELDS, StoredFunnel,
    },
    runtime::{T0, assert_secs, block_on},
};
use crate::{
    Funnel, FunnelError, FunnelOptions, ManualClock, RedisFunnel, RedisKey,
    redis::{FUNNEL_SCRIPT, decode_reply},
};

fn key(s: &str) -> RedisKey {
    RedisKey::try_from(s).unwrap()
}

fn warm(clock: &ManualClock) -> Arc<FakeStore> {
    Arc::new(FakeStore::warm(clock.clone()))
}

fn funnel(store: &Arc<FakeStore>, k: &str, options: FunnelOptions) -> RedisFunnel<FakeStore> {
    RedisFunnel::with_script(store.clone(), key(k), options)
}

#[test]
fn first_call_initializes_full_funnel() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let f = funnel(&store, "k", FunnelOptions::new(5, 1, Duration::from_secs(10)));

    let state = block_on(f.watering(1)).unwrap();

    assert!(state.ready);
    assert_eq!(state.capacity, 5);
    assert_eq!(state.left_quota, 4);
    assert_eq!(state.interval, None);
    assert_secs(state.empty_time, 10.0);

    let stored = store.stored("k").unwrap();
    assert_eq!(stored.left_quota, 4.0);
    assert_eq!(stored.leaking_ts, T0.as_secs_f64());
    assert_eq!(stored.capacity, 5.0);
    assert_eq!(stored.operations, 1.0);
    assert_eq!(stored.seconds, 10.0);
}

#[test]
fn drain_reject_then_half_second_leak() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let f = funnel(&store, "k", FunnelOptions::per_second(10));

    block_on(async {
        let state = f.watering(10).await.unwrap();
        assert!(state.ready);
        assert_eq!(state.left_quota, 0);
        assert_secs(state.empty_time, 1.0);

        let state = f.watering(1).await.unwrap();
        assert!(!state.ready);
        assert_eq!(state.left_quota, 0);
        assert_secs(state.interval.unwrap(), 0.1);

        clock.advance(Duration::from_millis(500));

        let state = f.watering(1).await.unwrap();
        assert!(state.ready);
        assert_eq!(state.left_quota, 4);
        assert_secs(state.empty_time, 0.6);
    });
}

#[test]
fn fractional_quota_carries_over_between_calls() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    // 2 units per second.
    let f = funnel(&store, "k", FunnelOptions::new(10, 2, Duration::from_secs(1)));

    block_on(async {
        assert!(f.watering(10).await.unwrap().ready);

        clock.advance(Duration::from_millis(750));
        let state = f.watering(1).await.unwrap();
        assert!(state.ready);
        // 1.5 restored, 1 consumed: 0.5 stays in the hash, 0 is reported.
        assert_eq!(state.left_quota, 0);
        assert_eq!(store.stored("k").unwrap().left_quota, 0.5);

        clock.advance(Duration::from_millis(250));
        assert!(f.watering(1).await.unwrap().ready);
    });
}

#[test]
fn insufficient_leak_is_not_applied() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let f = funnel(&store, "k", FunnelOptions::new(10, 1, Duration::from_secs(1)));

    block_on(async {
        assert!(f.watering(10).await.unwrap().ready);

        clock.advance(Duration::from_secs(2));
        let state = f.watering(3).await.unwrap();
        assert!(!state.ready);
        assert_eq!(state.left_quota, 0);
        assert_secs(state.interval.unwrap(), 3.0);
        assert_eq!(store.stored("k").unwrap().leaking_ts, T0.as_secs_f64());

        clock.advance(Duration::from_secs(1));
        let state = f.watering(3).await.unwrap();
        assert!(state.ready);
        assert_eq!(state.left_quota, 0);
    });
}

#[test]
fn backward_server_clock_does_not_reset() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let f = funnel(&store, "k", FunnelOptions::new(10, 1, Duration::from_secs(1)));

    block_on(async {
        assert!(f.watering(10).await.unwrap().ready);

        clock.rewind(Duration::from_secs(30));
        let state = f.watering(1).await.unwrap();

        assert!(!state.ready);
        assert_eq!(state.left_quota, 0);
    });
}

#[test]
fn degenerate_quota_counts_as_one() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let options = FunnelOptions::per_second(3);

    block_on(async {
        for (i, quota) in [0, -1, -50].into_iter().enumerate() {
            let state = funnel(&store, "k", options).watering(quota).await.unwrap();
            let reference = funnel(&store, "ref", options).watering(1).await.unwrap();

            assert_eq!(state, reference);
            assert_eq!(state.left_quota, 2 - i as i64);
        }
    });
}

#[test]
fn shrinking_capacity_clamps_stored_quota() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);

    block_on(async {
        let wide = funnel(&store, "k", FunnelOptions::per_second(10));
        assert_eq!(wide.watering(1).await.unwrap().left_quota, 9);

        let narrow = funnel(&store, "k", FunnelOptions::per_second(3));
        let state = narrow.watering(1).await.unwrap();

        assert!(state.ready);
        assert_eq!(state.capacity, 3);
        assert_eq!(state.left_quota, 2);
    });
}

#[test]
fn per_key_state_is_independent() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let options = FunnelOptions::per_second(2);

    block_on(async {
        assert!(funnel(&store, "a", options).watering(2).await.unwrap().ready);
        assert!(!funnel(&store, "a", options).watering(1).await.unwrap().ready);
        assert!(funnel(&store, "b", options).watering(1).await.unwrap().ready);
    });
}

#[test]
fn falls_back_to_eval_on_noscript() {
    let clock = ManualClock::new(T0);
    let f = RedisFunnel::new(
        &FakeStoreBuilder(clock.clone()),
        key("k"),
        FunnelOptions::per_second(5),
    );

    block_on(async {
        let state = f.watering(1).await.unwrap();
        assert!(state.ready);
        assert_eq!(state.left_quota, 4);

        let state = f.watering(1).await.unwrap();
        assert_eq!(state.left_quota, 3);
    });
}

#[test]
fn noscript_fallback_sends_source_once_per_eviction() {
    let clock = ManualClock::new(T0);
    let store = Arc::new(FakeStore::new(clock.clone()));
    let f = funnel(&store, "k", FunnelOptions::per_second(5));

    block_on(async {
        f.watering(1).await.unwrap();
        assert_eq!((store.eval_sha_calls(), store.eval_calls()), (1, 1));

        f.watering(1).await.unwrap();
        assert_eq!((store.eval_sha_calls(), store.eval_calls()), (2, 1));

        store.flush_scripts();
        let state = f.watering(1).await.unwrap();
        assert_eq!((store.eval_sha_calls(), store.eval_calls()), (3, 2));
        assert_eq!(state.left_quota, 2);
    });
}

#[test]
fn other_errors_are_surfaced_without_retry() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let f = funnel(&store, "k", FunnelOptions::per_second(5));

    store.fail_with(ErrorKind::IoError, "connection refused");

    let err = block_on(f.watering(1)).unwrap_err();
    assert!(matches!(
        &err,
        FunnelError::Redis(e) if e.kind() == ErrorKind::IoError
    ));
    assert_eq!((store.eval_sha_calls(), store.eval_calls()), (1, 0));
    assert_eq!(store.stored("k"), None);

    store.recover();
    let state = block_on(f.watering(1)).unwrap();
    assert_eq!(state.left_quota, 4);
}

#[test]
fn eval_failure_after_noscript_is_surfaced() {
    let clock = ManualClock::new(T0);
    let store = Arc::new(FakeStore::new(clock.clone()));
    let f = funnel(&store, "k", FunnelOptions::per_second(5));

    store.fail_with(ErrorKind::NoScriptError, "NOSCRIPT No matching script.");

    let err = block_on(f.watering(1)).unwrap_err();
    assert!(matches!(err, FunnelError::Redis(_)));
    assert_eq!((store.eval_sha_calls(), store.eval_calls()), (1, 1));
}

#[test]
fn stored_state_from_another_process_is_honoured() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);

    store.insert(
        "k",
        StoredFunnel {
            left_quota: 1.0,
            leaking_ts: T0.as_secs_f64(),
            capacity: 99.0,
            operations: 99.0,
            seconds: 99.0,
        },
    );

    let f = funnel(&store, "k", FunnelOptions::new(10, 1, Duration::from_secs(1)));
    let state = block_on(f.watering(2)).unwrap();

    // Provenance fields in the hash play no part in the decision.
    assert!(!state.ready);
    assert_eq!(state.capacity, 10);
    assert_eq!(state.left_quota, 1);
    assert_secs(state.interval.unwrap(), 2.0);
    assert_secs(state.empty_time, 9.0);
}

#[test]
fn concurrent_callers_share_one_quota() {
    let clock = ManualClock::new(T0);
    let store = warm(&clock);
    let options = FunnelOptions::new(40, 1, Duration::from_secs(1));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let f = funnel(&store, "k", options);
            thread::spawn(move || {
                block_on(async {
                    let mut admitted = 0;
                    for _ in 0..25 {
                        if f.watering(1).await.unwrap().ready {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
        })
        .collect();

    let admitted: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(admitted, 40);
}

#[test]
fn decode_rejects_short_replies() {
    let err = decode_reply(vec![Value::Int(0), Value::Int(1)]).unwrap_err();

    assert!(matches!(err, FunnelError::MalformedReply(msg) if msg.contains("got 2")));
}

#[test]
fn decode_rejects_unknown_flags() {
    let reply = vec![
        Value::Int(2),
        Value::Int(1),
        Value::Int(1),
        Value::BulkString(b"-1".to_vec()),
        Value::BulkString(b"0".to_vec()),
    ];

    assert!(matches!(
        decode_reply(reply),
        Err(FunnelError::MalformedReply(_))
    ));
}

#[test]
fn decode_rejects_non_numeric_durations() {
    let reply = vec![
        Value::Int(1),
        Value::Int(1),
        Value::Int(0),
        Value::BulkString(b"soon".to_vec()),
        Value::BulkString(b"1".to_vec()),
    ];

    assert!(matches!(
        decode_reply(reply),
        Err(FunnelError::MalformedReply(msg)) if msg.contains("interval")
    ));
}

#[test]
fn decode_maps_sentinel_and_text_durations() {
    let admitted = decode_reply(vec![
        Value::Int(0),
        Value::Int(10),
        Value::Int(7),
        Value::BulkString(b"-1".to_vec()),
        Value::BulkString(b"0.3".to_vec()),
    ])
    .unwrap();

    assert!(admitted.ready);
    assert_eq!(admitted.interval, None);
    assert_secs(admitted.empty_time, 0.3);

    let rejected = decode_reply(vec![
        Value::Int(1),
        Value::Int(10),
        Value::Int(0),
        Value::BulkString(b"0.25".to_vec()),
        Value::BulkString(b"inf".to_vec()),
    ])
    .unwrap();

    assert!(!rejected.ready);
    assert_secs(rejected.interval.unwrap(), 0.25);
    assert_eq!(rejected.empty_time, Duration::MAX);
}

#[test]
fn redis_key_validation() {
    assert!(RedisKey::try_from("").is_err());
    assert!(RedisKey::try_from("a".repeat(513)).is_err());
    assert_eq!(&*key("funnel:user:1"), "funnel:user:1");
}

#[test]
fn fake_store_matches_funnel_script_layout() {
    let script: String = FUNNEL_SCRIPT.split_whitespace().collect();

    for (i, name) in SCRIPT_ARGS.iter().enumerate() {
        let line = format!("local{name}=tonumber(ARGV[{}])", i + 1);
        assert!(script.contains(&line), "missing {line}");
    }

    assert!(script.contains(r#"redis.call("HMGET",key,"left_quota","leaking_ts")"#));

    let fields: String = STORED_FIELDS
        .iter()
        .map(|field| format!(r#","{field}",{field}"#))
        .collect();
    let hset = format!(r#"redis.call("HSET",key{fields})"#);
    assert!(script.contains(&hset), "missing {hset}");

    let reply = format!("return{{{}}}", REPLY_ENTRIES.join(","));
    assert!(script.contains(&reply), "missing {reply}");
}
