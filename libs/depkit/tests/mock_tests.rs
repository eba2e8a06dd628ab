mod common;

use std::time::Duration;

use common::{journaled_singleton, Counter, Journal};
use depkit::{
    ActionDef, ActionFn, Broker, BrokerError, Kind, MockOverrides, PluginDef, RegistryBuilder,
    ServiceDef, SingletonDef, Transform, Value,
};

/// `doIt` yields 1, `doThat` yields `doIt() + 1`, `plusTwo` yields `s1 + 2`.
fn registry(s1_starts: &Counter) -> RegistryBuilder {
    let starts = s1_starts.clone();
    let mut b = RegistryBuilder::default();
    b.register_singleton(
        "s1",
        SingletonDef::from_fn(move |_| {
            let starts = starts.clone();
            async move {
                starts.bump();
                Ok(Value::data(1_i64))
            }
        }),
    )
    .register_action(
        "doIt",
        ActionDef::from_fn(|_| async {
            Ok(Value::action(|_| async { Ok(Value::data(1_i64)) }))
        }),
    )
    .register_action(
        "doThat",
        ActionDef::from_fn(|deps| async move {
            let do_it = deps.action("doIt")?.clone();
            Ok(Value::action(move |_| {
                let do_it = do_it.clone();
                async move {
                    let n = do_it.call_as::<i64>(vec![]).await?;
                    Ok(Value::data(*n + 1))
                }
            }))
        })
        .actions(["doIt"]),
    )
    .register_action(
        "plusTwo",
        ActionDef::from_fn(|deps| async move {
            let s1 = deps.singleton_as::<i64>("s1")?;
            Ok(Value::action(move |_| {
                let s1 = s1.clone();
                async move { Ok(Value::data(*s1 + 2)) }
            }))
        })
        .singletons(["s1"]),
    )
    .register_service(
        "api",
        ServiceDef::from_fn(|_| async { Ok(()) })
            .singletons(["s1"])
            .actions(["plusTwo", "doThat"]),
    );
    b
}

fn broker() -> (Broker, Counter) {
    let starts = Counter::default();
    let broker = Broker::new(registry(&starts).build().unwrap());
    (broker, starts)
}

async fn call_i64(f: &ActionFn) -> i64 {
    *f.call_as::<i64>(vec![]).await.unwrap()
}

#[tokio::test]
async fn mock_without_overrides_uses_real_dependencies() {
    let (broker, _) = broker();

    let do_that = broker
        .mock_action("doThat", MockOverrides::new())
        .await
        .unwrap();

    assert_eq!(call_i64(&do_that).await, 2);
}

#[tokio::test]
async fn mock_action_override_replaces_the_dependency() {
    let (broker, _) = broker();

    let overrides =
        MockOverrides::new().action_fn("doIt", |_| async { Ok(Value::data(5_i64)) });
    let do_that = broker.mock_action("doThat", overrides).await.unwrap();

    assert_eq!(call_i64(&do_that).await, 6);
}

#[tokio::test]
async fn mock_singleton_override_leaves_shared_cache_alone() {
    let (broker, s1_starts) = broker();

    let plus_two = broker
        .mock_action("plusTwo", MockOverrides::new())
        .await
        .unwrap();
    assert_eq!(call_i64(&plus_two).await, 3);
    // The mock started its own s1; the broker's slot is untouched.
    assert_eq!(s1_starts.get(), 1);
    assert!(!broker.is_singleton_started("s1"));

    let plus_two = broker
        .mock_action(
            "plusTwo",
            MockOverrides::new().singleton("s1", Value::data(3_i64)),
        )
        .await
        .unwrap();
    assert_eq!(call_i64(&plus_two).await, 5);
    assert_eq!(s1_starts.get(), 1, "overridden singleton is never started");
}

#[tokio::test]
async fn mock_after_service_start_does_not_disturb_running_instances() {
    let (broker, s1_starts) = broker();
    broker.start_service("api").await.unwrap();
    assert_eq!(s1_starts.get(), 1);

    let plus_two = broker
        .mock_action(
            "plusTwo",
            MockOverrides::new().singleton("s1", Value::data(10_i64)),
        )
        .await
        .unwrap();
    assert_eq!(call_i64(&plus_two).await, 12);

    let shared = broker.singleton_instance("s1").unwrap();
    assert_eq!(*shared.get::<i64>().unwrap(), 1);
    assert!(broker.is_service_running("api"));
}

#[tokio::test]
async fn dropping_the_mocked_action_stops_its_own_singletons() {
    let journal = Journal::default();
    let mut b = RegistryBuilder::default();
    b.register_singleton("db", journaled_singleton(&journal, "db", 40))
        .register_singleton("offset", journaled_singleton(&journal, "offset", 0))
        .register_action(
            "answer",
            ActionDef::from_fn(|deps| async move {
                let db = deps.singleton_as::<i64>("db")?;
                let offset = deps.singleton_as::<i64>("offset")?;
                Ok(Value::action(move |_| {
                    let (db, offset) = (db.clone(), offset.clone());
                    async move { Ok(Value::data(*db + *offset)) }
                }))
            })
            .singletons(["db", "offset"]),
        );
    let broker = Broker::new(b.build().unwrap());

    let answer = broker
        .mock_action(
            "answer",
            MockOverrides::new().singleton("offset", Value::data(2_i64)),
        )
        .await
        .unwrap();
    let copy = answer.clone();
    assert_eq!(call_i64(&answer).await, 42);

    drop(answer);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(journal.count("stop:db"), 0, "a clone is still alive");

    drop(copy);
    for _ in 0..100 {
        if journal.count("stop:db") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // The overridden singleton was never started, so it is never stopped.
    assert_eq!(journal.events(), ["start:db", "stop:db"]);
    assert!(!broker.is_singleton_started("db"));
}

#[tokio::test]
async fn mock_composes_fresh_each_time() {
    let composes = Counter::default();
    let c = composes.clone();
    let mut b = RegistryBuilder::default();
    b.register_action(
        "counted",
        ActionDef::from_fn(move |_| {
            let c = c.clone();
            async move {
                c.bump();
                Ok(Value::action(|_| async { Ok(Value::unit()) }))
            }
        }),
    );
    let broker = Broker::new(b.build().unwrap());

    broker
        .mock_action("counted", MockOverrides::new())
        .await
        .unwrap();
    broker
        .mock_action("counted", MockOverrides::new())
        .await
        .unwrap();

    assert_eq!(composes.get(), 2);
}

#[tokio::test]
async fn mock_plugin_override_replaces_the_transform() {
    let negate = Transform::new(|action, _params: &serde_json::Value| {
        Ok(ActionFn::new(move |args| {
            let action = action.clone();
            async move {
                let n = action.call_as::<i64>(args).await?;
                Ok(Value::data(-*n))
            }
        }))
    });

    let mut b = RegistryBuilder::default();
    b.register_plugin("negate", PluginDef::transform(negate))
        .register_action(
            "seven",
            ActionDef::from_fn(|_| async {
                Ok(Value::action(|_| async { Ok(Value::data(7_i64)) }))
            })
            .plugin("negate", serde_json::Value::Null),
        );
    let broker = Broker::new(b.build().unwrap());

    let real = broker
        .mock_action("seven", MockOverrides::new())
        .await
        .unwrap();
    assert_eq!(call_i64(&real).await, -7);

    let bypassed = broker
        .mock_action(
            "seven",
            MockOverrides::new().plugin("negate", Transform::identity()),
        )
        .await
        .unwrap();
    assert_eq!(call_i64(&bypassed).await, 7);
}

#[tokio::test]
async fn mock_rejects_unknown_and_empty_names() {
    let (broker, _) = broker();

    match broker.mock_action("nope", MockOverrides::new()).await {
        Err(BrokerError::NotFound { kind, name }) => {
            assert_eq!(kind, Kind::Action);
            assert_eq!(name, "nope");
        }
        other => panic!("expected not found, got {other:?}"),
    }

    assert!(matches!(
        broker.mock_action("", MockOverrides::new()).await,
        Err(BrokerError::InvalidName {
            kind: Kind::Action,
            ..
        })
    ));
}

#[tokio::test]
async fn mock_rejects_overrides_the_action_does_not_declare() {
    let (broker, s1_starts) = broker();

    // doThat depends on doIt only.
    let err = broker
        .mock_action(
            "doThat",
            MockOverrides::new().singleton("s1", Value::data(0_i64)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::UnknownOverride {
            kind: Kind::Singleton,
            ..
        }
    ));

    let err = broker
        .mock_action(
            "plusTwo",
            MockOverrides::new().action_fn("doIt", |_| async { Ok(Value::unit()) }),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "action 'plusTwo' does not declare action 'doIt'; it cannot be overridden"
    );
    assert_eq!(s1_starts.get(), 0);
}

#[tokio::test]
async fn mock_reports_cycles_like_a_service_start() {
    let mut b = RegistryBuilder::default();
    b.register_action(
        "ping",
        ActionDef::from_fn(|_| async { Ok(Value::action(|_| async { Ok(Value::unit()) })) })
            .actions(["pong"]),
    )
    .register_action(
        "pong",
        ActionDef::from_fn(|_| async { Ok(Value::action(|_| async { Ok(Value::unit()) })) })
            .actions(["ping"]),
    );
    let broker = Broker::new(b.build().unwrap());

    match broker.mock_action("ping", MockOverrides::new()).await {
        Err(BrokerError::Cycle { kind, path }) => {
            assert_eq!(kind, Kind::Action);
            assert_eq!(path, ["ping", "pong", "ping"]);
        }
        other => panic!("expected cycle, got {other:?}"),
    }

    // Overriding the back edge breaks the cycle.
    let ping = broker
        .mock_action(
            "ping",
            MockOverrides::new().action_fn("pong", |_| async { Ok(Value::data(1_i64)) }),
        )
        .await
        .unwrap();
    assert!(ping.call(vec![]).await.unwrap().downcast::<()>().is_some());
}
