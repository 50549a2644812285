mod common;

use common::{admin, dispatcher_with, install, install_running, GatedSupervisor};
use futures::future::join_all;
use plugin_control::{
    CallerIdentity, Command, Dispatcher, ImmediateSupervisor, LifecycleEventKind, PluginError,
    PluginState,
};
use std::sync::Arc;

fn immediate(names: &[&str]) -> Dispatcher {
    dispatcher_with(names, Arc::new(ImmediateSupervisor))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_same_key() {
    let dispatcher = immediate(&["weather"]);
    install(&dispatcher, "weather").await;
    let caller = CallerIdentity::plugin("weather");

    for round in 0..50 {
        let a = format!("a{round}");
        let b = format!("b{round}");
        let first = {
            let (dispatcher, caller) = (dispatcher.clone(), caller.clone());
            let value = a.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit(&caller, Command::set_plugin_data("weather", "apiKey", value))
                    .await
            })
        };
        let second = {
            let (dispatcher, caller) = (dispatcher.clone(), caller.clone());
            let value = b.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit(&caller, Command::set_plugin_data("weather", "apiKey", value))
                    .await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let stored = dispatcher.plugin_data("weather", "apiKey").unwrap();
        assert!(stored == a || stored == b, "unexpected value {stored}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_lost_updates() {
    let dispatcher = immediate(&["weather"]);
    install(&dispatcher, "weather").await;

    let writes = (0..200).map(|i| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .submit(
                    &admin(),
                    Command::set_plugin_data("weather", format!("key{i}"), i.to_string()),
                )
                .await
        })
    });
    for result in join_all(writes).await {
        result.unwrap().unwrap();
    }

    let model = dispatcher.object_model();
    assert_eq!(model.plugins["weather"].data.len(), 200);
    assert_eq!(model.plugins["weather"].data["key42"], "42");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plugins_progress_independently() {
    let supervisor = GatedSupervisor::new();
    let dispatcher = dispatcher_with(&["weather", "clock"], supervisor.clone());
    install(&dispatcher, "weather").await;
    install(&dispatcher, "clock").await;

    dispatcher
        .submit(&admin(), Command::start_plugin("weather"))
        .await
        .unwrap();

    // weather is stuck in Starting; clock is unaffected.
    dispatcher
        .submit(&admin(), Command::set_plugin_data("clock", "zone", "UTC"))
        .await
        .unwrap();
    dispatcher
        .submit(&admin(), Command::uninstall_plugin("clock"))
        .await
        .unwrap();
    assert_eq!(dispatcher.plugin_state("clock"), None);
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Starting));

    supervisor.release(1);
    dispatcher.wait_for_transitions().await;
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Running));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_uninstall_race() {
    let names: Vec<String> = (0..40).map(|i| format!("plugin{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dispatcher = immediate(&refs);

    for name in &names {
        install(&dispatcher, name).await;
        let start = {
            let dispatcher = dispatcher.clone();
            let name = name.clone();
            tokio::spawn(async move { dispatcher.submit(&admin(), Command::start_plugin(name)).await })
        };
        let uninstall = {
            let dispatcher = dispatcher.clone();
            let name = name.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit(&admin(), Command::uninstall_plugin(name))
                    .await
            })
        };
        let start = start.await.unwrap();
        let uninstall = uninstall.await.unwrap();
        dispatcher.wait_for_transitions().await;

        match (start, uninstall) {
            (Ok(_), Err(PluginError::InvalidState { .. })) => {
                assert_eq!(dispatcher.plugin_state(name), Some(PluginState::Running));
            }
            (Err(PluginError::NotFound { .. }), Ok(_)) => {
                assert_eq!(dispatcher.plugin_state(name), None);
            }
            other => panic!("inconsistent outcome for {name}: {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_accept_one() {
    let supervisor = GatedSupervisor::new();
    let dispatcher = dispatcher_with(&["weather"], supervisor.clone());
    install(&dispatcher, "weather").await;

    let starts = (0..10).map(|_| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.submit(&admin(), Command::start_plugin("weather")).await })
    });
    let results: Vec<_> = join_all(starts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, PluginError::AlreadyInProgress { .. })));

    supervisor.release(1);
    dispatcher.wait_for_transitions().await;
    assert_eq!(supervisor.starts(), 1);
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Running));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_installs_same_name() {
    let dispatcher = immediate(&["weather"]);
    let mut events = dispatcher.subscribe();

    let installs = (0..8).map(|_| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .submit(&admin(), Command::install_plugin(common::bundle_path("weather")))
                .await
        })
    });
    for result in join_all(installs).await {
        result.unwrap().unwrap();
    }

    let mut fresh = 0;
    for _ in 0..8 {
        if let LifecycleEventKind::Installed { upgrade: false } = events.recv().await.unwrap().kind {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(dispatcher.plugins().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_single_state() {
    let dispatcher = immediate(&["weather"]);
    install_running(&dispatcher, "weather").await;

    let reader = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut observed = Vec::new();
            for _ in 0..500 {
                let records = dispatcher.plugins();
                assert!(records.len() <= 1);
                observed.extend(records.into_iter().map(|r| r.state));
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    for _ in 0..20 {
        dispatcher
            .submit(&admin(), Command::stop_plugin("weather"))
            .await
            .unwrap();
        dispatcher.wait_for_transitions().await;
        dispatcher
            .submit(&admin(), Command::start_plugin("weather"))
            .await
            .unwrap();
        dispatcher.wait_for_transitions().await;
    }

    let observed = reader.await.unwrap();
    assert!(observed.iter().all(|state| *state != PluginState::Uninstalled));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let dispatcher = immediate(&["weather", "clock"]);
    install_running(&dispatcher, "weather").await;
    install_running(&dispatcher, "clock").await;

    let mut stopped = dispatcher.shutdown().await;
    stopped.sort();
    assert_eq!(stopped, vec!["clock".to_string(), "weather".to_string()]);
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Stopped));
    assert_eq!(dispatcher.plugin_state("clock"), Some(PluginState::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_right_after_start() {
    let supervisor = GatedSupervisor::new();
    let dispatcher = dispatcher_with(&["weather"], supervisor.clone());
    install(&dispatcher, "weather").await;
    dispatcher
        .submit(&admin(), Command::start_plugin("weather"))
        .await
        .unwrap();
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Starting));

    // One permit for the pending start, one for the stop issued by shutdown.
    supervisor.release(2);
    let stopped = dispatcher.shutdown().await;
    assert_eq!(stopped, vec!["weather".to_string()]);
    assert_eq!(dispatcher.plugin_state("weather"), Some(PluginState::Stopped));
}
