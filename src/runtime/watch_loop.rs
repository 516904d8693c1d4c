//! # Watch Loop
//!
//! Runs the three controllers side by side until a shutdown signal arrives.
//!
//! | Controller         | Also watches                                   |
//! |--------------------|------------------------------------------------|
//! | `SopsProvider`     | marker-labelled `Secret`s, `Namespace`s        |
//! | `SopsSecret`       | owned `Secret`s, `SopsProvider`s, `Namespace`s |
//! | `GlobalSopsSecret` | owned `Secret`s, `SopsProvider`s, `Namespace`s |
//!
//! Selectors can reach any object of the watched kinds, so a change to one
//! of them requeues every object of the controlled kind.

use crate::constants::{KEY_SECRET_LABEL, KEY_SECRET_LABEL_VALUE};
use crate::controller::reconciler::{reconcile_provider, reconcile_secret, Context};
use crate::crd::{GlobalSopsSecret, SopsProvider, SopsSecret};
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_controller_result, handle_reconciliation_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{Api, Client, Resource};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{info, Instrument};

fn controller_config(ctx: &Context) -> controller::Config {
    controller::Config::default().concurrency(ctx.config.max_concurrent_reconciliations)
}

/// Run all controllers until shutdown
pub async fn run_watch_loop(
    client: Client,
    ctx: Arc<Context>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );
    info!("Starting controller watch loops...");

    let key_secrets = watcher::Config::default()
        .labels(&format!("{KEY_SECRET_LABEL}={KEY_SECRET_LABEL_VALUE}"));

    let providers = Controller::new(
        Api::<SopsProvider>::all(client.clone()),
        watcher::Config::default().any_semantic(),
    );
    let provider_store = providers.store();
    let namespace_store = provider_store.clone();
    let providers = providers
        .watches(Api::<Secret>::all(client.clone()), key_secrets, move |_: Secret| {
            refs(&provider_store)
        })
        .watches(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
            move |_: Namespace| refs(&namespace_store),
        )
        .with_config(controller_config(&ctx))
        .shutdown_on_signal()
        .run(
            reconcile_provider,
            handle_reconciliation_error::<SopsProvider>,
            Arc::clone(&ctx),
        )
        .for_each(|result| {
            handle_controller_result(result, |name, _| metrics::delete_provider_condition(name));
            futures::future::ready(())
        });

    let secrets = secret_controller(
        Controller::new(
            Api::<SopsSecret>::all(client.clone()),
            watcher::Config::default().any_semantic(),
        ),
        &client,
        &ctx,
    )
    .run(
        reconcile_secret::<SopsSecret>,
        handle_reconciliation_error::<SopsSecret>,
        Arc::clone(&ctx),
    )
    .for_each(|result| {
        handle_controller_result(result, |name, namespace| {
            metrics::delete_secret_condition(name, namespace.unwrap_or_default());
        });
        futures::future::ready(())
    });

    let global_secrets = secret_controller(
        Controller::new(
            Api::<GlobalSopsSecret>::all(client.clone()),
            watcher::Config::default().any_semantic(),
        ),
        &client,
        &ctx,
    )
    .run(
        reconcile_secret::<GlobalSopsSecret>,
        handle_reconciliation_error::<GlobalSopsSecret>,
        Arc::clone(&ctx),
    )
    .for_each(|result| {
        handle_controller_result(result, |name, _| metrics::delete_secret_condition(name, ""));
        futures::future::ready(())
    });

    async {
        tokio::join!(providers, secrets, global_secrets);
    }
    .instrument(watch_span)
    .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}

/// Shared wiring of the two encrypted secret controllers
fn secret_controller<K>(controller: Controller<K>, client: &Client, ctx: &Context) -> Controller<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let provider_store = controller.store();
    let namespace_store = provider_store.clone();
    controller
        .owns(Api::<Secret>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<SopsProvider>::all(client.clone()),
            watcher::Config::default(),
            move |_: SopsProvider| refs(&provider_store),
        )
        .watches(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
            move |_: Namespace| refs(&namespace_store),
        )
        .with_config(controller_config(ctx))
        .shutdown_on_signal()
}

fn refs<K>(store: &Store<K>) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .iter()
        .map(|object| ObjectRef::from_obj(object.as_ref()))
        .collect()
}
