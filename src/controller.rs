use std::{sync::Arc, time::Duration};

use k8s_openapi::api::{
    apps::v1::Deployment,
    autoscaling::v2::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, Service},
};
use kube::{
    Api, ResourceExt,
    api::ListParams,
    client::Client,
    runtime::{Controller, controller::Action, watcher},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    app_config::render_config,
    children::{autoscaler, config_map, deployment, service},
    config::OperatorConfig,
    crd::SpringBootApplication,
    error::Error,
    status::{Condition, REASON_CONFIG_MERGE_FAILED, REASON_CONFIG_MERGED, VALID},
    store::{KubeStore, ObjectKey, ObjectStore},
    sync::{SyncOutcome, cancellable, sync_child},
};

pub struct Context<S> {
    pub store: S,
    pub cancel: CancellationToken,
    pub requeue_after: Duration,
}

impl<S: ObjectStore> Context<S> {
    pub fn new(store: S, cancel: CancellationToken) -> Self {
        Self {
            store,
            cancel,
            requeue_after: Duration::from_secs(10),
        }
    }
}

/// What one pass over an application did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub config_valid: bool,
    pub children: Vec<(&'static str, SyncOutcome)>,
}

impl Report {
    pub fn wrote_anything(&self) -> bool {
        self.children
            .iter()
            .any(|(_, outcome)| *outcome != SyncOutcome::Unchanged)
    }
}

/// Reconciles the application stored under `key`.
///
/// Returns `None` when the application no longer exists or is being deleted;
/// its children are then left to garbage collection.
#[instrument(skip(ctx), fields(app = %key))]
pub async fn reconcile_app<S: ObjectStore>(
    key: &ObjectKey,
    ctx: &Context<S>,
) -> Result<Option<Report>, Error> {
    let app: Option<SpringBootApplication> =
        cancellable(&ctx.cancel, ctx.store.get(key)).await?;

    match app {
        Some(app) if app.metadata.deletion_timestamp.is_none() => app.apply(ctx).await.map(Some),
        _ => {
            debug!("application gone or terminating, nothing to do");
            Ok(None)
        }
    }
}

impl SpringBootApplication {
    async fn apply<S: ObjectStore>(&self, ctx: &Context<S>) -> Result<Report, Error> {
        info!(
            name = self.name_any(),
            namespace = self.namespace().unwrap_or_default(),
            "reconciling application"
        );

        let generation = self.metadata.generation;
        let rendered = render_config(
            self.spec.config.as_ref(),
            self.spec.port,
            &self.spec.context_path,
        );

        let condition = match &rendered {
            Ok(_) => Condition::new(
                VALID,
                true,
                REASON_CONFIG_MERGED,
                "application config merged",
                generation,
            ),
            Err(e) => {
                warn!(error = %e, "failed to merge application config");
                Condition::new(
                    VALID,
                    false,
                    REASON_CONFIG_MERGE_FAILED,
                    e.to_string(),
                    generation,
                )
            }
        };
        self.write_condition(ctx, condition).await?;

        // children keep their last good state until the config is fixed
        let Ok(rendered) = rendered else {
            return Ok(Report {
                config_valid: false,
                children: Vec::new(),
            });
        };

        let (store, cancel) = (&ctx.store, &ctx.cancel);
        let children = vec![
            (
                "ConfigMap",
                sync_child(store, cancel, self, |app: &SpringBootApplication| {
                    config_map::build(app, &rendered)
                })
                .await?,
            ),
            ("Service", sync_child(store, cancel, self, service::build).await?),
            (
                "Deployment",
                sync_child(store, cancel, self, deployment::build).await?,
            ),
            (
                "HorizontalPodAutoscaler",
                sync_child(store, cancel, self, autoscaler::build).await?,
            ),
        ];

        Ok(Report {
            config_valid: true,
            children,
        })
    }

    async fn write_condition<S: ObjectStore>(
        &self,
        ctx: &Context<S>,
        condition: Condition,
    ) -> Result<(), Error> {
        let mut status = self.status.clone().unwrap_or_default();
        if !status.conditions.upsert(condition) {
            return Ok(());
        }

        let key = ObjectKey::of(self)?;
        cancellable(&ctx.cancel, ctx.store.write_status(&key, &status)).await
    }
}

#[tracing::instrument(skip_all)]
async fn reconcile<S: ObjectStore>(
    app: Arc<SpringBootApplication>,
    ctx: Arc<Context<S>>,
) -> Result<Action, Error> {
    let key = ObjectKey::of(app.as_ref())?;
    reconcile_app(&key, &ctx).await?;

    Ok(Action::await_change())
}

#[instrument(skip_all)]
fn error_policy<S: ObjectStore>(
    _object: Arc<SpringBootApplication>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    if error.is_retryable() {
        warn!(?error, "retryable error on reconcile loop");
        Action::requeue(ctx.requeue_after)
    } else {
        // only a spec change can fix this
        error!(?error, "error occured on reconcile loop");
        Action::await_change()
    }
}

#[instrument(skip_all)]
pub async fn run(
    client: Client,
    config: &OperatorConfig,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let apps = Api::<SpringBootApplication>::all(client.clone());

    info!("checking if CRDs are installed");
    let _ = apps.list(&ListParams::default().limit(1)).await?;
    info!("confirmed that CRDs are installed");

    let ctx = Context {
        store: KubeStore::new(client.clone(), &config.field_manager),
        cancel,
        requeue_after: config.requeue_after(),
    };

    let stream = Controller::new(apps, watcher::Config::default().any_semantic())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(
            Api::<HorizontalPodAutoscaler>::all(client),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(
            reconcile::<KubeStore>,
            error_policy::<KubeStore>,
            Arc::new(ctx),
        );
    let mut stream = std::pin::pin!(stream);

    info!("starting up controller loop process");
    while let Some(res) = stream.next().await {
        if let Err(e) = res {
            error!(error = ?e, "error occured on controller loop");
        }
    }

    info!("controller has been terminated");

    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
pub async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, waiting for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
    cancel.cancel();
}
