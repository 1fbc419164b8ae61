//! The `eck-operator` executable: prints the CRDs or runs the license, trial
//! and association controllers next to the admission webhook server.
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use eck_operator::{
    CustomResourceExt,
    association::controller as association,
    cli::{Command, LOG_ENV_VAR, RunArguments},
    client::{Client, ResourceId},
    controller::error_requeue,
    crd::{association::Association, elasticsearch::Elasticsearch, kibana::Kibana, user::User},
    init::Init,
    kvp::LICENSE_TYPE_LABEL,
    license::{
        cluster,
        store::ENTERPRISE_TRIAL_LICENSE_TYPE,
        trial,
        verifier::{self, TRIAL_KEY_BITS, Verifier},
    },
    logging::{
        self,
        controller::{ReconcilerError, report_controller_reconciled},
        k8s_events::{EventPublisher, KubeEventPublisher},
    },
    shared,
    utils::signal::{SignalError, SignalWatcher},
    watches::DynamicWatches,
};
use eck_webhook::{
    Options, WebhookError, WebhookServer,
    handlers::{self, AdmissionState},
};
use futures::{StreamExt, future};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Resource,
    runtime::{
        Controller,
        controller::{Action, Config as ControllerConfig, Error as ControllerError},
        reflector::ObjectRef,
        watcher,
    },
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "eck-operator";
const FIELD_MANAGER: &str = "elastic-operator";
const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print the CRDs"))]
    PrintCrd { source: shared::crd::Error },

    #[snafu(display("failed to initialize logging"))]
    InitLogging { source: logging::Error },

    #[snafu(display("failed to read the license public key from {path:?}"))]
    ReadPublicKey {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the license public key from {path:?}"))]
    ParsePublicKey {
        source: verifier::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to watch for termination signals"))]
    WatchSignals { source: SignalError },

    #[snafu(display("failed to create the webhook server"))]
    CreateWebhook { source: WebhookError },

    #[snafu(display("failed to run the webhook server"))]
    RunWebhook { source: WebhookError },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    match Command::<RunArguments>::parse() {
        Command::Crd => {
            Elasticsearch::print_yaml_schema(OPERATOR_VERSION).context(PrintCrdSnafu)?;
            Kibana::print_yaml_schema(OPERATOR_VERSION).context(PrintCrdSnafu)?;
            Association::print_yaml_schema(OPERATOR_VERSION).context(PrintCrdSnafu)?;
            User::print_yaml_schema(OPERATOR_VERSION).context(PrintCrdSnafu)
        }
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArguments) -> Result<(), Error> {
    logging::initialize_logging(LOG_ENV_VAR, APP_NAME, args.log_directory.as_deref())
        .context(InitLoggingSnafu)?;
    let init = Init::from_run_arguments(&args);
    tracing::info!(
        version = OPERATOR_VERSION,
        operator.namespace = %init.operator_namespace,
        operator.uuid = %init.operator_uuid,
        "starting {APP_NAME}"
    );

    let enterprise_key = match &args.license_public_key {
        Some(path) => Some(load_public_key(path).await?),
        None => {
            tracing::info!("no license public key configured, only trial licenses verify");
            None
        }
    };

    let kube_client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let store = Client::new(kube_client.clone(), FIELD_MANAGER);
    let signals = SignalWatcher::termination().context(WatchSignalsSnafu)?;
    let config = ControllerConfig::default().concurrency(init.max_concurrent_reconciles);

    let license_controller = run_license_controller(
        &kube_client,
        cluster::Ctx {
            store: store.clone(),
            init: init.clone(),
            enterprise_key: enterprise_key.clone(),
        },
        config.clone(),
        signals.handle(),
    );
    let trial_controller = run_trial_controller(
        &kube_client,
        trial::Ctx {
            store: store.clone(),
            init: init.clone(),
            key_bits: TRIAL_KEY_BITS,
        },
        config.clone(),
        signals.handle(),
    );
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(
        kube_client.clone(),
        association::CONTROLLER_NAME,
    ));
    let association_controller = run_association_controller(
        &kube_client,
        association::Ctx {
            store: store.clone(),
            init: init.clone(),
            watches: Arc::new(DynamicWatches::default()),
            events,
        },
        config,
        signals.handle(),
    );

    let webhook = match &args.webhook_cert_dir {
        Some(cert_dir) => {
            let state = Arc::new(AdmissionState {
                store,
                operator_namespace: init.operator_namespace.clone(),
                enterprise_key,
                max_name_length: init.max_name_length,
            });
            let options = Options {
                socket_addr: ([0, 0, 0, 0], args.webhook_port).into(),
                cert_dir: cert_dir.clone(),
            };
            Some(WebhookServer::new(handlers::router(state), &options).context(CreateWebhookSnafu)?)
        }
        None => {
            tracing::info!("no webhook certificate directory configured, admission webhook disabled");
            None
        }
    };
    let webhook = async {
        match webhook {
            Some(server) => server.run(signals.handle()).await.context(RunWebhookSnafu),
            None => Ok(()),
        }
    };

    let ((), (), (), webhook) = futures::join!(
        license_controller,
        trial_controller,
        association_controller,
        webhook
    );
    webhook
}

async fn load_public_key(path: &Path) -> Result<Verifier, Error> {
    let der = tokio::fs::read(path)
        .await
        .context(ReadPublicKeySnafu { path })?;
    Verifier::from_public_key_der(&der).context(ParsePublicKeySnafu { path })
}

fn report_to<K, E>(
    events: Arc<dyn EventPublisher>,
    controller_name: &'static str,
) -> impl FnMut(Result<(ObjectRef<K>, Action), ControllerError<E, watcher::Error>>) -> future::Ready<()>
where
    K: Resource<DynamicType = ()>,
    E: ReconcilerError + 'static,
{
    move |result| {
        report_controller_reconciled(&events, controller_name, &result);
        future::ready(())
    }
}

/// Reconciles the cluster license of every Elasticsearch cluster. Changes to
/// license Secrets in the operator namespace re-check all clusters.
fn run_license_controller(
    kube_client: &kube::Client,
    ctx: cluster::Ctx<Client>,
    config: ControllerConfig,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) -> impl Future<Output = ()> {
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(
        kube_client.clone(),
        cluster::CONTROLLER_NAME,
    ));
    let controller = Controller::new(
        ctx.init.watch_namespace.get_api::<Elasticsearch>(kube_client),
        watcher::Config::default(),
    );
    let clusters = controller.store();

    controller
        .watches(
            Api::<Secret>::namespaced(kube_client.clone(), &ctx.init.operator_namespace),
            watcher::Config::default().labels(LICENSE_TYPE_LABEL),
            move |_| {
                clusters
                    .state()
                    .iter()
                    .map(|es| ObjectRef::from_obj(es.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .with_config(config)
        .graceful_shutdown_on(shutdown)
        .run(
            cluster::reconcile,
            |_, err: &cluster::Error, _| error_requeue(err.kind()),
            Arc::new(ctx),
        )
        .for_each(report_to(events, cluster::CONTROLLER_NAME))
}

/// Starts the trial for trial request Secrets in the operator namespace.
fn run_trial_controller(
    kube_client: &kube::Client,
    ctx: trial::Ctx<Client>,
    config: ControllerConfig,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) -> impl Future<Output = ()> {
    let events: Arc<dyn EventPublisher> = Arc::new(KubeEventPublisher::new(
        kube_client.clone(),
        trial::CONTROLLER_NAME,
    ));

    Controller::new(
        Api::<Secret>::namespaced(kube_client.clone(), &ctx.init.operator_namespace),
        watcher::Config::default()
            .labels(&format!("{LICENSE_TYPE_LABEL}={ENTERPRISE_TRIAL_LICENSE_TYPE}")),
    )
    .with_config(config)
    .graceful_shutdown_on(shutdown)
    .run(
        trial::reconcile,
        |_, err: &trial::Error, _| error_requeue(err.kind()),
        Arc::new(ctx),
    )
    .for_each(report_to(events, trial::CONTROLLER_NAME))
}

/// Converges associations. Clusters and workloads are mapped back to the
/// associations that registered a watch on them.
fn run_association_controller(
    kube_client: &kube::Client,
    ctx: association::Ctx<Client>,
    config: ControllerConfig,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) -> impl Future<Output = ()> {
    let events = ctx.events.clone();
    let es_watches = ctx.watches.clone();
    let kibana_watches = ctx.watches.clone();

    Controller::new(
        ctx.init.watch_namespace.get_api::<Association>(kube_client),
        watcher::Config::default(),
    )
    .watches(
        ctx.init.watch_namespace.get_api::<Elasticsearch>(kube_client),
        watcher::Config::default(),
        move |es| watchers(&es_watches, &ResourceId::of(&es)),
    )
    .watches(
        ctx.init.watch_namespace.get_api::<Kibana>(kube_client),
        watcher::Config::default(),
        move |kibana| watchers(&kibana_watches, &ResourceId::of(&kibana)),
    )
    .with_config(config)
    .graceful_shutdown_on(shutdown)
    .run(
        association::reconcile,
        |_, err: &association::Error, _| error_requeue(err.kind()),
        Arc::new(ctx),
    )
    .for_each(report_to(events, association::CONTROLLER_NAME))
}

fn watchers(watches: &DynamicWatches, watched: &ResourceId) -> Vec<ObjectRef<Association>> {
    watches
        .watchers_of(watched)
        .into_iter()
        .map(|watcher| ObjectRef::new(&watcher.name).within(&watcher.namespace))
        .collect()
}
