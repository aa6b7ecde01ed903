use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mesh_mgmt::{
    ChannelSession, ComponentValidationDetail, DetailRecord, ErrorCounting, EventSubscription,
    FanoutAggregator, Profile, RenderDetail, Request, RouterLinkDetails, RouterTerminatorsDetails,
    SessionBindings, StreamEventsRequest, TerminatorDetail,
    ValidateIdentityConnectionStatusesRequest, ValidateRouterDataModelRequest,
    ValidateRouterErtTerminatorsRequest, ValidateRouterLinksRequest,
    ValidateRouterSdkTerminatorsRequest, ValidateTerminatorsRequest, ValidationRequest,
    begin_validation, exit_code, render_summary, send_and_await_result, wire,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(about = "Management and diagnostics client for the mesh control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connection profile (YAML)
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Management endpoint URL, overrides the profile
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fan-out validation of remote components
    Validate {
        #[command(subcommand)]
        target: ValidateTarget,
    },

    /// Stream data from the controller
    Stream {
        #[command(subcommand)]
        source: StreamSource,
    },
}

#[derive(Subcommand)]
enum ValidateTarget {
    /// Check controller terminator records against the owning routers
    Terminators {
        #[arg(long, default_value = "")]
        filter: String,

        /// Ask routers to remove or repair invalid terminators
        #[arg(long)]
        fix: bool,

        #[command(flatten)]
        common: CommonValidateArgs,
    },

    /// Compare the controller's link table with every router's
    RouterLinks {
        #[arg(long, default_value = "")]
        filter: String,

        #[command(flatten)]
        common: CommonValidateArgs,
    },

    /// Check router data-model replicas against the controller
    RouterDataModel {
        #[arg(long, default_value = "")]
        router_filter: String,

        /// Also validate the controller's own copy
        #[arg(long)]
        validate_ctrl: bool,

        #[arg(long)]
        fix: bool,

        #[command(flatten)]
        common: CommonValidateArgs,
    },

    /// Check SDK-hosted terminator state on each router
    RouterSdkTerminators {
        #[arg(long, default_value = "")]
        filter: String,

        #[command(flatten)]
        common: CommonValidateArgs,
    },

    /// Check tunneler-hosted terminator state on each router
    RouterErtTerminators {
        #[arg(long, default_value = "")]
        filter: String,

        #[command(flatten)]
        common: CommonValidateArgs,
    },

    /// Cross-check identity connection state between controller and routers
    IdentityConnectionStatuses {
        #[arg(long, default_value = "")]
        router_filter: String,

        #[command(flatten)]
        common: CommonValidateArgs,
    },
}

#[derive(Args)]
struct CommonValidateArgs {
    /// Also print valid results
    #[arg(long)]
    include_valid: bool,

    /// Timeout for the initiating request, in seconds; defaults to the
    /// profile's request timeout
    #[arg(long)]
    timeout: Option<u64>,

    /// Overall aggregation deadline, in seconds (no deadline if unset)
    #[arg(long)]
    deadline: Option<u64>,
}

#[derive(Subcommand)]
enum StreamSource {
    /// Print controller events as they happen, until the channel closes
    Events {
        #[command(flatten)]
        args: StreamEventsArgs,
    },
}

#[derive(Args)]
struct StreamEventsArgs {
    /// Include all event kinds
    #[arg(long)]
    all: bool,

    /// Include circuit events
    #[arg(long)]
    circuits: bool,

    /// Include entity count events
    #[arg(long)]
    entity_counts: bool,

    /// Entity count event interval, in seconds
    #[arg(long)]
    entity_counts_interval: Option<u64>,

    /// Include link events
    #[arg(long)]
    links: bool,

    /// Include metrics events
    #[arg(long)]
    metrics: bool,

    /// Only stream metrics matching this filter
    #[arg(long)]
    metrics_filter: Option<String>,

    /// Only stream metrics from these sources
    #[arg(long)]
    metrics_source_filter: Option<String>,

    /// Include router events
    #[arg(long)]
    routers: bool,

    /// Include service events
    #[arg(long)]
    services: bool,

    /// Include terminator events
    #[arg(long)]
    terminators: bool,

    /// Timeout for the initiating request, in seconds; defaults to the
    /// profile's request timeout
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut profile = Profile::load_or_default(cli.profile.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        profile.endpoint = endpoint;
    }

    let code = match cli.command {
        Commands::Validate { target } => run_validate(&profile, target).await?,
        Commands::Stream { source } => match source {
            StreamSource::Events { args } => run_stream_events(&profile, args).await?,
        },
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run_validate(profile: &Profile, target: ValidateTarget) -> Result<i32> {
    match target {
        ValidateTarget::Terminators {
            filter,
            fix,
            common,
        } => {
            let request = ValidationRequest::Terminators(ValidateTerminatorsRequest {
                filter,
                fix_invalid: fix,
            });
            run_validation::<TerminatorDetail>(profile, request, ErrorCounting::PerRecord, common)
                .await
        }
        ValidateTarget::RouterLinks { filter, common } => {
            let request = ValidationRequest::RouterLinks(ValidateRouterLinksRequest { filter });
            run_validation::<RouterLinkDetails>(
                profile,
                request,
                ErrorCounting::PerSubError,
                common,
            )
            .await
        }
        ValidateTarget::RouterDataModel {
            router_filter,
            validate_ctrl,
            fix,
            common,
        } => {
            let request = ValidationRequest::RouterDataModel(ValidateRouterDataModelRequest {
                router_filter,
                validate_ctrl,
                fix,
            });
            run_validation::<ComponentValidationDetail>(
                profile,
                request,
                ErrorCounting::PerSubError,
                common,
            )
            .await
        }
        ValidateTarget::RouterSdkTerminators { filter, common } => {
            let request =
                ValidationRequest::RouterSdkTerminators(ValidateRouterSdkTerminatorsRequest {
                    filter,
                });
            run_validation::<RouterTerminatorsDetails>(
                profile,
                request,
                ErrorCounting::PerSubError,
                common,
            )
            .await
        }
        ValidateTarget::RouterErtTerminators { filter, common } => {
            let request =
                ValidationRequest::RouterErtTerminators(ValidateRouterErtTerminatorsRequest {
                    filter,
                });
            run_validation::<RouterTerminatorsDetails>(
                profile,
                request,
                ErrorCounting::PerSubError,
                common,
            )
            .await
        }
        ValidateTarget::IdentityConnectionStatuses {
            router_filter,
            common,
        } => {
            let request = ValidationRequest::IdentityConnectionStatuses(
                ValidateIdentityConnectionStatusesRequest { router_filter },
            );
            run_validation::<ComponentValidationDetail>(
                profile,
                request,
                ErrorCounting::PerSubError,
                common,
            )
            .await
        }
    }
}

/// Drive one fan-out validation end to end: bind the detail queue, connect,
/// send the initiating request, aggregate until done, render the summary.
async fn run_validation<D>(
    profile: &Profile,
    request: ValidationRequest,
    counting: ErrorCounting,
    common: CommonValidateArgs,
) -> Result<i32>
where
    D: DetailRecord + RenderDetail + DeserializeOwned + Send + 'static,
{
    let (detail_tx, detail_rx) = mpsc::channel::<D>(64);
    let bindings =
        SessionBindings::new().typed_detail_channel(request.detail_content_type(), detail_tx);

    let session = ChannelSession::connect(&profile.session_config(), bindings).await?;

    let timeout = common
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| session.request_timeout());
    let response = begin_validation(&session, &request, timeout).await?;
    info!("started validation of {} components", response.component_count);

    let outcome = FanoutAggregator::new(response.component_count, counting)
        .include_valid(common.include_valid)
        .deadline(common.deadline.map(Duration::from_secs))
        .run(detail_rx, session.close_signal(), |detail: D| {
            let mut block = String::new();
            detail.render(&mut block);
            print!("{block}");
        })
        .await;

    println!("{}", render_summary(request.label(), &outcome));
    info!(
        "validation finished at {}",
        chrono::Utc::now().to_rfc3339()
    );

    session.close();
    Ok(exit_code(&outcome))
}

fn build_subscriptions(args: &StreamEventsArgs) -> Vec<EventSubscription> {
    let none_selected = !(args.circuits
        || args.entity_counts
        || args.links
        || args.metrics
        || args.routers
        || args.services
        || args.terminators);
    let all = args.all || none_selected;

    let mut subscriptions = Vec::new();
    if args.circuits || all {
        subscriptions.push(EventSubscription::new("circuits"));
    }
    if args.entity_counts || all {
        let mut subscription = EventSubscription::new("entity-counts");
        if let Some(secs) = args.entity_counts_interval {
            subscription = subscription.with_option("interval", &format!("{secs}s"));
        }
        subscriptions.push(subscription);
    }
    if args.links || all {
        subscriptions.push(EventSubscription::new("links"));
    }
    if args.metrics || all {
        let mut subscription = EventSubscription::new("metrics");
        if let Some(filter) = &args.metrics_filter {
            subscription = subscription.with_option("metric_filter", filter);
        }
        if let Some(sources) = &args.metrics_source_filter {
            subscription = subscription.with_option("source_filter", sources);
        }
        subscriptions.push(subscription);
    }
    if args.routers || all {
        subscriptions.push(EventSubscription::new("routers"));
    }
    if args.services || all {
        subscriptions.push(EventSubscription::new("services"));
    }
    if args.terminators || all {
        subscriptions.push(EventSubscription::new("terminators"));
    }
    subscriptions
}

/// Subscribe to controller events and print each one as it arrives. The
/// acknowledgement is a plain result envelope; events then flow until the
/// channel closes.
async fn run_stream_events(profile: &Profile, args: StreamEventsArgs) -> Result<i32> {
    let request = StreamEventsRequest {
        format: "json".to_string(),
        subscriptions: build_subscriptions(&args),
    };

    let bindings = SessionBindings::new().on_content_type(wire::STREAM_EVENTS_EVENT, |envelope| {
        println!("{}", String::from_utf8_lossy(&envelope.body));
    });

    let session = ChannelSession::connect(&profile.session_config(), bindings).await?;

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| session.request_timeout());
    let body = wire::encode_body(&request)?;
    let ack = send_and_await_result(
        &session,
        Request::new(wire::STREAM_EVENTS_REQUEST, body, timeout),
    )
    .await?;

    if !ack.success {
        anyhow::bail!("error starting event streaming [{}]", ack.message);
    }
    info!("event streaming started: {}", ack.message);

    let mut close = session.close_signal();
    let _ = close.wait_for(|closed| *closed).await;
    info!("channel closed, exiting");
    Ok(0)
}
