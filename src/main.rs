// Air quality forecast v0.1
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod routes;
mod services;
mod store;

use config::AppConfig;
use errors::AppError;
use routes::AppState;
use services::cetesb::{self, CetesbClient, Station};
use services::iqair::{self, IqAirClient};

/// Air quality API: OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Air Quality Forecast API",
        version = "0.1.0",
        description = "Read-only access to processed air-quality data and \
            one-hour-ahead forecasts of the target pollutant, built from the \
            live IQAir reading and the trailing historical window.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Dashboard", description = "Processed pollutant series per station"),
        (name = "Forecast", description = "Next-hour pollutant forecast"),
    ),
    paths(
        routes::health::health_check,
        routes::dashboard::get_stations,
        routes::dashboard::get_series,
        routes::forecast::get_forecast,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            services::dashboard::StationsResponse,
            services::dashboard::SeriesResponse,
            services::dashboard::SeriesPoint,
            services::dashboard::SeriesKpis,
            services::forecast::ForecastReport,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[derive(Parser)]
#[command(name = "air-quality-forecast")]
#[command(about = "Air quality collection and next-hour forecasting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the project folder layout
    Scaffold {
        /// Project root (default: PROJECT_DIR)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Append the current IQAir measurement to the real-time log
    CollectIqair {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        country: Option<String>,
    },

    /// Download daily hourly readings of one CETESB station
    CollectCetesb {
        /// QUALAR station id (e.g. 83)
        #[arg(long)]
        station_id: u32,

        /// Station name used in the output file name (e.g. Pinheiros)
        #[arg(long)]
        station_name: String,

        /// Dates as dd/mm/YYYY, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        dates: Vec<String>,
    },

    /// Print the next-hour forecast of the target pollutant
    Forecast,

    /// Start the REST API server
    Serve {
        /// Port to listen on (default: PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "air_quality_forecast=info,tower_http=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;

    match command {
        Commands::Scaffold { root } => {
            let root = root.unwrap_or_else(|| config.project_dir.clone());
            let report = services::scaffold::scaffold(&root)?;
            println!(
                "Project structure ready in {}: {} created, {} already present",
                root.display(),
                report.created(),
                report.existing()
            );
        }

        Commands::CollectIqair {
            city,
            state,
            country,
        } => {
            let mut location = config.location.clone();
            location.city = city.unwrap_or(location.city);
            location.state = state.unwrap_or(location.state);
            location.country = country.unwrap_or(location.country);

            let client = IqAirClient::new(&config.iqair_base_url, config.require_iqair_key()?)?;
            let (path, rows) = iqair::collect(&client, &location, &config.raw_data_dir).await?;
            println!("Saved measurement to {} ({} rows)", path.display(), rows);
        }

        Commands::CollectCetesb {
            station_id,
            station_name,
            dates,
        } => {
            let dates = dates
                .iter()
                .map(|d| cetesb::parse_collection_date(d))
                .collect::<Result<Vec<_>, _>>()?;
            let station = Station {
                id: station_id,
                name: station_name,
            };

            let client = CetesbClient::new(&config.cetesb_url)?;
            let summary =
                cetesb::collect_days(&client, &station, &dates, &config.raw_data_dir).await;
            println!("Collection finished: {}", summary);

            if summary.failed() > 0 {
                return Err(AppError::ExternalServiceError(format!(
                    "{} of {} dates failed",
                    summary.failed(),
                    summary.days.len()
                )));
            }
        }

        Commands::Forecast => {
            let pipeline = services::build_live_pipeline(&config)?;
            let report = pipeline.run_cycle().await?;
            println!("{}", report);
        }

        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            serve(config, port).await?;
        }
    }

    Ok(())
}

async fn serve(config: AppConfig, port: u16) -> Result<(), AppError> {
    let forecaster = match services::build_live_pipeline(&config) {
        Ok(pipeline) => Ok(Arc::new(pipeline)),
        Err(e) => {
            tracing::warn!("Forecast endpoint disabled: {}", e);
            Err(e.to_string())
        }
    };

    let app_state = AppState {
        config: Arc::new(config),
        forecaster,
    };

    // read-only API
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route(
            "/api/v1/dashboard/stations",
            get(routes::dashboard::get_stations),
        )
        .route(
            "/api/v1/dashboard/series",
            get(routes::dashboard::get_series),
        )
        .route("/api/v1/forecast", get(routes::forecast::get_forecast))
        .with_state(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!("Swagger UI available at http://localhost:{}/swagger-ui/", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
