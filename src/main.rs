use std::sync::Arc;
use std::time::Duration;

use agent_factory::chat_routes::ChatRouteState;
use agent_factory::config::AppConfig;
use agent_factory::error::Result;
use agent_factory::llm::create_provider;
use agent_factory::onboarding::{FlowCatalog, OnboardingRouteState};
use agent_factory::orchestrator::Orchestrator;
use agent_factory::provisioning::{LoggingProvisioner, Provisioner, WebhookProvisioner};
use agent_factory::server;
use agent_factory::store::{Database, LibSqlBackend};
use agent_factory::tools::{CurrentTimeTool, NotifyHumanTool, ToolRegistry, UserProgressTool};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    eprintln!("🏭 Agent Factory v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Chat API: http://0.0.0.0:{}/api/chat", config.port);
    eprintln!("   Onboarding API: http://0.0.0.0:{}/api/onboarding", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Flows + provisioning ─────────────────────────────────────────────
    let catalog = Arc::new(match &config.flows_dir {
        Some(dir) => FlowCatalog::load_dir(dir)?,
        None => FlowCatalog::builtin()?,
    });
    eprintln!("   Flows: {}", catalog.len());

    // ── LLM + tools ──────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;

    let tools = Arc::new(ToolRegistry::new());
    tools.register_sync(Arc::new(CurrentTimeTool::new()));
    tools.register_sync(Arc::new(UserProgressTool::new(db.clone(), catalog.clone())));
    tools.register_sync(Arc::new(NotifyHumanTool::new()));

    let orchestrator = Arc::new(
        Orchestrator::new(llm, tools, config.system_template.clone())
            .with_max_tokens(config.llm.max_tokens),
    );

    let provisioner: Arc<dyn Provisioner> = match &config.provision_webhook {
        Some(url) => Arc::new(WebhookProvisioner::new(url, Duration::from_secs(10))?),
        None => Arc::new(LoggingProvisioner),
    };
    tracing::info!(provisioner = provisioner.name(), "Provisioning configured");

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = server::router(
        ChatRouteState {
            orchestrator,
            triggers: config.escalation_triggers.clone(),
            catalog: catalog.clone(),
        },
        OnboardingRouteState {
            catalog,
            db,
            provisioner,
        },
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
