//! Perk: multi-tenant loyalty rewards backed by point-of-sale orders.
//!
//! Main entry point that wires the backends and starts the server.

use chrono::{Duration, Utc};
use clap::Parser;
use perk_api::{ApiServer, AppState};
use perk_core::config::{AppConfig, SecretsBackend, StorageBackend};
use perk_core::types::{
    LoyaltyProgram, LoyaltyTier, MilestoneProgram, MilestoneThreshold, Organization, ProviderLink, Shop,
};
use perk_discovery::ShopDiscovery;
use perk_loyalty::RewardLedger;
use perk_pos::{PosProvider, ScriptedPosProvider, SquareClient};
use perk_secrets::{
    CredentialResolver, KeyCache, KmsDecryptor, PassthroughDecryptor, SecretStore, SecretsManagerStore,
    StaticSecretStore, TokenDecryptor,
};
use perk_store::{
    DynamoStore, GeoIndex, MemoryGeoIndex, MemoryStore, OrganizationStore, PlanStore, PostgresGeoIndex,
    RewardStore, ShopStore, VisitStore,
};
use perk_visits::{OrganizationService, VisitDeps, VisitPipeline};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "perk-server")]
#[command(about = "Loyalty rewards for visits proven by point-of-sale orders")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "PERK__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PERK__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Document storage backend (overrides config)
    #[arg(long, value_parser = ["memory", "dynamo"])]
    storage: Option<String>,
}

/// Document-store seams, all backed by the same store.
struct Documents {
    organizations: Arc<dyn OrganizationStore>,
    shops: Arc<dyn ShopStore>,
    visits: Arc<dyn VisitStore>,
    plans: Arc<dyn PlanStore>,
    rewards: Arc<dyn RewardStore>,
}

impl Documents {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: OrganizationStore + ShopStore + VisitStore + PlanStore + RewardStore + 'static,
    {
        Self {
            organizations: store.clone(),
            shops: store.clone(),
            visits: store.clone(),
            plans: store.clone(),
            rewards: store,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perk_server=info,perk_visits=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Perk starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    match cli.storage.as_deref() {
        Some("dynamo") => config.storage.backend = StorageBackend::Dynamo,
        Some("memory") => config.storage.backend = StorageBackend::Memory,
        _ => {}
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        storage = ?config.storage.backend,
        secrets = ?config.secrets.backend,
        "Configuration loaded"
    );

    let needs_aws = config.storage.backend == StorageBackend::Dynamo
        || config.secrets.backend == SecretsBackend::Aws;
    let sdk_config = if needs_aws {
        Some(aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await)
    } else {
        None
    };

    // Credentials
    let (secrets, decryptor): (Arc<dyn SecretStore>, Arc<dyn TokenDecryptor>) =
        match (config.secrets.backend, sdk_config.as_ref()) {
            (SecretsBackend::Aws, Some(sdk)) => (
                Arc::new(SecretsManagerStore::new(sdk)),
                Arc::new(KmsDecryptor::new(sdk)),
            ),
            _ => {
                let secrets = StaticSecretStore::new();
                secrets.insert(
                    &config.secrets.provider_secret_ref,
                    r#"{"client_id":"demo-app","client_secret":"demo-secret"}"#,
                );
                (Arc::new(secrets), Arc::new(PassthroughDecryptor))
            }
        };
    let credentials = Arc::new(CredentialResolver::new(secrets, decryptor, Arc::new(KeyCache::new())));

    // Geo index
    let memory_geo = Arc::new(MemoryGeoIndex::new());
    let geo: Arc<dyn GeoIndex> = match config.discovery.database_url.as_deref() {
        Some(url) => Arc::new(PostgresGeoIndex::connect(url, config.discovery.max_connections).await?),
        None => memory_geo.clone(),
    };

    // Documents and provider
    let (documents, provider): (Documents, Arc<dyn PosProvider>) = match (config.storage.backend, sdk_config.as_ref()) {
        (StorageBackend::Dynamo, Some(sdk)) => (
            Documents::from_store(Arc::new(DynamoStore::new(&config.storage, sdk))),
            Arc::new(SquareClient::new(&config.square)?),
        ),
        _ => {
            let store = Arc::new(MemoryStore::new());
            let provider = Arc::new(ScriptedPosProvider::new());
            if let Err(e) = seed_demo(&store, &memory_geo).await {
                error!(error = %e, "Failed to seed demo data");
            }
            (Documents::from_store(store), provider)
        }
    };

    let ledger = Arc::new(RewardLedger::new(
        documents.plans.clone(),
        documents.rewards.clone(),
        config.visits.ledger_max_attempts,
    ));

    let pipeline = VisitPipeline::new(
        VisitDeps {
            shops: documents.shops.clone(),
            organizations: documents.organizations.clone(),
            visits: documents.visits.clone(),
            credentials: credentials.clone(),
            provider: provider.clone(),
            ledger: ledger.clone(),
        },
        &config,
    );

    let discovery = ShopDiscovery::new(
        geo.clone(),
        documents.shops.clone(),
        documents.organizations.clone(),
        &config.discovery,
    );

    let organizations = OrganizationService::new(
        documents.organizations.clone(),
        geo,
        credentials,
        provider,
        &config.secrets,
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
        ledger,
        discovery: Arc::new(discovery),
        organizations: Arc::new(organizations),
        identity_header: Arc::from(config.api.identity_header.as_str()),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
    };

    let api_server = ApiServer::new(config, state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Perk is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}

/// One linked organization with a single shop, for development mode.
async fn seed_demo(store: &MemoryStore, geo: &MemoryGeoIndex) -> anyhow::Result<()> {
    let mut org = Organization::onboard("demo-org", "demo-owner", "Demo Coffee");
    org.provider = ProviderLink {
        access_token: Some(hex::encode("demo-access-token")),
        refresh_token: None,
        expires_at: Some(Utc::now() + Duration::days(365)),
        linked: true,
    };
    org.active = true;
    org.loyalty_active = true;
    org.milestone_active = true;
    org.loyalty_config = LoyaltyProgram {
        tiers: vec![LoyaltyTier {
            visits: 5,
            rewards: vec!["free-drink".to_string()],
        }],
    };
    org.milestone_config = MilestoneProgram {
        thresholds: vec![MilestoneThreshold {
            points: 100,
            reward_options: vec!["free-pastry".to_string()],
        }],
    };

    let shop = Shop {
        id: "demo-shop".to_string(),
        org_id: org.id.clone(),
        name: "Demo Coffee Downtown".to_string(),
        latitude: 40.7128,
        longitude: -74.006,
        shop_hours: None,
        square_location_id: Some("demo-location".to_string()),
        active: true,
    };

    store.put_organization(&org).await?;
    store.put_shop(&shop).await?;
    geo.index_organization(&org.id, org.active);
    geo.index_shop(&shop);

    info!(org_id = %org.id, shop_id = %shop.id, "Seeded demo organization");
    Ok(())
}
