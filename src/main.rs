use std::{env, sync::Arc};

use poise::serenity_prelude::{self as serenity, Http};
use serenity::GatewayIntents;
use tracing::{error, info, warn};
use vigilant_daemon::{
    Data, Error, commands,
    automod::{AutoModerator, ProtectionFilter, SerenityMemberDirectory},
    config::{AppConfig, CONFIG_FILE, CachedConfigStore, MemoryConfigStore},
    enforcement::{ExpiryScheduler, MemoryCaseStore, PunishmentExecutor, SerenityModerationAction},
    handlers, logging,
};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = AppConfig::load(CONFIG_FILE).await?;
    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    let communities = MemoryConfigStore::load_glob(&config.communities_glob).await?;
    let config_store = CachedConfigStore::new(communities, config.config_cache_ttl());
    let cases = MemoryCaseStore::load(&config.case_snapshot).await?;

    let http = Arc::new(Http::new(&token));
    let executor = Arc::new(
        PunishmentExecutor::new(
            Arc::new(cases.clone()),
            Arc::new(SerenityModerationAction::new(Arc::clone(&http))),
        )
        .with_execution(config.execute_punishments)
        .with_max_lift_attempts(config.max_lift_attempts),
    );
    let protection = ProtectionFilter::new(
        config.site_admins.iter().copied(),
        Arc::new(SerenityMemberDirectory::new(Arc::clone(&http))),
        config.membership_timeout(),
    );
    let moderator = Arc::new(AutoModerator::new(
        Arc::new(config_store),
        protection,
        Arc::clone(&executor),
    ));

    let scheduler = Arc::new(ExpiryScheduler::new(executor)).start(config.sweep_interval());
    let data = Data::new(cases, scheduler.client(), config);

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::ping(),
                commands::sweep(),
                commands::case(),
                commands::liftfailures(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler::new(moderator))
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    let autosave_data = data.clone();
    let autosave = tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave_data.config.sweep_interval());
        loop {
            interval.tick().await;
            if let Err(e) = autosave_data.save().await {
                warn!("Failed to save case snapshot: {e}");
            }
        }
    });

    info!("Starting bot...");
    tokio::select! {
        result = client.start() => {
            if let Err(err) = result {
                error!("Client stopped with error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            shard_manager.shutdown_all().await;
        }
    }

    autosave.abort();
    scheduler.stop().await;
    data.save().await?;
    info!("Shutdown complete");

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
