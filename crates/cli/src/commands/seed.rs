use remedi_core::config::{AppConfig, LoadOptions};
use remedi_db::{connect_with_settings, migrations, seed_pharmacies, verify_seeds};

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let seeded = seed_pharmacies(&pool)
            .await
            .map_err(|error| ("seed", error.to_string(), 6u8))?;
        let verification =
            verify_seeds(&pool).await.map_err(|error| ("seed_verify", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<(u64, bool), (&'static str, String, u8)>((
            seeded.pharmacies_inserted,
            verification.complete,
        ))
    });

    match result {
        Ok((inserted, true)) => CommandResult::success(
            "seed",
            format!("pharmacy directory ready ({inserted} newly inserted)"),
        ),
        Ok((_, false)) => CommandResult::failure(
            "seed",
            "seed_verify",
            "seed verification reported an incomplete directory",
            6,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
