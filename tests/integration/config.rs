use core::time::Duration;
use std::{env, fs};

use clap::Parser as _;

use quine_runtime::{
    catalog::{CatalogError, load_catalog},
    cli::{Cli, Command},
    config,
};

#[tokio::test]
async fn config_file_drives_runtime_settings() {
    let path = env::temp_dir().join("quine_integration_config.toml");
    fs::write(
        &path,
        r#"
        [title]
        brand = "Kiosk"
        account_id = 42

        [monitor]
        ip_refresh_secs = 30

        [[advertise.services]]
        name = "kiosk-http"
        service_type = "_http._tcp."
        port = 8080

        [launch]
        enable = false
        "#,
    )
    .unwrap();

    let cfg = config::load(&path).await.unwrap();
    let settings = cfg.runtime_settings();
    assert_eq!(settings.brand, "Kiosk");
    assert_eq!(settings.account_id, 42);
    assert_eq!(settings.ip_refresh_interval, Duration::from_secs(30));
    assert_eq!(settings.health_poll_interval, Duration::from_secs(5));
    assert_eq!(settings.advertisements.len(), 1);
    assert_eq!(settings.advertisements[0].port, 8080);
    assert!(settings.launch_steps.is_empty());
}

#[tokio::test]
async fn catalog_is_withheld_without_required_app() {
    let path = env::temp_dir().join("quine_integration_catalog.toml");
    fs::write(
        &path,
        r#"
        [[apps]]
        name = "Termux"
        identifier = "com.termux"

        [[apps]]
        name = "Browser"
        identifier = "org.mozilla.firefox"
        "#,
    )
    .unwrap();
    let cfg = config::load(&path).await.unwrap();

    assert_eq!(
        load_catalog(&cfg.directory(), &cfg.allow_list(), cfg.required_app()),
        Err(CatalogError::RequiredAppMissing(
            "com.topjohnwu.magisk".to_string()
        ))
    );

    let apps = load_catalog(&cfg.directory(), &cfg.allow_list(), None).unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].identifier, "com.termux");
}

#[test]
fn cli_parses_run_with_start_hidden() {
    let cli = Cli::try_parse_from(["quine_launcher", "run", "--start-hidden"]).unwrap();
    assert!(matches!(cli.command, Command::Run(args) if args.start_hidden));
}
