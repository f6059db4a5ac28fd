//! Vision API key resolution tests
//!
//! Priority: database → DIVELOG_VISION_API_KEY → TOML `[vision] api_key`.
//!
//! Note: Uses serial_test to prevent ENV variable race conditions. Tests that
//! touch DIVELOG_VISION_API_KEY are marked with #[serial].

use divelog_ai::config::{resolve_vision_api_key, ServiceConfig, VISION_API_KEY_ENV};
use divelog_ai::db::init_in_memory_pool;
use divelog_ai::db::settings::{get_vision_api_key, set_vision_api_key};
use divelog_common::config::{TomlConfig, VisionSection};
use serial_test::serial;

fn toml_with_key(key: Option<&str>) -> TomlConfig {
    TomlConfig {
        vision: VisionSection {
            api_key: key.map(str::to_string),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    let pool = init_in_memory_pool().await.unwrap();
    set_vision_api_key(&pool, "db-key".to_string()).await.unwrap();
    std::env::set_var(VISION_API_KEY_ENV, "env-key");

    let result = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(result, "db-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_env_fallback_when_database_empty() {
    let pool = init_in_memory_pool().await.unwrap();
    std::env::set_var(VISION_API_KEY_ENV, "env-key");

    let result = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(result, "env-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_toml_fallback_when_db_and_env_empty() {
    std::env::remove_var(VISION_API_KEY_ENV);
    let pool = init_in_memory_pool().await.unwrap();

    let result = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(result, "toml-key");
}

#[tokio::test]
#[serial]
async fn test_blank_keys_are_skipped() {
    let pool = init_in_memory_pool().await.unwrap();
    set_vision_api_key(&pool, "   ".to_string()).await.unwrap();
    std::env::set_var(VISION_API_KEY_ENV, "");

    let result = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(result, "toml-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_error_when_no_key_found() {
    std::env::remove_var(VISION_API_KEY_ENV);
    let pool = init_in_memory_pool().await.unwrap();

    let err = resolve_vision_api_key(&pool, &toml_with_key(None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Vision API key not configured"));
    assert!(err.to_string().contains(VISION_API_KEY_ENV));
}

#[tokio::test]
async fn test_set_vision_key_round_trip() {
    let pool = init_in_memory_pool().await.unwrap();
    assert_eq!(get_vision_api_key(&pool).await.unwrap(), None);

    set_vision_api_key(&pool, "first".to_string()).await.unwrap();
    set_vision_api_key(&pool, "second".to_string()).await.unwrap();
    assert_eq!(get_vision_api_key(&pool).await.unwrap(), Some("second".to_string()));
}

#[test]
fn test_service_config_from_toml() {
    let config: TomlConfig = toml::from_str(
        r#"
        [vision]
        model = "gpt-4o-mini"
        timeout_secs = 10

        [batch]
        workers = 2
        max_retries = 1

        [prompts]
        default_profile = "logbook"
        "#,
    )
    .unwrap();

    let service = ServiceConfig::from_toml(&config);
    assert_eq!(service.vision.model, "gpt-4o-mini");
    assert_eq!(service.vision.timeout.as_secs(), 10);
    assert_eq!(service.batch.workers, 2);
    assert_eq!(service.batch.retry.max_retries, 1);
    assert_eq!(service.prompts.default_profile(), "logbook");
}
