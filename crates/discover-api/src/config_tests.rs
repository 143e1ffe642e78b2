//! Tests for service configuration.

use super::*;
use discover_core::OrganizationDirectory;
use serial_test::serial;
use std::io::Write;

fn organization(slug: &str) -> OrganizationConfig {
    OrganizationConfig {
        slug: slug.to_string(),
        name: String::new(),
        projects: vec![1, 2],
        features: vec![DISCOVER_FEATURE.to_string()],
    }
}

#[test]
fn test_defaults_are_valid() {
    let config = ServiceConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.discover.feature, "organizations:discover");
    assert_eq!(config.limits(), QueryLimits::default());
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
server:
  port: 9090
discover:
  default_limit: 100
organizations:
  - slug: acme
    projects: [1, 2]
    features: ["organizations:discover"]
"#;
    let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.discover.default_limit, 100);
    assert_eq!(config.discover.max_limit, 1000);
    assert_eq!(config.organizations.len(), 1);
    assert!(config.validate().is_ok());
}

#[test]
fn test_rejects_zero_limit() {
    let mut config = ServiceConfig::default();
    config.discover.default_limit = 0;

    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_rejects_default_limit_above_max() {
    let mut config = ServiceConfig::default();
    config.discover.default_limit = 500;
    config.discover.max_limit = 100;

    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_rejects_invalid_slug() {
    let mut config = ServiceConfig::default();
    config.organizations.push(organization("Not A Slug"));

    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_rejects_duplicate_organizations() {
    let mut config = ServiceConfig::default();
    config.organizations.push(organization("acme"));
    config.organizations.push(organization("acme"));

    assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_rejects_empty_feature() {
    let mut config = ServiceConfig::default();
    config.discover.feature = " ".to_string();

    assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));
}

#[tokio::test]
async fn test_organization_directory_from_config() {
    let mut config = ServiceConfig::default();
    config.organizations.push(organization("acme"));

    let directory = config.organization_directory().unwrap();
    let found = directory
        .get_organization(&OrganizationSlug::new("acme").unwrap())
        .await
        .unwrap();

    assert_eq!(found.name, "acme");
    assert!(found.owns_project(ProjectId::new(2)));
    assert!(found.has_feature(DISCOVER_FEATURE));
}

#[test]
#[serial]
fn test_load_from_explicit_file_and_environment() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "server:\n  port: 9191\nlogging:\n  json_format: true\norganizations:\n  - slug: acme\n    projects: [3]"
    )
    .unwrap();

    std::env::set_var(CONFIG_FILE_ENV, file.path());
    std::env::set_var("DISCOVER__DISCOVER__DEFAULT_LIMIT", "25");

    let loaded = ServiceConfig::load();

    std::env::remove_var(CONFIG_FILE_ENV);
    std::env::remove_var("DISCOVER__DISCOVER__DEFAULT_LIMIT");

    let config = loaded.unwrap();
    assert_eq!(config.server.port, 9191);
    assert!(config.logging.json_format);
    assert_eq!(config.discover.default_limit, 25);
    assert_eq!(config.organizations[0].projects, vec![3]);
}

#[test]
#[serial]
fn test_load_fails_for_missing_explicit_file() {
    std::env::set_var(CONFIG_FILE_ENV, "/nonexistent/discover/service.yaml");

    let loaded = ServiceConfig::load();

    std::env::remove_var(CONFIG_FILE_ENV);
    assert!(matches!(loaded, Err(ConfigError::Loading(_))));
}
