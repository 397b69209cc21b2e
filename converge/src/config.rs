//! Deployment configuration.
//!
//! All declared infrastructure inputs live here: region, CIDR blocks, domain,
//! AMI, registrar credentials, and the tuning knobs for the certificate
//! waiter. Required values are checked up front so a misconfigured run fails
//! before any stage executes.

use crate::errors::ConvergeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable carrying the registrar API key.
pub const REGISTRAR_API_KEY_ENV: &str = "CONVERGE_REGISTRAR_API_KEY";
/// Environment variable carrying the registrar secret key.
pub const REGISTRAR_SECRET_KEY_ENV: &str = "CONVERGE_REGISTRAR_SECRET_KEY";

/// Top-level declared configuration for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Project name, used to tag and name resources.
    pub project: String,
    /// Target region.
    pub region: String,
    /// Apex domain served by the deployment.
    pub domain: String,
    /// Base URL of the resource-management API.
    pub provider_endpoint: String,
    /// Network layout.
    pub network: NetworkConfig,
    /// Security group rules.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Compute instance parameters.
    pub compute: ComputeConfig,
    /// Registrar access. Credentials may be left out of the file and
    /// supplied through the environment instead.
    #[serde(default)]
    pub registrar: RegistrarConfig,
    /// Certificate validation waiter tuning.
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// VPC and subnet layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// VPC CIDR block.
    pub vpc_cidr: String,
    /// Public subnet CIDRs, one subnet each.
    pub public_subnet_cidrs: Vec<String>,
    /// Private subnet CIDRs, one subnet each.
    #[serde(default)]
    pub private_subnet_cidrs: Vec<String>,
    /// Whether to provision a NAT gateway for the private subnets.
    #[serde(default = "default_true")]
    pub enable_nat: bool,
}

/// Ingress rules for the edge security group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// TCP ports open to the world.
    #[serde(default = "default_ingress_ports")]
    pub ingress_ports: Vec<u16>,
    /// CIDR allowed to reach SSH, if any.
    #[serde(default)]
    pub ssh_cidr: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ingress_ports: default_ingress_ports(),
            ssh_cidr: None,
        }
    }
}

/// Compute instance parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Machine image identifier.
    pub ami_id: String,
    /// Instance type.
    pub instance_type: String,
}

/// Registrar API access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// API key. Overridden by `CONVERGE_REGISTRAR_API_KEY` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Secret API key. Overridden by `CONVERGE_REGISTRAR_SECRET_KEY` when set.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Registrar API base URL.
    #[serde(default = "default_registrar_base_url")]
    pub base_url: String,
}

/// Certificate validation waiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum total wait for certificate issuance, in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// First poll interval, in seconds.
    #[serde(default = "default_initial_poll_secs")]
    pub initial_poll_secs: u64,
    /// Poll interval cap, in seconds.
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
            initial_poll_secs: default_initial_poll_secs(),
            max_poll_secs: default_max_poll_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ingress_ports() -> Vec<u16> {
    vec![80, 443]
}

fn default_registrar_base_url() -> String {
    "https://api.porkbun.com/api/json/v3".to_string()
}

const fn default_max_wait_secs() -> u64 {
    900
}

const fn default_initial_poll_secs() -> u64 {
    10
}

const fn default_max_poll_secs() -> u64 {
    60
}

impl DeploymentConfig {
    /// Loads configuration from a JSON file and applies environment
    /// overrides for the registrar credentials.
    pub fn load(path: &Path) -> Result<Self, ConvergeError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Pulls registrar credentials from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(REGISTRAR_API_KEY_ENV) {
            if !key.is_empty() {
                self.registrar.api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var(REGISTRAR_SECRET_KEY_ENV) {
            if !key.is_empty() {
                self.registrar.secret_key = Some(key);
            }
        }
    }

    /// Validates that every value a full apply needs is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::MissingConfig`] naming the first absent
    /// field. Called before any stage executes.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        let required = [
            ("project", self.project.trim().is_empty()),
            ("region", self.region.trim().is_empty()),
            ("domain", self.domain.trim().is_empty()),
            ("provider_endpoint", self.provider_endpoint.trim().is_empty()),
            ("network.vpc_cidr", self.network.vpc_cidr.trim().is_empty()),
            (
                "network.public_subnet_cidrs",
                self.network.public_subnet_cidrs.is_empty(),
            ),
            ("compute.ami_id", self.compute.ami_id.trim().is_empty()),
            (
                "compute.instance_type",
                self.compute.instance_type.trim().is_empty(),
            ),
        ];
        for (field, missing) in required {
            if missing {
                return Err(ConvergeError::MissingConfig {
                    field: field.to_string(),
                });
            }
        }

        if self.registrar.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConvergeError::MissingConfig {
                field: format!("registrar.api_key (or {REGISTRAR_API_KEY_ENV})"),
            });
        }
        if self.registrar.secret_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConvergeError::MissingConfig {
                field: format!("registrar.secret_key (or {REGISTRAR_SECRET_KEY_ENV})"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeploymentConfig {
        DeploymentConfig {
            project: "webstack".to_string(),
            region: "eu-west-1".to_string(),
            domain: "example.com".to_string(),
            provider_endpoint: "https://cloud.internal".to_string(),
            network: NetworkConfig {
                vpc_cidr: "10.0.0.0/16".to_string(),
                public_subnet_cidrs: vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
                private_subnet_cidrs: vec!["10.0.101.0/24".to_string()],
                enable_nat: true,
            },
            security: SecurityConfig::default(),
            compute: ComputeConfig {
                ami_id: "ami-0abc".to_string(),
                instance_type: "t3.micro".to_string(),
            },
            registrar: RegistrarConfig {
                api_key: Some("pk".to_string()),
                secret_key: Some("sk".to_string()),
                base_url: default_registrar_base_url(),
            },
            validation: ValidationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_missing_domain_fails_fast() {
        let mut config = sample();
        config.domain = String::new();
        let err = config.validate().expect_err("should fail");
        assert!(matches!(err, ConvergeError::MissingConfig { field } if field == "domain"));
    }

    #[test]
    fn test_missing_public_subnets_fails() {
        let mut config = sample();
        config.network.public_subnet_cidrs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_registrar_credentials_fail() {
        let mut config = sample();
        config.registrar.api_key = None;
        let err = config.validate().expect_err("should fail");
        assert!(err.to_string().contains("registrar.api_key"));
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let raw = serde_json::json!({
            "project": "webstack",
            "region": "eu-west-1",
            "domain": "example.com",
            "provider_endpoint": "https://cloud.internal",
            "network": {
                "vpc_cidr": "10.0.0.0/16",
                "public_subnet_cidrs": ["10.0.1.0/24"]
            },
            "compute": { "ami_id": "ami-0abc", "instance_type": "t3.micro" }
        });
        let config: DeploymentConfig = serde_json::from_value(raw).expect("parse");
        assert_eq!(config.security.ingress_ports, vec![80, 443]);
        assert!(config.network.enable_nat);
        assert_eq!(config.validation.max_wait_secs, 900);
        assert_eq!(config.validation.initial_poll_secs, 10);
        assert!(config.registrar.base_url.contains("porkbun"));
    }
}
