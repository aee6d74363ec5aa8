use std::collections::HashMap;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::{ConnectorError, Result};

/// Restricted-access regions served from dedicated hosts.
pub const FINANCE_REGIONS: &[&str] = &["ap-shanghai-fsi", "ap-shenzhen-fsi"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub service_id: String,
    pub api_version: String,
    pub host: String,
    pub path: String,
}

struct DefaultEntry {
    service_id: &'static str,
    api_version: &'static str,
    host: &'static str,
    path: &'static str,
}

struct Override {
    host: String,
    path: String,
}

lazy_static! {
    static ref DEFAULTS: HashMap<&'static str, DefaultEntry> = {
        let mut m = HashMap::new();
        m.insert("cvm", DefaultEntry {
            service_id: "cvm",
            api_version: "2017-03-12",
            host: "cvm.tencentcloudapi.com",
            path: "/cvm",
        });
        m.insert("cdb", DefaultEntry {
            service_id: "cdb",
            api_version: "2017-03-20",
            host: "cdb.tencentcloudapi.com",
            path: "/cdb",
        });
        m.insert("monitor", DefaultEntry {
            service_id: "monitor",
            api_version: "2018-07-24",
            host: "monitor.tencentcloudapi.com",
            path: "/monitor",
        });
        // Legacy query-signed API; the version is carried by the path.
        m.insert("pcx", DefaultEntry {
            service_id: "vpc",
            api_version: "2017-03-12",
            host: "vpc.api.qcloud.com",
            path: "/v2/index.php",
        });
        m
    };

    // service -> region -> override
    static ref FINANCE_OVERRIDES: HashMap<&'static str, HashMap<&'static str, Override>> = {
        let mut m = HashMap::new();
        for service in ["cvm", "cdb", "monitor"] {
            let mut regions = HashMap::new();
            for (region, city) in [("ap-shanghai-fsi", "shanghai"), ("ap-shenzhen-fsi", "shenzhen")] {
                regions.insert(region, Override {
                    host: format!("{}.{}.tencentcloudapi.com", service, region),
                    path: format!("/fsi/{}/{}", service, city),
                });
            }
            m.insert(service, regions);
        }
        m
    };
}

pub fn is_finance_region(region: &str) -> bool {
    FINANCE_REGIONS.contains(&region)
}

/// Maps (region, service) to the endpoint that serves it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointResolver;

impl EndpointResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, region: &str, service: &str) -> Result<ServiceEndpoint> {
        let default = DEFAULTS.get(service).ok_or_else(|| {
            ConnectorError::Configuration(format!("No endpoint configured for service '{}'", service))
        })?;

        let mut endpoint = ServiceEndpoint {
            service_id: default.service_id.to_string(),
            api_version: default.api_version.to_string(),
            host: default.host.to_string(),
            path: default.path.to_string(),
        };

        if is_finance_region(region) {
            if let Some(over) = FINANCE_OVERRIDES
                .get(service)
                .and_then(|regions| regions.get(region))
            {
                endpoint.host = over.host.clone();
                endpoint.path = over.path.clone();
            }
        }

        Ok(endpoint)
    }
}
