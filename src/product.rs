use crate::sign::SignatureScheme;

/// What differs between the monitored cloud products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: &'static str,
    pub namespace: &'static str,
    /// Endpoint table key of the resource-listing service.
    pub listing_service: &'static str,
    pub listing_action: &'static str,
    pub listing_scheme: SignatureScheme,
    pub items_field: &'static str,
    pub total_field: &'static str,
    pub offset_param: &'static str,
    pub limit_param: &'static str,
    pub first_page_size: usize,
    pub alias_fields: &'static [&'static str],
    pub default_alias: &'static str,
}

impl Product {
    /// Cloud database instances, listed through the header-signed API.
    pub fn cdb() -> Self {
        Self {
            name: "cdb",
            namespace: "QCE/CDB",
            listing_service: "cdb",
            listing_action: "DescribeDBInstances",
            listing_scheme: SignatureScheme::V3,
            items_field: "Items",
            total_field: "TotalCount",
            offset_param: "Offset",
            limit_param: "Limit",
            first_page_size: 2000,
            alias_fields: &["InstanceId", "InstanceName", "Vip"],
            default_alias: "InstanceId",
        }
    }

    /// VPC peering connections, listed through the legacy query-signed API.
    pub fn pcx() -> Self {
        Self {
            name: "pcx",
            namespace: "QCE/PCX",
            listing_service: "pcx",
            listing_action: "DescribeVpcPeeringConnections",
            listing_scheme: SignatureScheme::V2,
            items_field: "data",
            total_field: "totalCount",
            offset_param: "offset",
            limit_param: "limit",
            first_page_size: 50,
            alias_fields: &["peeringConnectionId", "peeringConnectionName", "vpcId", "peerVpcId"],
            default_alias: "peeringConnectionId",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cdb" => Some(Self::cdb()),
            "pcx" => Some(Self::pcx()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        self.name.to_ascii_uppercase()
    }

    pub fn is_listing_action(&self, action: &str) -> bool {
        action
            .get(..self.listing_action.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(self.listing_action))
            .unwrap_or(false)
    }

    /// Picks the requested alias when whitelisted, else the default.
    pub fn alias_field(&self, requested: Option<&str>) -> &'static str {
        requested
            .and_then(|alias| self.alias_fields.iter().find(|field| **field == alias))
            .copied()
            .unwrap_or(self.default_alias)
    }
}
