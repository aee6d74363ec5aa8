use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    client::ApiClient,
    metrics,
    models::{ListingPage, ResolvedInstance},
    product::Product,
    ConnectorError, Result,
};

/// Largest page requested when fanning out the rest of a listing.
pub const MAX_PAGE_SIZE: usize = 2000;

/// `(offset, limit)` windows covering `start..total`, at most `max` wide.
pub fn page_windows(start: usize, total: usize, max: usize) -> Vec<(usize, usize)> {
    if max == 0 {
        return Vec::new();
    }
    (start..total)
        .step_by(max)
        .map(|offset| (offset, max.min(total - offset)))
        .collect()
}

/// Fetches a product's full resource listing across offset/limit pages.
pub struct PaginatedLister<'a> {
    client: &'a ApiClient,
    product: &'a Product,
    max_page_size: usize,
}

impl<'a> PaginatedLister<'a> {
    pub fn new(client: &'a ApiClient, product: &'a Product) -> Self {
        Self {
            client,
            product,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub async fn fetch_page(&self, region: &str, offset: usize, limit: usize) -> Result<ListingPage> {
        let mut payload = Map::new();
        payload.insert(self.product.offset_param.to_string(), Value::from(offset));
        payload.insert(self.product.limit_param.to_string(), Value::from(limit));

        let envelope = self
            .client
            .call_checked(
                self.product.listing_scheme,
                self.product.listing_service,
                self.product.listing_action,
                region,
                Value::Object(payload),
            )
            .await?;

        let items = envelope
            .get(self.product.items_field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_object().cloned().map(ResolvedInstance::new))
                    .collect()
            })
            .unwrap_or_default();
        let total_count = envelope
            .get(self.product.total_field)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        Ok(ListingPage {
            items,
            total_count,
            offset,
            limit,
        })
    }

    /// A failure on the first page is returned to the caller. A failure on any
    /// later page drops that page and the rest of the listing is kept.
    pub async fn list_all(&self, region: &str, page_size: usize) -> Result<Vec<ResolvedInstance>> {
        let first = self.fetch_page(region, 0, page_size).await?;
        let total = first.total_count;
        let mut items = first.items;

        if items.len() >= total {
            debug!("Listing in '{}' complete after one page ({} items)", region, items.len());
            return Ok(items);
        }

        let windows = page_windows(items.len(), total, self.max_page_size);
        info!(
            "Listing in '{}': {} of {} items, fetching {} more pages",
            region,
            items.len(),
            total,
            windows.len()
        );

        let pages = join_all(
            windows
                .iter()
                .map(|(offset, limit)| self.fetch_page(region, *offset, *limit)),
        )
        .await;

        let mut lost = 0;
        for ((offset, limit), page) in windows.iter().zip(pages) {
            match page {
                Ok(page) => items.extend(page.items),
                Err(e) => {
                    lost += 1;
                    warn!("Dropping listing page offset={} limit={}: {}", offset, limit, e);
                }
            }
        }

        if lost > 0 {
            metrics::record_partial_listing();
            warn!(
                "{}",
                ConnectorError::PartialListing {
                    fetched: items.len(),
                    total,
                }
            );
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::Credentials;
    use crate::transport::testing::FakeTransport;
    use crate::transport::{HttpRequest, TransportError};

    fn cdb_listing(total: usize, failing_offset: Option<usize>) -> FakeTransport {
        FakeTransport::new(move |request: &HttpRequest| {
            let body: Value = serde_json::from_str(&request.body).unwrap();
            let offset = body["Offset"].as_u64().unwrap() as usize;
            let limit = body["Limit"].as_u64().unwrap() as usize;
            if Some(offset) == failing_offset {
                return Err(TransportError::new("Gateway Timeout"));
            }
            let items: Vec<Value> = (offset..total.min(offset + limit))
                .map(|i| json!({"InstanceId": format!("cdb-{}", i)}))
                .collect();
            Ok(json!({"Response": {"Items": items, "TotalCount": total}}))
        })
    }

    fn ids(items: &[ResolvedInstance]) -> Vec<String> {
        items
            .iter()
            .map(|item| item.field_string("InstanceId").unwrap())
            .collect()
    }

    #[test]
    fn windows_cover_total_with_bounded_pages() {
        assert_eq!(
            page_windows(0, 5000, 2000),
            vec![(0, 2000), (2000, 2000), (4000, 1000)]
        );
        assert_eq!(page_windows(50, 120, 2000), vec![(50, 70)]);
        assert!(page_windows(10, 10, 2000).is_empty());
        assert!(page_windows(0, 10, 0).is_empty());
    }

    #[tokio::test]
    async fn single_page_listing_makes_one_call() {
        let transport = Arc::new(cdb_listing(3, None));
        let client = ApiClient::new(transport.clone(), Credentials::default());
        let product = Product::cdb();

        let items = PaginatedLister::new(&client, &product)
            .list_all("ap-guangzhou", 2000)
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn remaining_pages_are_fetched_and_kept_in_order() {
        let transport = Arc::new(cdb_listing(7, None));
        let client = ApiClient::new(transport.clone(), Credentials::default());
        let product = Product::cdb();

        let items = PaginatedLister::new(&client, &product)
            .with_max_page_size(2)
            .list_all("ap-guangzhou", 1)
            .await
            .unwrap();
        assert_eq!(
            ids(&items),
            (0..7).map(|i| format!("cdb-{}", i)).collect::<Vec<_>>()
        );
        assert_eq!(transport.request_count(), 4);
    }

    #[test_log::test(tokio::test)]
    async fn failed_later_page_is_dropped() {
        // first page [0], parallel pages [1,2] [3,4] [5,6]; the middle one fails
        let transport = Arc::new(cdb_listing(7, Some(3)));
        let client = ApiClient::new(transport, Credentials::default());
        let product = Product::cdb();

        let items = PaginatedLister::new(&client, &product)
            .with_max_page_size(2)
            .list_all("ap-guangzhou", 1)
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["cdb-0", "cdb-1", "cdb-2", "cdb-5", "cdb-6"]);
    }

    #[tokio::test]
    async fn failed_first_page_is_an_error() {
        let transport = Arc::new(cdb_listing(7, Some(0)));
        let client = ApiClient::new(transport, Credentials::default());
        let product = Product::cdb();

        let err = PaginatedLister::new(&client, &product)
            .list_all("ap-guangzhou", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Transport(_)));
    }

    #[tokio::test]
    async fn legacy_listing_reads_lowercase_envelope() {
        let transport = Arc::new(FakeTransport::new(|request: &HttpRequest| {
            assert_eq!(request.query_param("offset"), Some("0"));
            assert_eq!(request.query_param("limit"), Some("50"));
            Ok(json!({"code": 0, "totalCount": 1, "data": [{"peeringConnectionId": "pcx-1"}]}))
        }));
        let client = ApiClient::new(transport, Credentials::default());
        let product = Product::pcx();

        let page = PaginatedLister::new(&client, &product)
            .fetch_page("ap-guangzhou", 0, 50)
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(
            page.items[0].field_string("peeringConnectionId").as_deref(),
            Some("pcx-1")
        );
    }
}
