//! Remote API client for pulling collections.
//!
//! Each kind maps to one endpoint returning the envelope
//! `{isSuccess, message, data: [...]}`; a composite endpoint returns every
//! collection in one call. Empty `data` arrays are success; a missing or
//! malformed envelope is a validation failure, and network/server trouble
//! (including the bounded request timeout) is a fetch failure.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::entity::{
  Account, ClosingBalance, ExpiryItem, LedgerEntry, OutstandingBill, PriceEntry, SalePurchase,
  StockItem, SyncEntity, Template, User,
};
use crate::error::SyncError;

/// Network collaborator the sync engine pulls from.
///
/// Abstracted as a trait so tests can stand in a scripted fetcher.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
  /// Fetch the current rows of one collection.
  ///
  /// `year` is present exactly for partitioned kinds.
  async fn fetch<T: SyncEntity>(&self, user_id: i64, year: Option<&str>)
    -> Result<Vec<T>, SyncError>;

  /// Fetch every collection in one call (the composite endpoint).
  async fn fetch_bundle(&self, user_id: i64, year: &str) -> Result<SyncBundle, SyncError>;
}

/// Per-kind response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
  #[serde(rename = "isSuccess")]
  is_success: bool,
  #[serde(default)]
  message: String,
  data: Option<Vec<T>>,
}

/// Composite endpoint envelope.
#[derive(Debug, Deserialize)]
struct BundleEnvelope {
  status: String,
  #[serde(default)]
  message: String,
  data: Option<SyncBundle>,
}

/// Every collection for one `(user_id, year)`, as returned by the
/// composite endpoint. Absent collections deserialize as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncBundle {
  pub users: Vec<User>,
  pub accounts: Vec<Account>,
  pub closing_balances: Vec<ClosingBalance>,
  pub templates: Vec<Template>,
  pub stock: Vec<StockItem>,
  pub sale_purchase: Vec<SalePurchase>,
  pub ledger: Vec<LedgerEntry>,
  pub expiry: Vec<ExpiryItem>,
  pub price_data: Vec<PriceEntry>,
  pub outstanding: Vec<OutstandingBill>,
}

/// HTTP implementation of [`RemoteFetcher`].
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: Url,
}

impl RemoteClient {
  pub fn new(api: &ApiConfig) -> Result<Self, SyncError> {
    let mut base = api.url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base = Url::parse(&base)
      .map_err(|e| SyncError::Validation(format!("invalid API url '{}': {}", api.url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(api.timeout_secs))
      .build()
      .map_err(|e| SyncError::Fetch(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { http, base })
  }

  /// Issue a GET and parse the body, splitting errors into the taxonomy:
  /// transport/status problems are fetch failures, parse problems are
  /// validation failures.
  async fn get_json<E: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<E, SyncError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| SyncError::Validation(format!("invalid endpoint '{}': {}", path, e)))?;

    let response = self
      .http
      .get(url)
      .query(query)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          SyncError::Fetch(format!("request to {} timed out", path))
        } else {
          SyncError::Fetch(e.to_string())
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::Fetch(format!("{} returned {}", path, status)));
    }

    let body = response
      .text()
      .await
      .map_err(|e| SyncError::Fetch(e.to_string()))?;

    serde_json::from_str(&body)
      .map_err(|e| SyncError::Validation(format!("malformed {} response: {}", path, e)))
  }
}

#[async_trait]
impl RemoteFetcher for RemoteClient {
  async fn fetch<T: SyncEntity>(
    &self,
    user_id: i64,
    year: Option<&str>,
  ) -> Result<Vec<T>, SyncError> {
    let mut query = vec![("userId", user_id.to_string())];
    if let Some(year) = year {
      query.push(("year", year.to_string()));
    }

    let envelope: Envelope<T> = self.get_json(T::KIND.name(), &query).await?;
    if !envelope.is_success {
      return Err(SyncError::Fetch(format!(
        "server rejected {}: {}",
        T::KIND,
        envelope.message
      )));
    }

    envelope
      .data
      .ok_or_else(|| SyncError::Validation(format!("{} envelope is missing data", T::KIND)))
  }

  async fn fetch_bundle(&self, user_id: i64, year: &str) -> Result<SyncBundle, SyncError> {
    let query = [
      ("userId", user_id.to_string()),
      ("year", year.to_string()),
    ];

    let envelope: BundleEnvelope = self.get_json("syncall", &query).await?;
    if envelope.status != "success" {
      return Err(SyncError::Fetch(format!(
        "composite sync rejected: {}",
        envelope.message
      )));
    }

    envelope
      .data
      .ok_or_else(|| SyncError::Validation("composite envelope is missing data".to_string()))
  }
}
