use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
    RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::GatewayConfig,
    data_objects::{StripeCharge, StripeList, StripeRefund, StripeTransfer, TransferRequest},
    GatewayApiError,
};

/// A thin client over the gateway's REST API. Calls made on behalf of a connected account pass its id, which is sent
/// in the `Stripe-Account` header.
#[derive(Clone)]
pub struct StripeApi {
    config: GatewayConfig,
    client: Arc<Client>,
}

impl StripeApi {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayApiError> {
        let mut headers = HeaderMap::with_capacity(1);
        let bearer = format!("Bearer {}", config.api_key.reveal());
        let mut val = HeaderValue::from_str(&bearer).map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        val.set_sensitive(true);
        headers.insert("Authorization", val);
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    fn request(&self, method: Method, path: &str, account: Option<&str>) -> Result<RequestBuilder, GatewayApiError> {
        let url = self.url(path);
        trace!("Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url);
        if let Some(account) = account {
            let val = HeaderValue::from_str(account).map_err(|e| GatewayApiError::RestRequestError(e.to_string()))?;
            req = req.header("Stripe-Account", val);
        }
        Ok(req)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GatewayApiError> {
        let response = req.send().await.map_err(|e| GatewayApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| GatewayApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| GatewayApiError::RestResponseError(e.to_string()))?;
            Err(GatewayApiError::QueryError { status, message })
        }
    }

    pub async fn rest_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        account: Option<&str>,
    ) -> Result<T, GatewayApiError> {
        let mut req = self.request(method, path, account)?;
        if !params.is_empty() {
            req = req.query(params);
        }
        self.send(req).await
    }

    /// POSTs a form-encoded body. The gateway replays the stored response for a repeated `idempotency_key`.
    pub async fn rest_post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        account: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayApiError> {
        let mut req = self.request(Method::POST, path, account)?.form(body);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        self.send(req).await
    }

    /// Fetches a charge with its balance transaction expanded.
    pub async fn retrieve_charge(
        &self,
        charge_id: &str,
        account: Option<&str>,
    ) -> Result<StripeCharge, GatewayApiError> {
        let path = format!("/v1/charges/{charge_id}");
        debug!("Fetching charge {charge_id}");
        let params = [("expand[]", "balance_transaction")];
        let charge = self.rest_query::<StripeCharge>(Method::GET, &path, &params, account).await?;
        info!("Fetched charge {charge_id} for {} {}", charge.amount, charge.currency);
        Ok(charge)
    }

    /// Every refund issued against a charge, newest first.
    pub async fn list_refunds(
        &self,
        charge_id: &str,
        account: Option<&str>,
    ) -> Result<Vec<StripeRefund>, GatewayApiError> {
        let limit = self.config.refund_page_size.to_string();
        let mut refunds = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![("charge", charge_id), ("limit", limit.as_str())];
            if let Some(after) = cursor.as_deref() {
                params.push(("starting_after", after));
            }
            let page = self.rest_query::<StripeList<StripeRefund>>(Method::GET, "/v1/refunds", &params, account).await?;
            let has_more = page.has_more;
            cursor = page.data.last().map(|r| r.id.clone());
            refunds.extend(page.data);
            if !has_more || cursor.is_none() {
                break;
            }
        }
        debug!("Charge {charge_id} has {} refunds", refunds.len());
        Ok(refunds)
    }

    pub async fn create_transfer(&self, transfer: &TransferRequest) -> Result<StripeTransfer, GatewayApiError> {
        let key = transfer.idempotency_key();
        debug!("Transferring {} {} to {}", transfer.amount, transfer.currency, transfer.destination);
        let result = self.rest_post::<StripeTransfer, _>("/v1/transfers", transfer, None, Some(&key)).await?;
        info!("Transfer {} of {} {} to {} created", result.id, result.amount, result.currency, result.destination);
        Ok(result)
    }
}
