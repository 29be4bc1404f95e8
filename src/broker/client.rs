//! HTTP implementation of the broker adapter.
//!
//! [`IiflBroker`] wraps [`reqwest::Client`] and speaks the head/body
//! envelope protocol from [`crate::broker::wire`]. Error classification
//! follows the adapter contract: 401 invalidates the session and replays
//! once after re-authentication, 429 and 5xx surface as transient, other
//! 4xx as permanent, and I/O timeouts as timeouts. Placement is one-shot —
//! retry policy lives in the dispatcher.
//!
//! [`IiflAuthClient`] is the login path; the credential vault drives it and
//! caches the resulting sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::broker::adapter::*;
use crate::broker::wire::*;
use crate::config::CoreConfig;
use crate::constants::{head_defaults, request_codes};
use crate::error::BrokerError;
use crate::session::{BrokerCredentials, BrokerSession, CredentialVault, SessionAuthenticator};
use crate::types::enums::*;

// Endpoint paths under the configured base URL.
const LOGIN_PATH: &str = "/V2/LoginRequestForVendor";
const ORDER_PATH: &str = "/V1/OrderRequest";
const ORDER_STATUS_PATH: &str = "/V1/OrderStatus";
const ORDER_BOOK_PATH: &str = "/V2/OrderBook";
const NET_POSITION_PATH: &str = "/V2/NetPositionNetWise";
const MARGIN_PATH: &str = "/V3/Margin";

/// Backstop timeout on every broker HTTP call; pipeline deadlines are
/// enforced above this layer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback session lifetime when the login response carries no validity.
const DEFAULT_TOKEN_LIFETIME_HOURS: i64 = 24;

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(100)
        .build()
        .expect("failed to build reqwest client")
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout(REQUEST_TIMEOUT)
    } else {
        BrokerError::Transient {
            status: 0,
            message: format!("transport: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth client
// ---------------------------------------------------------------------------

/// The vendor login path. Owned by the credential vault; the vault seals
/// the credentials and caches the sessions this client produces.
pub struct IiflAuthClient {
    http: reqwest::Client,
    base_url: String,
    public_ip: String,
}

impl IiflAuthClient {
    /// Build an auth client against the configured endpoint.
    pub fn new(cfg: &CoreConfig) -> Self {
        Self {
            http: build_http(),
            base_url: cfg.effective_base_url().trim_end_matches('/').to_owned(),
            public_ip: "127.0.0.1".to_owned(),
        }
    }

    /// Set the origin IP reported to the broker.
    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = ip.into();
        self
    }
}

#[async_trait]
impl SessionAuthenticator for IiflAuthClient {
    async fn authenticate(
        &self,
        account: &str,
        creds: &BrokerCredentials,
    ) -> Result<BrokerSession, BrokerError> {
        let envelope = Envelope {
            head: RequestHead {
                request_code: request_codes::LOGIN.to_owned(),
                key: creds.api_key.clone(),
                app_ver: head_defaults::APP_VER.to_owned(),
                app_name: head_defaults::APP_NAME.to_owned(),
                os_name: head_defaults::OS_NAME.to_owned(),
                user_id: creds.user_id.clone(),
                password: creds.password.clone(),
            },
            body: LoginRequestBody {
                client_code: creds.client_code.clone(),
                password: creds.password.clone(),
                local_ip: "127.0.0.1".to_owned(),
                public_ip: self.public_ip.clone(),
                connection_type: "1".to_owned(),
            },
        };

        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        tracing::debug!(%url, account, "POST login");

        let resp = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                BrokerError::AuthTransient(format!("login transport failed: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(if status.as_u16() == 401 || status.as_u16() == 403 {
                BrokerError::InvalidCredentials(format!("login rejected with HTTP {status}"))
            } else {
                BrokerError::AuthTransient(format!("login returned HTTP {status}"))
            });
        }

        let envelope: ResponseEnvelope<LoginResponseBody> = resp
            .json()
            .await
            .map_err(|e| BrokerError::AuthTransient(format!("login decode failed: {e}")))?;

        if envelope.head.status != 0 {
            return Err(BrokerError::AuthTransient(format!(
                "login refused by gateway: {}",
                envelope.head.status_description
            )));
        }
        match envelope.body.status {
            0 => {}
            1 => {
                return Err(BrokerError::InvalidCredentials(envelope.body.message));
            }
            _ => {
                return Err(BrokerError::AuthTransient(envelope.body.message));
            }
        }

        let expires_at = envelope
            .body
            .token_validity
            .map(|d| d.0)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(DEFAULT_TOKEN_LIFETIME_HOURS));

        Ok(BrokerSession {
            account: account.to_owned(),
            client_code: if envelope.body.client_code.is_empty() {
                creds.client_code.clone()
            } else {
                envelope.body.client_code
            },
            user_id: creds.user_id.clone(),
            password: creds.password.clone(),
            api_key: creds.api_key.clone(),
            token: envelope.body.token,
            expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Broker adapter
// ---------------------------------------------------------------------------

/// Production [`BrokerAdapter`] over the broker's HTTPS gateway.
pub struct IiflBroker {
    http: reqwest::Client,
    base_url: String,
    vault: Arc<CredentialVault>,
    public_ip: String,
    /// Internal order sequence carried in the placement body.
    order_seq: AtomicI64,
}

impl IiflBroker {
    /// Build a broker client against the configured endpoint.
    pub fn new(cfg: &CoreConfig, vault: Arc<CredentialVault>) -> Self {
        Self {
            http: build_http(),
            base_url: cfg.effective_base_url().trim_end_matches('/').to_owned(),
            vault,
            public_ip: "127.0.0.1".to_owned(),
            order_seq: AtomicI64::new(1),
        }
    }

    /// Set the origin IP reported in order bodies.
    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = ip.into();
        self
    }

    fn head(&self, session: &BrokerSession, request_code: &str) -> RequestHead {
        RequestHead {
            request_code: request_code.to_owned(),
            key: session.api_key.clone(),
            app_ver: head_defaults::APP_VER.to_owned(),
            app_name: head_defaults::APP_NAME.to_owned(),
            os_name: head_defaults::OS_NAME.to_owned(),
            user_id: session.user_id.clone(),
            password: session.password.clone(),
        }
    }

    /// One POST of an envelope, with the contract's status classification.
    async fn post_envelope<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        session: &BrokerSession,
        envelope: &Envelope<B>,
    ) -> BrokerResult<R> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "POST");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&session.token)
            .json(envelope)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.unwrap_or_default();

        match status {
            200..=299 => {}
            401 => {
                return Err(BrokerError::Permanent {
                    status: 401,
                    message: "unauthorized".into(),
                });
            }
            429 => {
                return Err(BrokerError::Transient {
                    status,
                    message: "rate limited".into(),
                });
            }
            500..=599 => {
                return Err(BrokerError::Transient {
                    status,
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            _ => {
                return Err(BrokerError::Permanent {
                    status,
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
        }

        let envelope: ResponseEnvelope<R> =
            serde_json::from_slice(&bytes).map_err(|e| BrokerError::Permanent {
                status,
                message: format!("undecodable response: {e}"),
            })?;

        if envelope.head.status != 0 {
            return Err(BrokerError::Permanent {
                status,
                message: envelope.head.status_description,
            });
        }
        Ok(envelope.body)
    }

    /// Run a call; on 401, invalidate the session, re-authenticate once
    /// through the vault, and replay once with the fresh session.
    async fn call_with_reauth<B: Serialize, R: DeserializeOwned>(
        &self,
        request_code: &str,
        path: &str,
        session: &BrokerSession,
        build_body: impl Fn(&BrokerSession) -> B,
    ) -> BrokerResult<R> {
        let envelope = Envelope {
            head: self.head(session, request_code),
            body: build_body(session),
        };
        match self.post_envelope(path, session, &envelope).await {
            Err(BrokerError::Permanent { status: 401, .. }) => {
                tracing::debug!(account = %session.account, "401 from broker, re-authenticating");
                self.vault.invalidate(&session.account).await;
                let fresh = self.vault.session(&session.account).await?;
                let envelope = Envelope {
                    head: self.head(&fresh, request_code),
                    body: build_body(&fresh),
                };
                self.post_envelope(path, &fresh, &envelope).await
            }
            other => other,
        }
    }

    fn build_order_body(&self, session: &BrokerSession, order: &PlaceOrder) -> OrderRequestBody {
        OrderRequestBody {
            client_code: session.client_code.clone(),
            order_for: "P".to_owned(),
            exchange: order.exchange.wire_code().to_owned(),
            exchange_type: order.segment.wire_code().to_owned(),
            price: order.price.unwrap_or(0.0),
            order_id: self.order_seq.fetch_add(1, Ordering::Relaxed),
            order_type: order.side.as_str().to_owned(),
            qty: order.quantity,
            order_date_time: BracketDate::now(),
            scrip_code: order.scrip_code,
            at_market: order.order_type.is_market(),
            remote_order_id: order.idempotency_token.clone(),
            exch_order_id: "0".to_owned(),
            dis_qty: 0,
            is_stop_loss_order: order.order_type.is_stop(),
            stop_loss_price: order.trigger_price.unwrap_or(0.0),
            is_vtd: order.validity == Validity::GTD,
            ioc_order: order.validity == Validity::IOC,
            is_intraday: order.product == ProductType::INTRADAY,
            public_ip: self.public_ip.clone(),
            ah_placed: "N".to_owned(),
            valid_till_date: BracketDate(Utc::now() + chrono::Duration::days(1)),
            i_order_validity: order.validity.wire_code(),
            order_requester_code: session.client_code.clone(),
            traded_qty: 0,
        }
    }
}

fn ack_from_book_row(row: &OrderBookDetail) -> StatusAck {
    StatusAck {
        broker_order_id: row.broker_order_id.to_string(),
        exchange_order_id: none_if_zero(&row.exch_order_id),
        status: map_broker_status(&row.order_status),
        traded_qty: row.traded_qty,
        avg_trade_price: (row.avg_rate > 0.0).then_some(row.avg_rate),
        message: row.reason.clone(),
    }
}

fn none_if_zero(exch_order_id: &str) -> Option<String> {
    match exch_order_id {
        "" | "0" => None,
        other => Some(other.to_owned()),
    }
}

#[async_trait]
impl BrokerAdapter for IiflBroker {
    async fn place(&self, session: &BrokerSession, order: &PlaceOrder) -> BrokerResult<PlaceAck> {
        let body: OrderResponseBody = self
            .call_with_reauth(
                request_codes::ORDER_REQUEST,
                ORDER_PATH,
                session,
                |sess| self.build_order_body(sess, order),
            )
            .await?;

        let status = match body.status {
            0 => OrderStatus::SUBMITTED,
            1 => OrderStatus::REJECTED,
            _ => OrderStatus::UNKNOWN,
        };
        Ok(PlaceAck {
            broker_order_id: body.broker_order_id.to_string(),
            exchange_order_id: none_if_zero(&body.exch_order_id),
            status,
            message: body.message,
        })
    }

    async fn status(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck> {
        let body: OrderStatusResponseBody = self
            .call_with_reauth(
                request_codes::ORDER_STATUS,
                ORDER_STATUS_PATH,
                session,
                |sess| OrderStatusRequestBody {
                    client_code: sess.client_code.clone(),
                    broker_order_id: broker_order_id.to_owned(),
                },
            )
            .await?;

        Ok(StatusAck {
            broker_order_id: body.broker_order_id.to_string(),
            exchange_order_id: none_if_zero(&body.exch_order_id),
            status: map_broker_status(&body.status),
            traded_qty: body.traded_qty,
            avg_trade_price: (body.avg_rate > 0.0).then_some(body.avg_rate),
            message: body.message,
        })
    }

    async fn status_by_token(
        &self,
        session: &BrokerSession,
        token: &str,
    ) -> BrokerResult<Option<StatusAck>> {
        let body: OrderBookBody = self
            .call_with_reauth(
                request_codes::ORDER_BOOK,
                ORDER_BOOK_PATH,
                session,
                |sess| OrderBookRequestBody {
                    client_code: sess.client_code.clone(),
                },
            )
            .await?;

        Ok(body
            .orders
            .iter()
            .find(|row| row.remote_order_id == token)
            .map(ack_from_book_row))
    }

    async fn modify(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
        diff: &OrderDiff,
    ) -> BrokerResult<StatusAck> {
        let body: OrderResponseBody = self
            .call_with_reauth(
                request_codes::ORDER_REQUEST,
                ORDER_PATH,
                session,
                |sess| ModifyRequestBody {
                    client_code: sess.client_code.clone(),
                    broker_order_id: broker_order_id.to_owned(),
                    qty: diff.quantity,
                    price: diff.price,
                    stop_loss_price: diff.trigger_price,
                },
            )
            .await?;

        Ok(StatusAck {
            broker_order_id: body.broker_order_id.to_string(),
            exchange_order_id: none_if_zero(&body.exch_order_id),
            status: if body.status == 0 {
                OrderStatus::SUBMITTED
            } else {
                OrderStatus::UNKNOWN
            },
            traded_qty: 0,
            avg_trade_price: None,
            message: body.message,
        })
    }

    async fn cancel(
        &self,
        session: &BrokerSession,
        broker_order_id: &str,
    ) -> BrokerResult<StatusAck> {
        let body: OrderResponseBody = self
            .call_with_reauth(
                request_codes::ORDER_REQUEST,
                ORDER_PATH,
                session,
                |sess| CancelRequestBody {
                    client_code: sess.client_code.clone(),
                    broker_order_id: broker_order_id.to_owned(),
                },
            )
            .await?;

        Ok(StatusAck {
            broker_order_id: body.broker_order_id.to_string(),
            exchange_order_id: none_if_zero(&body.exch_order_id),
            status: if body.status == 0 {
                OrderStatus::CANCELLED
            } else {
                OrderStatus::UNKNOWN
            },
            traded_qty: 0,
            avg_trade_price: None,
            message: body.message,
        })
    }

    async fn positions(&self, session: &BrokerSession) -> BrokerResult<Vec<PositionSnapshot>> {
        let body: NetPositionBody = self
            .call_with_reauth(
                request_codes::NET_POSITION,
                NET_POSITION_PATH,
                session,
                |sess| NetPositionRequestBody {
                    client_code: sess.client_code.clone(),
                },
            )
            .await?;

        Ok(body
            .positions
            .into_iter()
            .filter_map(|p| {
                let exchange = Exchange::from_wire_code(&p.exch)?;
                Some(PositionSnapshot {
                    symbol: p.scrip_name,
                    exchange,
                    net_qty: p.net_qty,
                    last_price: p.ltp,
                })
            })
            .collect())
    }

    async fn balance(&self, session: &BrokerSession) -> BrokerResult<BalanceSnapshot> {
        let body: MarginBody = self
            .call_with_reauth(request_codes::MARGIN, MARGIN_PATH, session, |sess| {
                MarginRequestBody {
                    client_code: sess.client_code.clone(),
                }
            })
            .await?;

        Ok(BalanceSnapshot {
            available: body.available_margin,
            utilized: body.utilized_margin,
        })
    }

    async fn ping(&self) -> BrokerResult<Duration> {
        let started = Instant::now();
        self.http
            .get(&self.base_url)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(started.elapsed())
    }
}
