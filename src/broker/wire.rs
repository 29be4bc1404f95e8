//! Wire types for the broker's envelope protocol.
//!
//! Every request is a `{head, body}` envelope. Field names and declaration
//! order are reproduced exactly as the broker publishes them — `serde_json`
//! serializes struct fields in declaration order, which the broker's gateway
//! relies on for some endpoints. Timestamps travel as bracket-encoded
//! millisecond epochs (`/Date(1718000000000)/`), handled by [`BracketDate`].

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Bracket-encoded timestamps
// ---------------------------------------------------------------------------

/// A timestamp serialized as `/Date(<millisecond epoch>)/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BracketDate(pub DateTime<Utc>);

impl BracketDate {
    /// The current instant.
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl Serialize for BracketDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("/Date({})/", self.0.timestamp_millis()))
    }
}

impl<'de> Deserialize<'de> for BracketDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let millis = raw
            .strip_prefix("/Date(")
            .and_then(|s| s.strip_suffix(")/"))
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| de::Error::custom(format!("malformed bracket date: {raw:?}")))?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .ok_or_else(|| de::Error::custom(format!("out-of-range bracket date: {millis}")))
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Request envelope wrapping every broker call.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<B> {
    pub head: RequestHead,
    pub body: B,
}

/// Request header. The broker authenticates and routes on these fields.
#[derive(Debug, Clone, Serialize)]
pub struct RequestHead {
    #[serde(rename = "requestCode")]
    pub request_code: String,
    #[serde(rename = "key")]
    pub key: String,
    #[serde(rename = "appVer")]
    pub app_ver: String,
    #[serde(rename = "appName")]
    pub app_name: String,
    #[serde(rename = "osName")]
    pub os_name: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "password")]
    pub password: String,
}

/// Response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope<B> {
    pub head: ResponseHead,
    pub body: B,
}

/// Response header. `status == 0` means the gateway accepted the request;
/// anything else carries a description in `status_description`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseHead {
    #[serde(rename = "responseCode", default)]
    pub response_code: String,
    #[serde(rename = "status")]
    pub status: i32,
    #[serde(rename = "statusDescription", default)]
    pub status_description: String,
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Body of the vendor login request.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "LocalIP")]
    pub local_ip: String,
    #[serde(rename = "PublicIP")]
    pub public_ip: String,
    #[serde(rename = "ConnectionType")]
    pub connection_type: String,
}

/// Body of the vendor login response. `status == 0` means authenticated;
/// `1` means the credentials were refused.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponseBody {
    #[serde(rename = "Token", default)]
    pub token: String,
    #[serde(rename = "ClientCode", default)]
    pub client_code: String,
    #[serde(rename = "TokenValidity", default)]
    pub token_validity: Option<BracketDate>,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Status")]
    pub status: i32,
}

// ---------------------------------------------------------------------------
// Order placement
// ---------------------------------------------------------------------------

/// Body of the order placement request. The rich envelope shape; field
/// order matches the broker's published contract.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
    /// `"P"` place, `"M"` modify, `"C"` cancel.
    #[serde(rename = "OrderFor")]
    pub order_for: String,
    /// Single-letter exchange code (`N`/`B`/`M`).
    #[serde(rename = "Exchange")]
    pub exchange: String,
    /// Single-letter segment code (`C`/`D`/`U`).
    #[serde(rename = "ExchangeType")]
    pub exchange_type: String,
    #[serde(rename = "Price")]
    pub price: f64,
    /// Internal order sequence, unique per client session.
    #[serde(rename = "OrderID")]
    pub order_id: i64,
    /// `"BUY"` or `"SELL"`.
    #[serde(rename = "OrderType")]
    pub order_type: String,
    #[serde(rename = "Qty")]
    pub qty: u32,
    #[serde(rename = "OrderDateTime")]
    pub order_date_time: BracketDate,
    #[serde(rename = "ScripCode")]
    pub scrip_code: i64,
    #[serde(rename = "AtMarket")]
    pub at_market: bool,
    /// Client idempotency token; the broker deduplicates on it.
    #[serde(rename = "RemoteOrderID")]
    pub remote_order_id: String,
    /// `"0"` for a new order.
    #[serde(rename = "ExchOrderID")]
    pub exch_order_id: String,
    #[serde(rename = "DisQty")]
    pub dis_qty: u32,
    #[serde(rename = "IsStopLossOrder")]
    pub is_stop_loss_order: bool,
    #[serde(rename = "StopLossPrice")]
    pub stop_loss_price: f64,
    /// Good-till-date flag.
    #[serde(rename = "IsVTD")]
    pub is_vtd: bool,
    #[serde(rename = "IOCOrder")]
    pub ioc_order: bool,
    #[serde(rename = "IsIntraday")]
    pub is_intraday: bool,
    #[serde(rename = "PublicIP")]
    pub public_ip: String,
    /// After-hours placement flag, `"Y"`/`"N"`.
    #[serde(rename = "AHPlaced")]
    pub ah_placed: String,
    #[serde(rename = "ValidTillDate")]
    pub valid_till_date: BracketDate,
    /// Validity code: 0 = day, 1 = GTD, 3 = IOC.
    #[serde(rename = "iOrderValidity")]
    pub i_order_validity: u8,
    #[serde(rename = "OrderRequesterCode")]
    pub order_requester_code: String,
    #[serde(rename = "TradedQty")]
    pub traded_qty: u32,
}

/// Body of the order placement response. `status == 0` means the order was
/// taken up; `1` means it was rejected outright.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponseBody {
    #[serde(rename = "BrokerOrderID")]
    pub broker_order_id: i64,
    #[serde(rename = "ClientCode", default)]
    pub client_code: String,
    #[serde(rename = "ExchOrderID", default)]
    pub exch_order_id: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Status")]
    pub status: i32,
}

// ---------------------------------------------------------------------------
// Order status / book (flatter request shapes)
// ---------------------------------------------------------------------------

/// Body of a single-order status request.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
    #[serde(rename = "BrokerOrderID")]
    pub broker_order_id: String,
}

/// Body of the order status response.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusResponseBody {
    #[serde(rename = "BrokerOrderID", default)]
    pub broker_order_id: i64,
    #[serde(rename = "ExchOrderID", default)]
    pub exch_order_id: String,
    /// Broker status text, e.g. `"Fully Executed"`.
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "TradedQty", default)]
    pub traded_qty: u32,
    #[serde(rename = "AvgRate", default)]
    pub avg_rate: f64,
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// Body of the order book request.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
}

/// Body of the order book response.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookBody {
    #[serde(rename = "OrderBookDetail", default)]
    pub orders: Vec<OrderBookDetail>,
}

/// One row of the order book.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookDetail {
    #[serde(rename = "BrokerOrderId", default)]
    pub broker_order_id: i64,
    #[serde(rename = "ExchOrderID", default)]
    pub exch_order_id: String,
    /// The client idempotency token echoed back.
    #[serde(rename = "RemoteOrderID", default)]
    pub remote_order_id: String,
    #[serde(rename = "OrderStatus", default)]
    pub order_status: String,
    #[serde(rename = "TradedQty", default)]
    pub traded_qty: u32,
    #[serde(rename = "AvgRate", default)]
    pub avg_rate: f64,
    #[serde(rename = "Reason", default)]
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Modify / cancel (flatter request shapes)
// ---------------------------------------------------------------------------

/// Body of an order modification request.
#[derive(Debug, Clone, Serialize)]
pub struct ModifyRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
    #[serde(rename = "BrokerOrderID")]
    pub broker_order_id: String,
    #[serde(rename = "Qty", skip_serializing_if = "Option::is_none")]
    pub qty: Option<u32>,
    #[serde(rename = "Price", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(rename = "StopLossPrice", skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<f64>,
}

/// Body of an order cancellation request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
    #[serde(rename = "BrokerOrderID")]
    pub broker_order_id: String,
}

// ---------------------------------------------------------------------------
// Positions / margin
// ---------------------------------------------------------------------------

/// Body of the net position request.
#[derive(Debug, Clone, Serialize)]
pub struct NetPositionRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
}

/// Body of the net position response.
#[derive(Debug, Clone, Deserialize)]
pub struct NetPositionBody {
    #[serde(rename = "NetPositionDetail", default)]
    pub positions: Vec<NetPositionDetail>,
}

/// One net position row.
#[derive(Debug, Clone, Deserialize)]
pub struct NetPositionDetail {
    #[serde(rename = "ScripName", default)]
    pub scrip_name: String,
    #[serde(rename = "Exch", default)]
    pub exch: String,
    #[serde(rename = "ExchType", default)]
    pub exch_type: String,
    #[serde(rename = "NetQty", default)]
    pub net_qty: i64,
    #[serde(rename = "LTP", default)]
    pub ltp: f64,
    #[serde(rename = "AvgRate", default)]
    pub avg_rate: f64,
}

/// Body of the margin request.
#[derive(Debug, Clone, Serialize)]
pub struct MarginRequestBody {
    #[serde(rename = "ClientCode")]
    pub client_code: String,
}

/// Body of the margin response.
#[derive(Debug, Clone, Deserialize)]
pub struct MarginBody {
    #[serde(rename = "AvailableMargin", default)]
    pub available_margin: f64,
    #[serde(rename = "UtilizedMargin", default)]
    pub utilized_margin: f64,
}
