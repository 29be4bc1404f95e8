//! Wire-format fidelity: exact field names, declaration order, and the
//! bracket-encoded timestamps the broker gateway requires.

use chrono::TimeZone;
use copytrade_core::broker::adapter::map_broker_status;
use copytrade_core::broker::wire::*;
use copytrade_core::types::{Exchange, ExchangeSegment, OrderStatus, Validity};

fn fixed_date() -> BracketDate {
    BracketDate(chrono::Utc.timestamp_millis_opt(1_718_000_000_000).single().unwrap())
}

fn sample_order_body() -> OrderRequestBody {
    OrderRequestBody {
        client_code: "CC001".into(),
        order_for: "P".into(),
        exchange: "N".into(),
        exchange_type: "C".into(),
        price: 2500.0,
        order_id: 7,
        order_type: "BUY".into(),
        qty: 100,
        order_date_time: fixed_date(),
        scrip_code: 2885,
        at_market: false,
        remote_order_id: "tok-123".into(),
        exch_order_id: "0".into(),
        dis_qty: 0,
        is_stop_loss_order: false,
        stop_loss_price: 0.0,
        is_vtd: false,
        ioc_order: false,
        is_intraday: true,
        public_ip: "127.0.0.1".into(),
        ah_placed: "N".into(),
        valid_till_date: fixed_date(),
        i_order_validity: 0,
        order_requester_code: "CC001".into(),
        traded_qty: 0,
    }
}

fn sample_head() -> RequestHead {
    RequestHead {
        request_code: "IIFLMarRQOrdReq".into(),
        key: "vendor-key".into(),
        app_ver: "1.0".into(),
        app_name: "CopyTrade".into(),
        os_name: "WEB".into(),
        user_id: "U001".into(),
        password: "p".into(),
    }
}

/// Assert that `keys` appear in this exact order in the serialized JSON.
fn assert_key_order(json: &str, keys: &[&str]) {
    let mut last = 0usize;
    for key in keys {
        let needle = format!("\"{key}\":");
        let at = json[last..]
            .find(&needle)
            .unwrap_or_else(|| panic!("{key} missing or out of order in {json}"));
        last += at + needle.len();
    }
}

// ===================================================================
// Request envelope
// ===================================================================

#[test]
fn head_fields_are_byte_exact() {
    let json = serde_json::to_string(&sample_head()).unwrap();
    assert_key_order(
        &json,
        &["requestCode", "key", "appVer", "appName", "osName", "userId", "password"],
    );
    assert!(json.contains("\"requestCode\":\"IIFLMarRQOrdReq\""));
}

#[test]
fn order_body_fields_are_byte_exact() {
    let envelope = Envelope {
        head: sample_head(),
        body: sample_order_body(),
    };
    let json = serde_json::to_string(&envelope).unwrap();

    // The envelope wraps head then body.
    assert_key_order(&json, &["head", "body"]);
    // Body fields in the broker's published order.
    assert_key_order(
        &json,
        &[
            "ClientCode",
            "OrderFor",
            "Exchange",
            "ExchangeType",
            "Price",
            "OrderID",
            "OrderType",
            "Qty",
            "OrderDateTime",
            "ScripCode",
            "AtMarket",
            "RemoteOrderID",
            "ExchOrderID",
            "DisQty",
            "IsStopLossOrder",
            "StopLossPrice",
            "IsVTD",
            "IOCOrder",
            "IsIntraday",
            "PublicIP",
            "AHPlaced",
            "ValidTillDate",
            "iOrderValidity",
            "OrderRequesterCode",
            "TradedQty",
        ],
    );

    assert!(json.contains("\"OrderDateTime\":\"/Date(1718000000000)/\""));
    assert!(json.contains("\"RemoteOrderID\":\"tok-123\""));
    assert!(json.contains("\"ExchOrderID\":\"0\""));
    assert!(json.contains("\"ScripCode\":2885"));
    assert!(json.contains("\"AHPlaced\":\"N\""));
}

#[test]
fn bracket_dates_round_trip() {
    let encoded = serde_json::to_string(&fixed_date()).unwrap();
    assert_eq!(encoded, "\"/Date(1718000000000)/\"");
    let decoded: BracketDate = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, fixed_date());
}

#[test]
fn malformed_bracket_dates_are_rejected() {
    for raw in ["\"2024-06-10T00:00:00Z\"", "\"/Date(abc)/\"", "\"Date(1)\""] {
        assert!(serde_json::from_str::<BracketDate>(raw).is_err(), "{raw}");
    }
}

// ===================================================================
// Response envelope
// ===================================================================

#[test]
fn order_response_parses() {
    let raw = r#"{
        "head": {"responseCode": "IIFLMarRQOrdRes", "status": 0, "statusDescription": "Success"},
        "body": {
            "BrokerOrderID": 520011,
            "ClientCode": "CC001",
            "ExchOrderID": "1100000017",
            "Message": "Placed",
            "Status": 0
        }
    }"#;
    let envelope: ResponseEnvelope<OrderResponseBody> = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.head.status, 0);
    assert_eq!(envelope.body.broker_order_id, 520011);
    assert_eq!(envelope.body.exch_order_id, "1100000017");
    assert_eq!(envelope.body.status, 0);
}

#[test]
fn order_book_rows_parse_with_defaults() {
    let raw = r#"{
        "head": {"responseCode": "IIFLMarRQOrdBkV2", "status": 0, "statusDescription": ""},
        "body": {
            "OrderBookDetail": [
                {
                    "BrokerOrderId": 520011,
                    "ExchOrderID": "1100000017",
                    "RemoteOrderID": "tok-123",
                    "OrderStatus": "Fully Executed",
                    "TradedQty": 100,
                    "AvgRate": 2501.5
                },
                {"OrderStatus": "Rejected", "Reason": "RMS limit"}
            ]
        }
    }"#;
    let envelope: ResponseEnvelope<OrderBookBody> = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.body.orders.len(), 2);
    assert_eq!(envelope.body.orders[0].remote_order_id, "tok-123");
    assert_eq!(envelope.body.orders[1].reason, "RMS limit");
    assert_eq!(envelope.body.orders[1].broker_order_id, 0);
}

#[test]
fn login_response_parses() {
    let raw = r#"{
        "head": {"responseCode": "IIFLMarRQLoginForVendor", "status": 0, "statusDescription": "OK"},
        "body": {
            "Token": "abcdef",
            "ClientCode": "CC001",
            "TokenValidity": "/Date(1718086400000)/",
            "Message": "Logged in",
            "Status": 0
        }
    }"#;
    let envelope: ResponseEnvelope<LoginResponseBody> = serde_json::from_str(raw).unwrap();
    assert_eq!(envelope.body.token, "abcdef");
    assert!(envelope.body.token_validity.is_some());
}

// ===================================================================
// Status & code mapping
// ===================================================================

#[test]
fn broker_status_strings_map_to_canonical_statuses() {
    assert_eq!(map_broker_status("Placed"), OrderStatus::SUBMITTED);
    assert_eq!(map_broker_status("Pending"), OrderStatus::SUBMITTED);
    assert_eq!(map_broker_status("Partially Executed"), OrderStatus::PARTIALLY_FILLED);
    assert_eq!(map_broker_status("Fully Executed"), OrderStatus::FILLED);
    assert_eq!(map_broker_status("Rejected"), OrderStatus::REJECTED);
    assert_eq!(map_broker_status("Cancelled"), OrderStatus::CANCELLED);
    assert_eq!(map_broker_status("???"), OrderStatus::UNKNOWN);
}

#[test]
fn exchange_and_segment_wire_codes() {
    assert_eq!(Exchange::NSE.wire_code(), "N");
    assert_eq!(Exchange::BSE.wire_code(), "B");
    assert_eq!(Exchange::MCX.wire_code(), "M");
    assert_eq!(Exchange::from_wire_code("N"), Some(Exchange::NSE));
    assert_eq!(Exchange::from_wire_code("Z"), None);

    assert_eq!(ExchangeSegment::CASH.wire_code(), "C");
    assert_eq!(ExchangeSegment::DERIVATIVE.wire_code(), "D");
    assert_eq!(ExchangeSegment::CURRENCY.wire_code(), "U");

    assert_eq!(Validity::DAY.wire_code(), 0);
    assert_eq!(Validity::GTD.wire_code(), 1);
    assert_eq!(Validity::IOC.wire_code(), 3);
}
