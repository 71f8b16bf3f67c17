//! The SDK's exported ABI, driven the way the server drives a plugin.

use std::collections::BTreeMap;

use trellis::logic::plugin::{decode_envelope, ABI_VERSION};
use trellis::logic::{ExecContext, LogicError};
use trellis_sdk::{HandlerResult, NotFound, Params, Request};

fn show_item(req: &Request, params: &Params) -> HandlerResult {
    let id = params.get("id").ok_or(NotFound)?;
    if id == "0" {
        return Err(Box::new(NotFound));
    }
    if id == "err" {
        return Err("item store offline".into());
    }

    let mut data = trellis_sdk::Data::new();
    data.insert("id".into(), id.clone().into());
    data.insert("method".into(), req.method.clone().into());
    data.insert("q".into(), req.form_value("q").unwrap_or_default().into());
    Ok(data)
}

trellis_sdk::export_handler!(show_item);

fn invoke(ctx: &ExecContext) -> Result<trellis::logic::LogicData, LogicError> {
    let input = serde_json::to_vec(ctx).unwrap();
    let mut len = 0usize;
    let output = unsafe {
        let ptr = trellis_handle(input.as_ptr(), input.len(), &mut len);
        assert!(!ptr.is_null());
        let bytes = std::slice::from_raw_parts(ptr, len).to_vec();
        trellis_free(ptr, len);
        bytes
    };
    decode_envelope(&output)
}

fn context(id: &str) -> ExecContext {
    let mut params = BTreeMap::new();
    params.insert("id".to_string(), id.to_string());
    let mut form = BTreeMap::new();
    form.insert("q".to_string(), vec!["blue".to_string()]);
    ExecContext {
        method: "GET".into(),
        url: format!("/items/{id}?q=blue"),
        form,
        params,
        ..ExecContext::default()
    }
}

#[test]
fn test_abi_version_matches_server() {
    assert_eq!(trellis_abi_version(), ABI_VERSION);
    assert_eq!(trellis_sdk::ABI_VERSION, ABI_VERSION);
}

#[test]
fn test_handler_data_reaches_server() {
    let data = invoke(&context("17")).unwrap();
    assert_eq!(data["id"], "17");
    assert_eq!(data["method"], "GET");
    assert_eq!(data["q"], "blue");
}

#[test]
fn test_not_found_crosses_the_boundary() {
    assert!(invoke(&context("0")).unwrap_err().is_not_found());
}

#[test]
fn test_handler_error_message_is_kept() {
    let err = invoke(&context("err")).unwrap_err();
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("item store offline"));
}
