//! Logic-unit SDK.
//!
//! A logic unit is a `handle_request` function:
//!
//! ```ignore
//! use trellis_sdk::{NotFound, Params, Request};
//!
//! pub fn handle_request(
//!     req: &Request,
//!     params: &Params,
//! ) -> Result<serde_json::Map<String, serde_json::Value>, Box<dyn std::error::Error>> {
//!     let id = params.get("id").ok_or(NotFound)?;
//!     let mut data = serde_json::Map::new();
//!     data.insert("id".into(), id.clone().into());
//!     data.insert("method".into(), req.method.clone().into());
//!     Ok(data)
//! }
//!
//! trellis_sdk::export_handler!(handle_request);
//! ```
//!
//! The same source runs either way. Built as a `cdylib` and placed next
//! to the source as `index.server.<so|dylib|dll>`, it is loaded
//! in-process. Otherwise the server compiles a small runner around it per
//! request; the runner calls [`handle`] and reports the result on stdout.
//! The site crate should depend on `trellis-sdk`; if it does not, the
//! server adds the SDK it was built with.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

/// ABI version exported by [`export_handler!`].
pub const ABI_VERSION: u32 = 1;

/// Route parameters by name (`_id` directory → `"id"`).
pub type Params = BTreeMap<String, String>;

/// What a handler returns on success.
pub type Data = serde_json::Map<String, serde_json::Value>;

/// Handler signature.
pub type HandlerResult = Result<Data, Box<dyn Error>>;

/// The incoming request as seen by a logic unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub host: String,
    pub remote_addr: String,
    /// Query parameters merged with an urlencoded body.
    pub form: BTreeMap<String, Vec<String>>,
}

impl Request {
    /// First value of a header; names are matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// First value of a form or query field.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Return this from a handler to answer 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound;

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("not found")
    }
}

impl Error for NotFound {}

#[derive(Deserialize)]
struct Incoming {
    #[serde(flatten)]
    request: Request,
    #[serde(default)]
    params: Params,
}

/// Result envelope written back to the server.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    Data(Data),
    Error { message: String, not_found: bool },
}

impl Envelope {
    fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
            not_found: false,
        }
    }
}

/// Decode `input` and run `handler` on it. Panics are caught and
/// reported as errors.
pub fn handle<F>(input: &[u8], handler: F) -> Envelope
where
    F: Fn(&Request, &Params) -> HandlerResult,
{
    let incoming = match serde_json::from_slice::<Incoming>(input) {
        Ok(incoming) => incoming,
        Err(e) => return Envelope::error(format!("invalid request context: {e}")),
    };

    match catch_unwind(AssertUnwindSafe(|| handler(&incoming.request, &incoming.params))) {
        Ok(Ok(data)) => Envelope::Data(data),
        Ok(Err(e)) if e.is::<NotFound>() => Envelope::Error {
            message: e.to_string(),
            not_found: true,
        },
        Ok(Err(e)) => Envelope::error(e.to_string()),
        Err(_) => Envelope::error("handler panicked"),
    }
}

/// [`handle`], encoded as the JSON envelope the plugin ABI returns.
pub fn dispatch<F>(input: &[u8], handler: F) -> Vec<u8>
where
    F: Fn(&Request, &Params) -> HandlerResult,
{
    serde_json::to_vec(&handle(input, handler)).unwrap_or_else(|e| {
        format!(r#"{{"error":{{"message":"unencodable result: {e}","not_found":false}}}}"#).into_bytes()
    })
}

#[doc(hidden)]
pub mod __export {
    /// Hand `output` to the caller; ownership returns through [`free_raw`].
    ///
    /// # Safety
    /// `out_len` must be valid for writes or null.
    pub unsafe fn into_raw(output: Vec<u8>, out_len: *mut usize) -> *mut u8 {
        let boxed = output.into_boxed_slice();
        if !out_len.is_null() {
            *out_len = boxed.len();
        }
        Box::into_raw(boxed) as *mut u8
    }

    /// # Safety
    /// `ptr` and `len` must come from one [`into_raw`] call.
    pub unsafe fn free_raw(ptr: *mut u8, len: usize) {
        if !ptr.is_null() {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
        }
    }

    /// # Safety
    /// `ptr` must be valid for `len` bytes or null.
    pub unsafe fn input<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
        if ptr.is_null() {
            &[]
        } else {
            std::slice::from_raw_parts(ptr, len)
        }
    }
}

/// Export the plugin ABI for a handler function.
#[macro_export]
macro_rules! export_handler {
    ($handler:path) => {
        #[no_mangle]
        pub extern "C" fn trellis_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        /// # Safety
        /// Called by the server with a valid input buffer and length slot.
        #[no_mangle]
        pub unsafe extern "C" fn trellis_handle(
            input: *const u8,
            input_len: usize,
            out_len: *mut usize,
        ) -> *mut u8 {
            let input = $crate::__export::input(input, input_len);
            let output = $crate::dispatch(input, $handler);
            $crate::__export::into_raw(output, out_len)
        }

        /// # Safety
        /// `ptr` and `len` must come from `trellis_handle`.
        #[no_mangle]
        pub unsafe extern "C" fn trellis_free(ptr: *mut u8, len: usize) {
            $crate::__export::free_raw(ptr, len)
        }
    };
}
