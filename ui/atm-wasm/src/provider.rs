//! `window.ethereum` as an `Eip1193` provider.
//!
//! Requests go through the injected object's `request({ method, params })`
//! promise. `accountsChanged` and `disconnect` callbacks are turned into
//! `WalletEvent`s on a channel that `lib.rs` drains into the app.

use async_trait::async_trait;
use atm_provider::{Eip1193, ProviderError, ProviderSource, WalletEvent, parse_accounts};
use futures::channel::mpsc::UnboundedSender;
use js_sys::{Function, Object, Promise, Reflect};
use serde::Serialize;
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

pub struct InjectedProvider {
    ethereum: Object,
}

impl InjectedProvider {
    /// `None` when no wallet extension injected `window.ethereum`.
    pub fn from_window() -> Option<Self> {
        let window = web_sys::window()?;
        let ethereum = Reflect::get(&window, &JsValue::from_str("ethereum")).ok()?;
        if ethereum.is_undefined() || ethereum.is_null() {
            return None;
        }
        ethereum
            .dyn_into::<Object>()
            .ok()
            .map(|ethereum| Self { ethereum })
    }

    fn method(&self, name: &str) -> Result<Function, JsValue> {
        Reflect::get(&self.ethereum, &JsValue::from_str(name))?.dyn_into::<Function>()
    }

    /// Register `accountsChanged` / `disconnect` listeners. The closures live
    /// for the rest of the page.
    pub fn forward_events(&self, events: UnboundedSender<WalletEvent>) -> Result<(), JsValue> {
        let on = self.method("on")?;

        let accounts_tx = events.clone();
        let accounts_changed = Closure::<dyn FnMut(JsValue)>::new(move |accounts: JsValue| {
            let parsed = serde_wasm_bindgen::from_value::<Value>(accounts)
                .map_err(|err| err.to_string())
                .and_then(|value| parse_accounts(&value).map_err(|err| err.to_string()));
            match parsed {
                Ok(accounts) => {
                    let _ = accounts_tx.unbounded_send(WalletEvent::AccountsChanged(accounts));
                }
                Err(err) => gloo_console::warn!(format!("ignoring accountsChanged: {err}")),
            }
        });
        on.call2(
            &self.ethereum,
            &JsValue::from_str("accountsChanged"),
            accounts_changed.as_ref().unchecked_ref(),
        )?;
        accounts_changed.forget();

        let disconnect = Closure::<dyn FnMut(JsValue)>::new(move |_: JsValue| {
            let _ = events.unbounded_send(WalletEvent::Disconnected);
        });
        on.call2(
            &self.ethereum,
            &JsValue::from_str("disconnect"),
            disconnect.as_ref().unchecked_ref(),
        )?;
        disconnect.forget();

        Ok(())
    }
}

#[async_trait(?Send)]
impl Eip1193 for InjectedProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let params = params
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let args = Object::new();
        Reflect::set(&args, &JsValue::from_str("method"), &JsValue::from_str(method))
            .map_err(transport)?;
        Reflect::set(&args, &JsValue::from_str("params"), &params).map_err(transport)?;

        let promise = self
            .method("request")
            .and_then(|request| request.call1(&self.ethereum, &args))
            .and_then(|pending| pending.dyn_into::<Promise>())
            .map_err(transport)?;
        let result = JsFuture::from(promise).await.map_err(rejection)?;

        if result.is_undefined() || result.is_null() {
            return Ok(Value::Null);
        }
        serde_wasm_bindgen::from_value(result)
            .map_err(|err| ProviderError::Malformed(err.to_string()))
    }

    async fn idle(&self, interval: Duration) {
        gloo_timers::future::sleep(interval).await;
    }
}

fn transport(err: JsValue) -> ProviderError {
    ProviderError::Transport(describe(&err))
}

/// EIP-1193 rejections carry `{ code, message, data }`; anything else is a
/// transport failure.
fn rejection(err: JsValue) -> ProviderError {
    let field = |name: &str| {
        Reflect::get(&err, &JsValue::from_str(name))
            .ok()
            .filter(|value| !value.is_undefined())
    };
    let Some(code) = field("code").and_then(|code| code.as_f64()) else {
        return transport(err);
    };
    ProviderError::Rpc {
        code: code as i64,
        message: describe(&err),
        data: field("data").and_then(|data| serde_wasm_bindgen::from_value(data).ok()),
    }
}

fn describe(err: &JsValue) -> String {
    Reflect::get(err, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{err:?}"))
}

/// Finds `window.ethereum`; registers the notification listeners the first
/// time it is found.
pub struct InjectedSource {
    events: UnboundedSender<WalletEvent>,
    listening: Cell<bool>,
}

impl InjectedSource {
    pub fn new(events: UnboundedSender<WalletEvent>) -> Self {
        Self {
            events,
            listening: Cell::new(false),
        }
    }
}

#[async_trait(?Send)]
impl ProviderSource for InjectedSource {
    async fn detect(&self) -> Option<Rc<dyn Eip1193>> {
        let provider = InjectedProvider::from_window()?;
        if !self.listening.get() {
            match provider.forward_events(self.events.clone()) {
                Ok(()) => self.listening.set(true),
                Err(err) => gloo_console::warn!("wallet notifications unavailable:", err),
            }
        }
        Some(Rc::new(provider))
    }
}
