//! ATM dApp WASM front end.
//!
//! Binds the injected browser wallet to `atm-core` and renders every
//! snapshot into the page.

pub mod dom;
pub mod events;
pub mod provider;
pub mod render;

use atm_core::{AtmApp, ContractConfig};
use atm_provider::WalletEvent;
use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver};
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::events::Ui;
use crate::provider::InjectedSource;

/// WASM entry point, called when the module is instantiated.
#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();

    init().await
}

async fn init() -> Result<(), JsValue> {
    let els = dom::Elements::bind()?;
    let config = ContractConfig::assessment()
        .map_err(|err| JsValue::from_str(&format!("{err:#}")))?;

    let (events_tx, events_rx) = mpsc::unbounded();
    let app = AtmApp::new(Rc::new(InjectedSource::new(events_tx)), config);
    {
        let els = els.clone();
        app.subscribe(move |snapshot| render::render(&els, snapshot));
    }
    render::render(&els, &app.snapshot());

    events::bind_events(&Ui {
        els,
        app: app.clone(),
    })?;
    spawn_local(forward_wallet_events(app.clone(), events_rx));

    if let Err(err) = app.init().await {
        gloo_console::warn!(format!("wallet sync: {err}"));
    }
    Ok(())
}

async fn forward_wallet_events(app: Rc<AtmApp>, mut events: UnboundedReceiver<WalletEvent>) {
    while let Some(event) = events.next().await {
        if let Err(err) = app.handle_wallet_event(event).await {
            gloo_console::warn!(format!("wallet event: {err}"));
        }
    }
}
