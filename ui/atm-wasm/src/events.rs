//! Event binding and the click actions behind each button.

use atm_api_types::OperationKind;
use atm_core::AtmApp;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::HtmlInputElement;

use crate::dom::{self, Elements};

/// What every handler gets: the page and the app behind it.
#[derive(Clone)]
pub struct Ui {
    pub els: Elements,
    pub app: Rc<AtmApp>,
}

/// Helper: attach async click handler to an element.
macro_rules! on_click_async {
    ($el:expr, $ui:expr, $handler:expr) => {{
        let ui = $ui.clone();
        let cb = Closure::wrap(Box::new(move |_: web_sys::MouseEvent| {
            let ui2 = ui.clone();
            wasm_bindgen_futures::spawn_local(async move {
                $handler(&ui2).await;
            });
        }) as Box<dyn FnMut(_)>);
        $el.add_event_listener_with_callback("click", cb.as_ref().unchecked_ref())?;
        cb.forget();
    }};
}

pub fn bind_events(ui: &Ui) -> Result<(), JsValue> {
    on_click_async!(ui.els.connect_btn, ui, on_connect);
    on_click_async!(ui.els.refresh_btn, ui, on_refresh);
    on_click_async!(ui.els.deposit_btn, ui, on_deposit);
    on_click_async!(ui.els.withdraw_btn, ui, on_withdraw);
    on_click_async!(ui.els.burn_btn, ui, on_burn);
    Ok(())
}

// errors are already in the snapshot and rendered; the console line is for
// debugging only

async fn on_connect(ui: &Ui) {
    if let Err(err) = ui.app.connect().await {
        gloo_console::warn!(format!("connect: {err}"));
    }
}

async fn on_refresh(ui: &Ui) {
    if let Err(err) = ui.app.refresh().await {
        gloo_console::warn!(format!("refresh: {err}"));
    }
}

async fn on_deposit(ui: &Ui) {
    submit(ui, OperationKind::Deposit, &ui.els.deposit_amount).await;
}

async fn on_withdraw(ui: &Ui) {
    submit(ui, OperationKind::Withdraw, &ui.els.withdraw_amount).await;
}

async fn on_burn(ui: &Ui) {
    submit(ui, OperationKind::Burn, &ui.els.burn_amount).await;
}

async fn submit(ui: &Ui, kind: OperationKind, input: &HtmlInputElement) {
    let amount = parse_amount(&dom::get_input_value(input));
    match ui.app.submit(kind, amount).await {
        Ok(Some(receipt)) => {
            dom::set_input_value(input, "");
            gloo_console::log!(format!(
                "{} {} confirmed in {}",
                receipt.kind, receipt.amount, receipt.tx_hash
            ));
        }
        Ok(None) => {}
        Err(err) => gloo_console::warn!(format!("{kind}: {err}")),
    }
}

/// Whole base units. Anything that is not an integer counts as zero, which the
/// controller treats as a no-op.
pub fn parse_amount(raw: &str) -> i128 {
    raw.trim().parse().unwrap_or(0)
}
