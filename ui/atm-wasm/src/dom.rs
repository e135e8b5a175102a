//! DOM element bindings, resolved once at startup.

use wasm_bindgen::prelude::*;
use web_sys::{Document, Element, HtmlButtonElement, HtmlInputElement};

// ── Helpers ──

fn doc() -> Result<Document, JsValue> {
    web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| JsValue::from_str("no document"))
}

pub fn by_id_typed<T: JsCast>(id: &str) -> Option<T> {
    doc()
        .ok()?
        .get_element_by_id(id)
        .and_then(|e| e.dyn_into::<T>().ok())
}

pub fn set_text(el: &Element, text: &str) {
    el.set_text_content(Some(text));
}

pub fn get_input_value(el: &HtmlInputElement) -> String {
    el.value().trim().to_string()
}

pub fn set_input_value(el: &HtmlInputElement, val: &str) {
    el.set_value(val);
}

/// `hidden` class on when `visible` is false.
pub fn show(el: &Element, visible: bool) {
    let _ = el.class_list().toggle_with_force("hidden", !visible);
}

// ── Elements struct ──

#[derive(Clone)]
pub struct Elements {
    pub install_prompt: Element,
    pub connect_btn: HtmlButtonElement,
    pub account_panel: Element,

    pub account: Element,
    pub balance: Element,
    pub pending: Element,
    pub error: Element,
    pub refresh_btn: HtmlButtonElement,

    pub deposit_amount: HtmlInputElement,
    pub deposit_btn: HtmlButtonElement,
    pub withdraw_amount: HtmlInputElement,
    pub withdraw_btn: HtmlButtonElement,
    pub burn_amount: HtmlInputElement,
    pub burn_btn: HtmlButtonElement,
}

macro_rules! get_el {
    ($ty:ty, $id:expr) => {
        by_id_typed::<$ty>($id).ok_or_else(|| JsValue::from_str(&format!("missing #{}", $id)))?
    };
}

impl Elements {
    pub fn bind() -> Result<Elements, JsValue> {
        Ok(Elements {
            install_prompt: get_el!(Element, "installPrompt"),
            connect_btn: get_el!(HtmlButtonElement, "connectBtn"),
            account_panel: get_el!(Element, "accountPanel"),

            account: get_el!(Element, "account"),
            balance: get_el!(Element, "balance"),
            pending: get_el!(Element, "pending"),
            error: get_el!(Element, "error"),
            refresh_btn: get_el!(HtmlButtonElement, "refreshBtn"),

            deposit_amount: get_el!(HtmlInputElement, "depositAmount"),
            deposit_btn: get_el!(HtmlButtonElement, "depositBtn"),
            withdraw_amount: get_el!(HtmlInputElement, "withdrawAmount"),
            withdraw_btn: get_el!(HtmlButtonElement, "withdrawBtn"),
            burn_amount: get_el!(HtmlInputElement, "burnAmount"),
            burn_btn: get_el!(HtmlButtonElement, "burnBtn"),
        })
    }

    pub fn action_buttons(&self) -> [&HtmlButtonElement; 3] {
        [&self.deposit_btn, &self.withdraw_btn, &self.burn_btn]
    }
}
